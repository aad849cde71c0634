// Copyright 2022 The CESS Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Serde helpers carrying raw byte fields as base64 strings inside JSON
//! bodies, both on the framed RPC and at the chain RPC boundary.

/// `#[serde(with = "b64::bytes")]` for a `Vec<u8>` field.
pub mod bytes {
	use serde::{Deserialize, Deserializer, Serializer};

	/// base64-encode the field
	pub fn serialize<S: Serializer>(v: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&base64::encode(v))
	}

	/// base64-decode the field
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(d)?;
		base64::decode(&s).map_err(serde::de::Error::custom)
	}
}

/// `#[serde(with = "b64::byte_vecs")]` for a `Vec<Vec<u8>>` field.
pub mod byte_vecs {
	use serde::{Deserialize, Deserializer, Serializer};
	use serde::ser::SerializeSeq;

	/// base64-encode every element
	pub fn serialize<S: Serializer>(v: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
		let mut seq = s.serialize_seq(Some(v.len()))?;
		for item in v {
			seq.serialize_element(&base64::encode(item))?;
		}
		seq.end()
	}

	/// base64-decode every element
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
		let strings = Vec::<String>::deserialize(d)?;
		strings
			.into_iter()
			.map(|s| base64::decode(&s).map_err(serde::de::Error::custom))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	#[derive(Serialize, Deserialize, PartialEq, Debug)]
	struct Wrapper {
		#[serde(with = "crate::b64::bytes")]
		data: Vec<u8>,
		#[serde(with = "crate::b64::byte_vecs")]
		many: Vec<Vec<u8>>,
	}

	#[test]
	fn byte_fields_round_trip_as_base64() {
		let w = Wrapper {
			data: vec![0, 1, 2, 250],
			many: vec![vec![9, 9], vec![]],
		};
		let json = serde_json::to_string(&w).unwrap();
		assert!(json.contains(&base64::encode(&[0u8, 1, 2, 250])));
		let back: Wrapper = serde_json::from_str(&json).unwrap();
		assert_eq!(back, w);
	}
}
