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

//! Hex encoding as used for file identifiers and digests. Lowercase, since
//! file ids embed lowercase digests and the comparison is textual.

use std::fmt::Write;
use std::num;

/// Encode the provided bytes into a lowercase hex string
pub fn to_hex(bytes: &[u8]) -> String {
	let mut s = String::with_capacity(bytes.len() * 2);
	for byte in bytes {
		write!(&mut s, "{:02x}", byte).expect("hex write");
	}
	s
}

/// Decode a hex string into bytes.
pub fn from_hex(hex_str: &str) -> Result<Vec<u8>, num::ParseIntError> {
	let hex_trim = hex_str.trim_start_matches("0x").trim();
	(0..hex_trim.len() / 2)
		.map(|i| u8::from_str_radix(&hex_trim[2 * i..2 * i + 2], 16))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_round_trip() {
		let bytes = vec![0u8, 1, 17, 255, 171];
		let s = to_hex(&bytes);
		assert_eq!(s, "000111ffab");
		assert_eq!(from_hex(&s).unwrap(), bytes);
	}

	#[test]
	fn hex_accepts_prefix() {
		assert_eq!(from_hex("0xff00").unwrap(), vec![255, 0]);
	}
}
