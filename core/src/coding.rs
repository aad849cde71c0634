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

//! Redundancy coding of encrypted files. Each shard becomes one replica
//! unit placed on exactly one miner; any `data` of the `data + parity`
//! shards restore the ciphertext.

use std::fmt;

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::constants::{MAX_DATA_SHARDS, SHARD_SIZE};

/// Coding errors.
#[derive(Debug)]
pub enum Error {
	/// Nothing to encode
	EmptyInput,
	/// Fewer than `data` shards survive
	NotEnoughShards,
	/// Shard set inconsistent with the layout
	ShapeMismatch(String),
	/// Underlying Reed-Solomon failure
	Coding(reed_solomon_erasure::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::EmptyInput => write!(f, "cannot encode an empty file"),
			Error::NotEnoughShards => write!(f, "not enough shards to restore the file"),
			Error::ShapeMismatch(s) => write!(f, "shard shape mismatch: {}", s),
			Error::Coding(e) => write!(f, "reed-solomon: {:?}", e),
		}
	}
}

impl From<reed_solomon_erasure::Error> for Error {
	fn from(e: reed_solomon_erasure::Error) -> Error {
		Error::Coding(e)
	}
}

/// Shape of an encoded file; committed alongside the replica descriptors
/// so restore works from chain data alone.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ShardLayout {
	/// Number of data shards
	pub data: usize,
	/// Number of parity shards
	pub parity: usize,
	/// Size of every shard in bytes
	pub shard_size: usize,
	/// Original ciphertext length before padding
	pub file_size: u64,
}

impl ShardLayout {
	/// Total shards placed.
	pub fn total(&self) -> usize {
		self.data + self.parity
	}
}

/// The size table: `data` grows with the file so that
/// `data × SHARD_SIZE ≤ size < (data + 1) × SHARD_SIZE`, clamped to
/// [1, MAX_DATA_SHARDS]; parity is half of data, rounded up.
pub fn shard_counts(size: u64) -> (usize, usize) {
	let mut data = size / SHARD_SIZE;
	if data == 0 {
		data = 1;
	}
	if data > MAX_DATA_SHARDS {
		data = MAX_DATA_SHARDS;
	}
	let parity = (data + 1) / 2;
	(data as usize, parity as usize)
}

/// Encode ciphertext into equally sized shards, zero padding the tail of
/// the last data shard.
pub fn encode(input: &[u8]) -> Result<(Vec<Vec<u8>>, ShardLayout), Error> {
	if input.is_empty() {
		return Err(Error::EmptyInput);
	}
	let (data, parity) = shard_counts(input.len() as u64);
	let shard_size = (input.len() + data - 1) / data;
	let layout = ShardLayout {
		data,
		parity,
		shard_size,
		file_size: input.len() as u64,
	};

	let mut shards: Vec<Vec<u8>> = Vec::with_capacity(layout.total());
	for i in 0..data {
		let start = i * shard_size;
		let end = std::cmp::min(start + shard_size, input.len());
		let mut shard = input[start..end].to_vec();
		shard.resize(shard_size, 0);
		shards.push(shard);
	}
	for _ in 0..parity {
		shards.push(vec![0u8; shard_size]);
	}

	let rs = ReedSolomon::new(data, parity)?;
	rs.encode(&mut shards)?;
	Ok((shards, layout))
}

/// Restore the ciphertext from surviving shards (`None` marks a lost
/// shard). Order must follow shard index.
pub fn restore(mut shards: Vec<Option<Vec<u8>>>, layout: &ShardLayout) -> Result<Vec<u8>, Error> {
	if shards.len() != layout.total() {
		return Err(Error::ShapeMismatch(format!(
			"expected {} shards, got {}",
			layout.total(),
			shards.len()
		)));
	}
	let alive = shards.iter().filter(|s| s.is_some()).count();
	if alive < layout.data {
		return Err(Error::NotEnoughShards);
	}
	for shard in shards.iter().flatten() {
		if shard.len() != layout.shard_size {
			return Err(Error::ShapeMismatch(format!(
				"shard of {} bytes in a {} byte layout",
				shard.len(),
				layout.shard_size
			)));
		}
	}

	let rs = ReedSolomon::new(layout.data, layout.parity)?;
	rs.reconstruct(&mut shards)?;

	let mut out = Vec::with_capacity(layout.data * layout.shard_size);
	for shard in shards.into_iter().take(layout.data) {
		out.extend_from_slice(&shard.expect("reconstructed"));
	}
	out.truncate(layout.file_size as usize);
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::{thread_rng, RngCore};

	fn random_bytes(len: usize) -> Vec<u8> {
		let mut v = vec![0u8; len];
		thread_rng().fill_bytes(&mut v);
		v
	}

	#[test]
	fn size_table_matches_placement_expectations() {
		// 10 MiB places three replicas: two data and one parity.
		assert_eq!(shard_counts(10 * 1024 * 1024), (2, 1));
		assert_eq!(shard_counts(1), (1, 1));
		assert_eq!(shard_counts(5 * 1024 * 1024 - 1), (1, 1));
		assert_eq!(shard_counts(25 * 1024 * 1024), (5, 3));
		// capped
		assert_eq!(shard_counts(u64::max_value()), (12, 6));
	}

	#[test]
	fn restore_from_all_shards() {
		let input = random_bytes(3 * 1024 + 11);
		let (shards, layout) = encode(&input).unwrap();
		let restored = restore(shards.into_iter().map(Some).collect(), &layout).unwrap();
		assert_eq!(restored, input);
	}

	#[test]
	fn restore_survives_parity_many_losses() {
		let input = random_bytes(11 * 1024 * 1024);
		let (shards, layout) = encode(&input).unwrap();
		assert_eq!((layout.data, layout.parity), (2, 1));
		let mut partial: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
		partial[0] = None;
		let restored = restore(partial, &layout).unwrap();
		assert_eq!(restored, input);
	}

	#[test]
	fn restore_fails_below_data_count() {
		let input = random_bytes(64);
		let (shards, layout) = encode(&input).unwrap();
		let mut partial: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
		partial[0] = None;
		partial[1] = None;
		assert!(matches!(
			restore(partial, &layout),
			Err(Error::NotEnoughShards)
		));
	}

	#[test]
	fn empty_input_is_rejected() {
		assert!(matches!(encode(&[]), Err(Error::EmptyInput)));
	}
}
