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

//! File digests. Large files are hashed window by window so the whole
//! plaintext never has to sit in memory; the file digest is the SHA-256 of
//! the concatenated hex digests of the 1 GiB windows. File ids embed this
//! digest, so the exact procedure is part of the wire contract.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::constants::SIZE_1GIB;
use cess_util::to_hex;

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(data);
	to_hex(&hasher.finalize())
}

/// Digest of a reader, hashed in windows of `window` bytes: per-window hex
/// SHA-256, then SHA-256 over the concatenated hex strings.
pub fn chunked_digest<R: Read>(mut reader: R, window: u64) -> io::Result<String> {
	assert!(window > 0, "digest window must be positive");

	let mut all = String::new();
	let mut buf = vec![0u8; 64 * 1024];
	loop {
		let mut hasher = Sha256::new();
		let mut taken = 0u64;
		while taken < window {
			let want = std::cmp::min(buf.len() as u64, window - taken) as usize;
			let n = reader.read(&mut buf[..want])?;
			if n == 0 {
				break;
			}
			hasher.update(&buf[..n]);
			taken += n as u64;
		}
		if taken == 0 {
			break;
		}
		all.push_str(&to_hex(&hasher.finalize()));
		if taken < window {
			break;
		}
	}
	Ok(sha256_hex(all.as_bytes()))
}

/// Digest of a file on disk with the canonical 1 GiB window.
pub fn file_digest<P: AsRef<Path>>(path: P) -> io::Result<String> {
	chunked_digest(File::open(path)?, SIZE_1GIB)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_window_matches_manual_procedure() {
		let data = b"hello scheduler";
		let inner = sha256_hex(data);
		let expected = sha256_hex(inner.as_bytes());
		assert_eq!(chunked_digest(&data[..], 1024).unwrap(), expected);
	}

	#[test]
	fn window_boundaries_split_the_hash() {
		// 10 bytes hashed with a 4 byte window: windows of 4, 4, 2.
		let data = b"0123456789";
		let inner = format!(
			"{}{}{}",
			sha256_hex(b"0123"),
			sha256_hex(b"4567"),
			sha256_hex(b"89"),
		);
		let expected = sha256_hex(inner.as_bytes());
		assert_eq!(chunked_digest(&data[..], 4).unwrap(), expected);
	}

	#[test]
	fn exact_multiple_of_window_adds_no_empty_tail() {
		let data = b"abcdefgh";
		let inner = format!("{}{}", sha256_hex(b"abcd"), sha256_hex(b"efgh"));
		let expected = sha256_hex(inner.as_bytes());
		assert_eq!(chunked_digest(&data[..], 4).unwrap(), expected);
	}
}
