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

//! Replica encryption. Every replica of a file is encrypted under its own
//! random 32-byte key with AES-256-CTR; the IV is the first 16 bytes of
//! the key's base58 form, which is what gets committed on chain as
//! `rand_key`.

use std::fmt;

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

use cess_util::random_code;

type Aes256Ctr = Ctr128BE<Aes256>;

/// Encryption errors.
#[derive(Debug, PartialEq)]
pub enum Error {
	/// Key is not 32 bytes
	BadKey,
	/// Recorded rand_key is too short to derive the IV
	BadRandKey,
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::BadKey => write!(f, "replica key must be 32 bytes"),
			Error::BadRandKey => write!(f, "rand_key too short for IV derivation"),
		}
	}
}

/// Fresh printable replica key.
pub fn random_key() -> String {
	random_code(32)
}

/// IV bytes derived from the base58 form of the key.
pub fn iv_from_rand_key(rand_key: &str) -> Result<[u8; 16], Error> {
	let bytes = rand_key.as_bytes();
	if bytes.len() < 16 {
		return Err(Error::BadRandKey);
	}
	let mut iv = [0u8; 16];
	iv.copy_from_slice(&bytes[..16]);
	Ok(iv)
}

/// CTR keystream application; encrypt and decrypt are the same operation.
fn apply(data: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, Error> {
	let mut cipher = Aes256Ctr::new_from_slices(key, iv).map_err(|_| Error::BadKey)?;
	let mut out = data.to_vec();
	cipher.apply_keystream(&mut out);
	Ok(out)
}

/// Encrypt plaintext under the raw key; the caller records
/// `bs58::encode(key)` as `rand_key`.
pub fn aes_ctr_encrypt(plain: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, Error> {
	apply(plain, key, iv)
}

/// Decrypt a replica given the committed `rand_key`.
pub fn aes_ctr_decrypt(cipher: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Vec<u8>, Error> {
	apply(cipher, key, iv)
}

/// Decrypt with the on-chain record alone.
pub fn decrypt_with_rand_key(data: &[u8], rand_key: &str) -> Result<Vec<u8>, Error> {
	let key = bs58::decode(rand_key)
		.into_vec()
		.map_err(|_| Error::BadRandKey)?;
	let iv = iv_from_rand_key(rand_key)?;
	aes_ctr_decrypt(data, &key, &iv)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn replica_round_trips_through_rand_key() {
		let key = random_key();
		let rand_key = bs58::encode(key.as_bytes()).into_string();
		let iv = iv_from_rand_key(&rand_key).unwrap();

		let plain = b"the same plaintext, a different key per replica".to_vec();
		let sealed = aes_ctr_encrypt(&plain, key.as_bytes(), &iv).unwrap();
		assert_ne!(sealed, plain);

		let opened = decrypt_with_rand_key(&sealed, &rand_key).unwrap();
		assert_eq!(opened, plain);
	}

	#[test]
	fn distinct_keys_give_distinct_ciphertexts() {
		let plain = vec![0u8; 128];
		let k1 = random_key();
		let k2 = random_key();
		let r1 = bs58::encode(k1.as_bytes()).into_string();
		let r2 = bs58::encode(k2.as_bytes()).into_string();
		let c1 =
			aes_ctr_encrypt(&plain, k1.as_bytes(), &iv_from_rand_key(&r1).unwrap()).unwrap();
		let c2 =
			aes_ctr_encrypt(&plain, k2.as_bytes(), &iv_from_rand_key(&r2).unwrap()).unwrap();
		assert_ne!(c1, c2);
	}

	#[test]
	fn wrong_key_length_is_rejected() {
		assert_eq!(
			apply(b"x", b"short", &[0u8; 16]).unwrap_err(),
			Error::BadKey
		);
	}
}
