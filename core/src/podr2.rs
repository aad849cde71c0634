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

//! PoDR2 tag generation and proof verification.
//!
//! A file is cut into `n` blocks of `block_size` bytes, every block into
//! sectors of `scan_size` bytes. SigGen authenticates block `i` as
//!
//! ```text
//! σ_i = f(i) + Σ_j α_j · m_{i,j}        (mod p)
//! ```
//!
//! with per-sector keys `α_j` and a keyed PRF `f`. A prover answering a
//! challenge `{(i, v_i)}` returns `μ_j = Σ_i v_i · m_{i,j}` and
//! `σ = Σ_i v_i · σ_i`; the verifier, holding the keys, checks
//!
//! ```text
//! σ = Σ_i v_i · f(i) + Σ_j α_j · μ_j    (mod p)
//! ```
//!
//! which holds exactly when the prover still derives the μ-vector from the
//! authenticated data. The scheduler both tags and verifies, so private
//! keys never leave the node; all arithmetic is over a 256-bit prime
//! field.

use std::fmt;

use num::bigint::BigUint;
use num::Zero;
use rand::{thread_rng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Upper bound on sectors per block the key set supports.
const MAX_SECTORS: usize = 16;

/// Field modulus, the 256-bit prime 2^256 - 189.
fn modulus() -> BigUint {
	BigUint::parse_bytes(
		b"ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff43",
		16,
	)
	.expect("prime constant")
}

/// PoDR2 errors.
#[derive(Debug, PartialEq)]
pub enum Error {
	/// No data to tag
	EmptyData,
	/// block_size or scan_size unusable
	BadBlockSize,
	/// More sectors per block than the key set supports
	TooManySectors(usize),
	/// Challenge indices and random vectors differ in length
	LengthMismatch,
	/// A challenged block index is 0 or beyond the tag's block count
	BadBlockIndex(u64),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::EmptyData => write!(f, "nothing to tag"),
			Error::BadBlockSize => write!(f, "unusable block or scan size"),
			Error::TooManySectors(s) => write!(f, "{} sectors exceed the key set", s),
			Error::LengthMismatch => {
				write!(f, "challenge indices and random vectors differ in length")
			}
			Error::BadBlockIndex(i) => write!(f, "challenged block {} out of range", i),
		}
	}
}

/// File tag produced once per replica.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Tag {
	/// Name the tag binds to (the replica id bytes)
	#[serde(with = "crate::b64::bytes")]
	pub name: Vec<u8>,
	/// Number of blocks
	pub n: u64,
	/// Per-file randomizer folded into the PRF
	#[serde(with = "crate::b64::bytes")]
	pub u: Vec<u8>,
	/// Keyed MAC over (name, n, u)
	#[serde(with = "crate::b64::bytes")]
	pub signature: Vec<u8>,
}

/// A tag together with its σ-vector, as shipped to the holding miner.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct TagInfo {
	/// The file tag
	pub t: Tag,
	/// One σ per block
	#[serde(with = "crate::b64::byte_vecs")]
	pub sigmas: Vec<Vec<u8>>,
}

/// One challenged block: 1-based index and random coefficient.
#[derive(Clone, PartialEq, Debug)]
pub struct QElement {
	/// Block index, 1-based
	pub i: u64,
	/// Random coefficient bytes
	pub v: Vec<u8>,
}

/// The scheduler's tagging/verification key set.
pub struct Keys {
	alphas: Vec<BigUint>,
	prf_key: [u8; 32],
	p: BigUint,
}

impl Keys {
	/// Deterministic key set from a seed; the supervisor derives it from
	/// the controller identity so tags stay verifiable across restarts.
	pub fn from_seed(seed: &[u8]) -> Keys {
		let p = modulus();
		let mut prf_key = [0u8; 32];
		let mut hasher = Sha256::new();
		hasher.update(b"cess-podr2-prf");
		hasher.update(seed);
		prf_key.copy_from_slice(&hasher.finalize());

		let mut alphas = Vec::with_capacity(MAX_SECTORS);
		for j in 0..MAX_SECTORS {
			let mut hasher = Sha256::new();
			hasher.update(b"cess-podr2-alpha");
			hasher.update(&[j as u8]);
			hasher.update(seed);
			alphas.push(BigUint::from_bytes_be(&hasher.finalize()) % &p);
		}
		Keys {
			alphas,
			prf_key,
			p,
		}
	}

	/// Throwaway key set.
	pub fn random() -> Keys {
		let mut seed = [0u8; 32];
		thread_rng().fill_bytes(&mut seed);
		Keys::from_seed(&seed)
	}

	fn prf(&self, u: &[u8], name: &[u8], index: u64) -> BigUint {
		let mut hasher = Sha256::new();
		hasher.update(&self.prf_key);
		hasher.update(u);
		hasher.update(name);
		hasher.update(&index.to_be_bytes());
		BigUint::from_bytes_be(&hasher.finalize()) % &self.p
	}

	fn tag_mac(&self, name: &[u8], n: u64, u: &[u8]) -> Vec<u8> {
		let mut hasher = Sha256::new();
		hasher.update(&self.prf_key);
		hasher.update(name);
		hasher.update(&n.to_be_bytes());
		hasher.update(u);
		hasher.finalize().to_vec()
	}

	/// Produce the tag and σ-vector for one replica.
	pub fn sig_gen(
		&self,
		name: &[u8],
		data: &[u8],
		block_size: u64,
		scan_size: u64,
	) -> Result<TagInfo, Error> {
		if data.is_empty() {
			return Err(Error::EmptyData);
		}
		if block_size == 0 || scan_size == 0 || scan_size > block_size {
			return Err(Error::BadBlockSize);
		}
		let sectors = sectors_per_block(block_size, scan_size);
		if sectors > self.alphas.len() {
			return Err(Error::TooManySectors(sectors));
		}

		let n = (data.len() as u64 + block_size - 1) / block_size;
		let mut u = vec![0u8; 32];
		thread_rng().fill_bytes(&mut u);

		let mut sigmas = Vec::with_capacity(n as usize);
		for i in 1..=n {
			let mut sigma = self.prf(&u, name, i);
			for (j, alpha) in self.alphas.iter().take(sectors).enumerate() {
				let m = sector_value(data, block_size, scan_size, i, j, &self.p);
				sigma = (sigma + alpha * m) % &self.p;
			}
			sigmas.push(sigma.to_bytes_be());
		}

		let signature = self.tag_mac(name, n, &u);
		Ok(TagInfo {
			t: Tag {
				name: name.to_vec(),
				n,
				u,
				signature,
			},
			sigmas,
		})
	}

	/// Check a proof against a tag. `mu` carries one entry per sector,
	/// `sigma` the aggregated σ.
	pub fn verify(&self, t: &Tag, q: &[QElement], mu: &[Vec<u8>], sigma: &[u8]) -> bool {
		if q.is_empty() || mu.is_empty() || mu.len() > self.alphas.len() {
			return false;
		}
		if self.tag_mac(&t.name, t.n, &t.u) != t.signature {
			return false;
		}
		for el in q {
			if el.i == 0 || el.i > t.n {
				return false;
			}
		}

		let mut rhs = BigUint::zero();
		for el in q {
			let v = BigUint::from_bytes_be(&el.v) % &self.p;
			rhs = (rhs + v * self.prf(&t.u, &t.name, el.i)) % &self.p;
		}
		for (alpha, m) in self.alphas.iter().zip(mu.iter()) {
			let m = BigUint::from_bytes_be(m) % &self.p;
			rhs = (rhs + alpha * m) % &self.p;
		}

		BigUint::from_bytes_be(sigma) % &self.p == rhs
	}
}

fn sectors_per_block(block_size: u64, scan_size: u64) -> usize {
	((block_size + scan_size - 1) / scan_size) as usize
}

fn sector_value(
	data: &[u8],
	block_size: u64,
	scan_size: u64,
	block: u64,
	sector: usize,
	p: &BigUint,
) -> BigUint {
	let start = (block - 1) * block_size + sector as u64 * scan_size;
	if start >= data.len() as u64 {
		return BigUint::zero();
	}
	let end = std::cmp::min(start + scan_size, std::cmp::min(block * block_size, data.len() as u64));
	BigUint::from_bytes_be(&data[start as usize..end as usize]) % p
}

/// The block/scan size table for user replicas: tiny files are one block,
/// anything larger is cut into sixteenths scanned in eighths, capped at
/// u32::MAX.
pub fn block_size_for(file_size: u64) -> (u64, u64) {
	if file_size < crate::constants::SIZE_1KIB {
		return (file_size, file_size);
	}
	if file_size > u64::from(u32::max_value()) {
		let block = u64::from(u32::max_value());
		return (block, block / 8);
	}
	let block = file_size / 16;
	(block, block / 8)
}

/// Build the q-slice from the on-chain challenge: one coefficient per
/// challenged block, lengths must agree.
pub fn challenge_from_chain(
	block_list: &[u32],
	random: &[Vec<u8>],
) -> Result<Vec<QElement>, Error> {
	if block_list.len() != random.len() {
		return Err(Error::LengthMismatch);
	}
	let mut q = Vec::with_capacity(block_list.len());
	for (idx, v) in block_list.iter().zip(random.iter()) {
		if *idx == 0 {
			return Err(Error::BadBlockIndex(0));
		}
		q.push(QElement {
			i: u64::from(*idx),
			v: v.clone(),
		});
	}
	Ok(q)
}

/// Random challenge over a tag's blocks, for self-checks and tests.
pub fn challenge(n: u64) -> Vec<QElement> {
	let mut rng = thread_rng();
	let count = rng.gen_range(1, n + 1);
	let mut picked = Vec::with_capacity(count as usize);
	while (picked.len() as u64) < count {
		let i = rng.gen_range(1, n + 1);
		if picked.iter().any(|el: &QElement| el.i == i) {
			continue;
		}
		let mut v = vec![0u8; 32];
		rng.fill_bytes(&mut v);
		picked.push(QElement { i, v });
	}
	picked
}

/// Honest prover: derive the μ-vector and aggregated σ from the data and
/// the stored σ-vector. The reference for what miners return, and the
/// other half of the verifier's tests.
pub fn gen_proof(
	data: &[u8],
	block_size: u64,
	scan_size: u64,
	sigmas: &[Vec<u8>],
	q: &[QElement],
) -> Result<(Vec<Vec<u8>>, Vec<u8>), Error> {
	if block_size == 0 || scan_size == 0 || scan_size > block_size {
		return Err(Error::BadBlockSize);
	}
	let p = modulus();
	let sectors = sectors_per_block(block_size, scan_size);

	let mut mu = vec![BigUint::zero(); sectors];
	let mut sigma = BigUint::zero();
	for el in q {
		if el.i == 0 || el.i > sigmas.len() as u64 {
			return Err(Error::BadBlockIndex(el.i));
		}
		let v = BigUint::from_bytes_be(&el.v) % &p;
		for (j, m) in mu.iter_mut().enumerate() {
			let sector = sector_value(data, block_size, scan_size, el.i, j, &p);
			*m = (&*m + &v * sector) % &p;
		}
		let s = BigUint::from_bytes_be(&sigmas[el.i as usize - 1]) % &p;
		sigma = (sigma + v * s) % &p;
	}

	Ok((
		mu.into_iter().map(|m| m.to_bytes_be()).collect(),
		sigma.to_bytes_be(),
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_data(len: usize) -> Vec<u8> {
		(0..len).map(|i| (i * 31 % 251) as u8).collect()
	}

	#[test]
	fn tag_proof_verify_round_trip() {
		let keys = Keys::from_seed(b"test seed");
		let data = sample_data(4096);
		let (block, scan) = block_size_for(data.len() as u64);
		let tag = keys.sig_gen(b"file.d0", &data, block, scan).unwrap();
		assert_eq!(tag.sigmas.len() as u64, tag.t.n);

		let q = challenge(tag.t.n);
		let (mu, sigma) = gen_proof(&data, block, scan, &tag.sigmas, &q).unwrap();
		assert!(keys.verify(&tag.t, &q, &mu, &sigma));
	}

	#[test]
	fn tampered_data_fails_verification() {
		let keys = Keys::from_seed(b"test seed");
		let mut data = sample_data(8192);
		let (block, scan) = block_size_for(data.len() as u64);
		let tag = keys.sig_gen(b"file.d1", &data, block, scan).unwrap();

		data[100] ^= 0xff;
		// challenge every block so the flip is always covered
		let q: Vec<QElement> = (1..=tag.t.n)
			.map(|i| QElement {
				i,
				v: vec![3u8; 8],
			})
			.collect();
		let (mu, sigma) = gen_proof(&data, block, scan, &tag.sigmas, &q).unwrap();
		assert!(!keys.verify(&tag.t, &q, &mu, &sigma));
	}

	#[test]
	fn tampered_sigma_or_mu_fails_verification() {
		let keys = Keys::from_seed(b"another seed");
		let data = sample_data(2048);
		let (block, scan) = block_size_for(data.len() as u64);
		let tag = keys.sig_gen(b"file.d2", &data, block, scan).unwrap();
		let q = challenge(tag.t.n);
		let (mu, sigma) = gen_proof(&data, block, scan, &tag.sigmas, &q).unwrap();

		let mut bad_sigma = sigma.clone();
		bad_sigma[0] ^= 1;
		assert!(!keys.verify(&tag.t, &q, &mu, &bad_sigma));

		let mut bad_mu = mu.clone();
		bad_mu[0] = vec![0u8; 4];
		assert!(!keys.verify(&tag.t, &q, &bad_mu, &sigma));
	}

	#[test]
	fn foreign_tag_is_rejected() {
		let keys = Keys::from_seed(b"ours");
		let other = Keys::from_seed(b"theirs");
		let data = sample_data(1500);
		let (block, scan) = block_size_for(data.len() as u64);
		let tag = other.sig_gen(b"file.d3", &data, block, scan).unwrap();
		let q = challenge(tag.t.n);
		let (mu, sigma) = gen_proof(&data, block, scan, &tag.sigmas, &q).unwrap();
		assert!(other.verify(&tag.t, &q, &mu, &sigma));
		assert!(!keys.verify(&tag.t, &q, &mu, &sigma));
	}

	#[test]
	fn sub_kilobyte_files_are_a_single_block() {
		let keys = Keys::random();
		let data = sample_data(600);
		let (block, scan) = block_size_for(data.len() as u64);
		assert_eq!((block, scan), (600, 600));
		let tag = keys.sig_gen(b"tiny", &data, block, scan).unwrap();
		assert_eq!(tag.t.n, 1);
		assert_eq!(tag.sigmas.len(), 1);
	}

	#[test]
	fn size_table_matches_contract() {
		assert_eq!(block_size_for(100), (100, 100));
		assert_eq!(block_size_for(16 * 1024), (1024, 128));
		let huge = 8 * 1024 * 1024 * 1024u64;
		let cap = u64::from(u32::max_value());
		assert_eq!(block_size_for(huge), (cap, cap / 8));
	}

	#[test]
	fn chain_challenge_requires_matching_lengths() {
		assert_eq!(
			challenge_from_chain(&[1, 2], &[vec![1u8]]),
			Err(Error::LengthMismatch)
		);
		let q = challenge_from_chain(&[1, 2], &[vec![1u8], vec![2u8]]).unwrap();
		assert_eq!(q.len(), 2);
		assert_eq!(q[1].i, 2);
		assert_eq!(
			challenge_from_chain(&[0], &[vec![1u8]]),
			Err(Error::BadBlockIndex(0))
		);
	}

	#[test]
	fn filler_sizing_stays_within_key_set() {
		// filler: 8 MiB blocks scanned at 1 MiB
		assert_eq!(sectors_per_block(8 * 1024 * 1024, 1024 * 1024), 8);
		// user files: sixteenths scanned in eighths, truncation may add one
		let (block, scan) = block_size_for(1001 * 16);
		assert!(sectors_per_block(block, scan) <= MAX_SECTORS);
	}
}
