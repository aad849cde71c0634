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

//! The data model shared between the chain gateway, the placement engine
//! and the verifier.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte account, printable and serialized in its base58 form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
	/// Raw key bytes.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Parse the base58 form, requiring exactly 32 decoded bytes.
	pub fn from_base58(s: &str) -> Result<AccountId, String> {
		let bytes = bs58::decode(s)
			.into_vec()
			.map_err(|e| format!("bad base58 account: {}", e))?;
		AccountId::from_slice(&bytes)
	}

	/// Build from a byte slice, requiring exactly 32 bytes.
	pub fn from_slice(bytes: &[u8]) -> Result<AccountId, String> {
		if bytes.len() != 32 {
			return Err(format!("account must be 32 bytes, got {}", bytes.len()));
		}
		let mut out = [0u8; 32];
		out.copy_from_slice(bytes);
		Ok(AccountId(out))
	}
}

impl fmt::Display for AccountId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", bs58::encode(&self.0).into_string())
	}
}

impl FromStr for AccountId {
	type Err = String;
	fn from_str(s: &str) -> Result<AccountId, String> {
		AccountId::from_base58(s)
	}
}

impl Serialize for AccountId {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for AccountId {
	fn deserialize<D: Deserializer<'de>>(d: D) -> Result<AccountId, D::Error> {
		let s = String::deserialize(d)?;
		AccountId::from_base58(&s).map_err(D::Error::custom)
	}
}

/// The hex digest a file id must end with, produced by the chunked digest
/// procedure over the plaintext.
pub fn embedded_hash(file_id: &str) -> Option<&str> {
	let bytes = file_id.as_bytes();
	if bytes.len() < 64 + 4 {
		return None;
	}
	let tail = &bytes[bytes.len() - 64..];
	if tail.iter().all(|b| b.is_ascii_hexdigit()) {
		// all-ASCII tail, valid UTF-8 by construction
		std::str::from_utf8(tail).ok()
	} else {
		None
	}
}

/// State a miner advertises on chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinerState {
	/// Accepting data
	Positive,
	/// Leaving the network
	Exit,
	/// Temporarily barred
	Frozen,
}

/// On-chain miner record, as read by the gateway.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MinerInfo {
	/// Numeric peer id
	pub peer_id: u64,
	/// base58 of `ip:port`
	pub ip: String,
	/// Declared capacity in bytes
	pub power: u64,
	/// Used space in bytes
	pub space: u64,
	/// Advertised state
	pub state: MinerState,
}

/// State of a file on chain.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
	/// All replicas placed and committed
	Active,
	/// Upload in flight or incomplete
	Pending,
	/// Replica loss detected, recovery running
	Recovering,
}

/// One entry of a replica's committed block table.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockEntry {
	/// 1-based block index
	pub index: u32,
	/// Size of this block in bytes
	pub size: u32,
}

/// Placement result for one replica, committed on chain.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
	/// `<file-id>.dN`
	pub replica_id: String,
	/// base58 of the AES key the replica is encrypted under
	pub rand_key: String,
	/// Numeric id of the holding miner
	pub miner_id: u64,
	/// Account of the holding miner
	pub miner_acc: AccountId,
	/// Endpoint of the holding miner at commit time
	pub miner_endpoint: String,
	/// PoDR2 scan size used for the tag
	pub scan_size: u32,
	/// Number of PoDR2 blocks
	pub block_count: u32,
	/// Per-block sizes
	pub block_table: Vec<BlockEntry>,
}

/// File metadata, read side.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FileMeta {
	/// Plaintext size in bytes
	pub size: u64,
	/// Lifecycle state
	pub state: FileState,
	/// Owning accounts
	pub users: Vec<AccountId>,
	/// File names as uploaded
	pub names: Vec<String>,
	/// Replica placements
	pub replicas: Vec<ReplicaDescriptor>,
}

/// Challenge subject is a user file.
pub const FILE_TYPE_USER: u8 = 1;
/// Challenge subject is a filler file.
pub const FILE_TYPE_FILLER: u8 = 2;

/// A challenge published on chain.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ChallengeInfo {
	/// Size of the challenged file
	pub file_size: u64,
	/// `FILE_TYPE_USER` or `FILE_TYPE_FILLER`
	pub file_type: u8,
	/// 1-based indices of the challenged blocks
	pub block_list: Vec<u32>,
	/// Subject file id
	pub file_id: String,
	/// Random coefficient per challenged block
	#[serde(with = "crate::b64::byte_vecs")]
	pub random: Vec<Vec<u8>>,
}

/// A miner's proof waiting for verification.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ProofRecord {
	/// Prover account
	pub miner: AccountId,
	/// The challenge this answers
	pub challenge: ChallengeInfo,
	/// μ-vector, one entry per sector
	#[serde(with = "crate::b64::byte_vecs")]
	pub mu: Vec<Vec<u8>>,
	/// Aggregated σ
	#[serde(with = "crate::b64::bytes")]
	pub sigma: Vec<u8>,
}

/// Outcome of verifying one proof.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ProofResult {
	/// Prover account
	pub miner: AccountId,
	/// Subject file id
	pub file_id: String,
	/// Whether the proof verified
	pub result: bool,
}

/// Metadata of a generated filler file, committed on the requesting
/// miner's behalf.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FillerMeta {
	/// Filler file id
	pub file_id: String,
	/// Whole-file hex SHA-256
	pub hash: String,
	/// Exact size in bytes
	pub size: u64,
	/// Owning miner account
	pub acc: AccountId,
	/// Numeric miner id
	pub miner_id: u64,
	/// PoDR2 block count
	pub block_num: u32,
	/// PoDR2 block size
	pub block_size: u32,
	/// PoDR2 scan size
	pub scan_size: u32,
}

/// A registered scheduler, as listed on chain.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SchedulerEntry {
	/// base58 of `ip:port`
	pub endpoint: String,
	/// Stash account
	pub stash: AccountId,
	/// Controller account
	pub controller: AccountId,
}

/// A user's purchased space, read side.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct UserSpace {
	/// Total purchased bytes
	pub purchased: u64,
	/// Bytes already used
	pub used: u64,
	/// Bytes still available
	pub remaining: u64,
}

/// Chain sync progress.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct SyncStatus {
	/// Whether the node is caught up
	pub synced: bool,
	/// Blocks left when syncing
	pub behind_blocks: u64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn account_base58_round_trip() {
		let acc = AccountId([7u8; 32]);
		let s = acc.to_string();
		assert_eq!(AccountId::from_base58(&s).unwrap(), acc);
	}

	#[test]
	fn account_rejects_wrong_length() {
		assert!(AccountId::from_slice(&[1u8; 31]).is_err());
		assert!(AccountId::from_base58("3yZe7d").is_err());
	}

	#[test]
	fn embedded_hash_needs_64_hex_tail() {
		let digest = "ab".repeat(32);
		let fid = format!("0004{}", digest);
		assert_eq!(embedded_hash(&fid), Some(digest.as_str()));
		assert_eq!(embedded_hash("too-short"), None);
		let bad = format!("0004{}zz", "ab".repeat(31));
		assert_eq!(embedded_hash(&bad), None);
	}

	#[test]
	fn account_serde_is_base58_string() {
		let acc = AccountId([1u8; 32]);
		let json = serde_json::to_string(&acc).unwrap();
		assert_eq!(json, format!("\"{}\"", acc));
		let back: AccountId = serde_json::from_str(&json).unwrap();
		assert_eq!(back, acc);
	}
}
