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

//! The upload authorization ledger: one live authorization per client
//! key, one unique token per authorization, strictly monotonic chunk
//! indices. A sweeper removes expired entries and doubles as the node's
//! balance watchdog.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use cess_core::constants::{AUTH_EXPIRY_SECS, MINIMUM_BALANCE, TOKEN_LEN};
use cess_core::AccountId;
use cess_util::{random_code, Mutex};

use crate::scheduler::server::Node;

/// Why a chunk was refused.
#[derive(Debug, PartialEq)]
pub enum AuthError {
	/// Token unknown
	NoSuchToken,
	/// Authorization expired
	Expired,
	/// Chunk index not the next expected one, or out of range
	BadIndex { expected: u32 },
}

/// One in-flight upload authorization.
#[derive(Clone, Debug)]
pub struct Authorization {
	/// Client key the upload is bound to
	pub pubkey: AccountId,
	/// The minted token
	pub token: String,
	/// File being uploaded
	pub file_id: String,
	/// Display name
	pub file_name: String,
	/// Chunks the client announced
	pub block_total: u32,
	/// Chunks accepted so far
	pub up_count: u32,
	/// Bytes accepted so far
	pub received_bytes: u64,
	/// Last activity
	pub mtime: i64,
	/// Hard expiry
	pub expires_at: i64,
}

/// Snapshot handed to the writefile handler after a chunk is admitted.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkTicket {
	/// File being uploaded
	pub file_id: String,
	/// Display name
	pub file_name: String,
	/// Owning client key
	pub pubkey: AccountId,
	/// Chunks the client announced
	pub block_total: u32,
	/// Whether this chunk completes the upload
	pub is_final: bool,
}

/// The ledger itself; a single mutex-guarded map.
pub struct AuthLedger {
	entries: Mutex<HashMap<AccountId, Authorization>>,
}

impl AuthLedger {
	/// Empty ledger.
	pub fn new() -> AuthLedger {
		AuthLedger {
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// The live token of a client key, if any. Expired entries are
	/// dropped on the way.
	pub fn existing_token(&self, pubkey: &AccountId) -> Option<String> {
		let now = Utc::now().timestamp();
		let mut entries = self.entries.lock();
		match entries.get(pubkey) {
			Some(auth) if auth.expires_at > now => Some(auth.token.clone()),
			Some(_) => {
				entries.remove(pubkey);
				None
			}
			None => None,
		}
	}

	/// Mint a token and record the authorization, replacing any expired
	/// leftover for the same key.
	pub fn grant(
		&self,
		pubkey: AccountId,
		file_id: &str,
		file_name: &str,
		block_total: u32,
	) -> String {
		let now = Utc::now().timestamp();
		let mut entries = self.entries.lock();
		let mut token = random_code(TOKEN_LEN);
		while entries.values().any(|a| a.token == token) {
			token = random_code(TOKEN_LEN);
		}
		entries.insert(
			pubkey,
			Authorization {
				pubkey,
				token: token.clone(),
				file_id: file_id.to_string(),
				file_name: file_name.to_string(),
				block_total,
				up_count: 0,
				received_bytes: 0,
				mtime: now,
				expires_at: now + AUTH_EXPIRY_SECS,
			},
		);
		token
	}

	/// Admit one chunk: the token must be live and `index` must be
	/// exactly the next one. The final chunk removes the authorization.
	pub fn advance(
		&self,
		token: &str,
		index: u32,
		bytes: u64,
	) -> Result<ChunkTicket, AuthError> {
		let now = Utc::now().timestamp();
		let mut entries = self.entries.lock();
		let key = match entries.values().find(|a| a.token == token) {
			Some(auth) => auth.pubkey,
			None => return Err(AuthError::NoSuchToken),
		};
		let auth = entries.get_mut(&key).expect("keyed by the map itself");
		if auth.expires_at <= now {
			entries.remove(&key);
			return Err(AuthError::Expired);
		}
		if index != auth.up_count + 1 || index > auth.block_total {
			return Err(AuthError::BadIndex {
				expected: auth.up_count + 1,
			});
		}
		auth.up_count = index;
		auth.received_bytes += bytes;
		auth.mtime = now;
		let ticket = ChunkTicket {
			file_id: auth.file_id.clone(),
			file_name: auth.file_name.clone(),
			pubkey: auth.pubkey,
			block_total: auth.block_total,
			is_final: index == auth.block_total,
		};
		if ticket.is_final {
			entries.remove(&key);
		}
		Ok(ticket)
	}

	/// Drop the authorization carrying this token, if any.
	pub fn revoke(&self, token: &str) {
		let mut entries = self.entries.lock();
		if let Some(key) = entries
			.values()
			.find(|a| a.token == token)
			.map(|a| a.pubkey)
		{
			entries.remove(&key);
		}
	}

	/// Remove expired entries, returning how many were dropped.
	pub fn sweep(&self) -> usize {
		let now = Utc::now().timestamp();
		let mut entries = self.entries.lock();
		let before = entries.len();
		entries.retain(|_, a| a.expires_at > now);
		before - entries.len()
	}

	/// Live authorizations.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}
}

/// Sweeper task: expiry sweep every minute; every fifth pass logs miner
/// stats and enforces the minimum controller balance.
pub fn start_sweeper(node: Arc<Node>) -> thread::JoinHandle<()> {
	thread::Builder::new()
		.name("auth-sweeper".to_string())
		.spawn(move || {
			info!("authorization sweeper started");
			let mut pass = 0u8;
			loop {
				for _ in 0..60 {
					if node.stop.load(Ordering::Relaxed) {
						return;
					}
					thread::sleep(Duration::from_secs(1));
				}
				let dropped = node.auth.sweep();
				if dropped > 0 {
					info!("swept {} expired upload authorizations", dropped);
				}
				pass = pass.wrapping_add(1);
				if pass % 5 == 0 {
					info!(
						"miners cached: {}, blacklisted: {:?}",
						node.miners.len(),
						node.miners.blacklisted()
					);
					match node.chain.account_balance(&node.chain.account()) {
						Ok(balance) if balance < MINIMUM_BALANCE => {
							error!(
								"controller balance {} below minimum {}, exiting",
								balance, MINIMUM_BALANCE
							);
							std::process::exit(1);
						}
						Ok(_) => {}
						Err(e) => warn!("balance check failed: {}", e),
					}
				}
			}
		})
		.expect("spawn auth-sweeper")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ledger_with_grant() -> (AuthLedger, String) {
		let ledger = AuthLedger::new();
		let token = ledger.grant(AccountId([1u8; 32]), "fid0001", "a.txt", 3);
		(ledger, token)
	}

	#[test]
	fn one_authorization_per_key() {
		let (ledger, token) = ledger_with_grant();
		assert_eq!(
			ledger.existing_token(&AccountId([1u8; 32])),
			Some(token.clone())
		);
		assert_eq!(ledger.existing_token(&AccountId([2u8; 32])), None);
		assert_eq!(ledger.len(), 1);
		assert_eq!(token.len(), TOKEN_LEN);
	}

	#[test]
	fn chunks_must_arrive_in_order() {
		let (ledger, token) = ledger_with_grant();
		assert_eq!(
			ledger.advance(&token, 2, 10),
			Err(AuthError::BadIndex { expected: 1 })
		);
		let t1 = ledger.advance(&token, 1, 10).unwrap();
		assert!(!t1.is_final);
		// replay of the same index is refused
		assert_eq!(
			ledger.advance(&token, 1, 10),
			Err(AuthError::BadIndex { expected: 2 })
		);
		ledger.advance(&token, 2, 10).unwrap();
		let t3 = ledger.advance(&token, 3, 10).unwrap();
		assert!(t3.is_final);
		// the final chunk consumed the authorization
		assert_eq!(ledger.advance(&token, 4, 10), Err(AuthError::NoSuchToken));
		assert_eq!(ledger.len(), 0);
	}

	#[test]
	fn index_beyond_block_total_is_refused() {
		let ledger = AuthLedger::new();
		let token = ledger.grant(AccountId([3u8; 32]), "fid0002", "b.bin", 1);
		let t = ledger.advance(&token, 1, 5).unwrap();
		assert!(t.is_final);
	}

	#[test]
	fn unknown_tokens_are_forbidden() {
		let (ledger, _token) = ledger_with_grant();
		assert_eq!(
			ledger.advance("nottherightone", 1, 1),
			Err(AuthError::NoSuchToken)
		);
	}

	#[test]
	fn tokens_are_unique_across_live_entries() {
		let ledger = AuthLedger::new();
		let mut seen = std::collections::HashSet::new();
		for i in 0..32u8 {
			let token = ledger.grant(AccountId([i; 32]), "fid", "n", 1);
			assert!(seen.insert(token));
		}
	}
}
