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

//! Miner directory cache. A refresh loop mirrors the on-chain miner set
//! every ten minutes; lookups only ever read the last snapshot. The
//! placement engine reports failing miners into an ephemeral blacklist
//! that lives until the next refresh epoch.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use cess_chain::Gateway;
use cess_core::{AccountId, MinerState};
use cess_util::{Mutex, RwLock};

use crate::common::types::Error;
use crate::scheduler::cache::KvCache;
use crate::scheduler::server::Node;

/// Seconds between refresh epochs.
const REFRESH_SECS: u64 = 600;
/// Poll interval while the chain is unreachable.
const CHAIN_WAIT_SECS: u64 = 6;

/// One cached miner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerEntry {
	/// Miner account
	pub acc: AccountId,
	/// Numeric peer id
	pub peer_id: u64,
	/// Decoded `ip:port`
	pub endpoint: String,
	/// Declared capacity in bytes
	pub power: u64,
	/// Used space in bytes
	pub space: u64,
	/// power − space
	pub free: u64,
	/// Unix time of the refresh that produced this entry
	pub refreshed_at: i64,
}

/// The process-wide miner directory.
pub struct MinerCache {
	entries: RwLock<HashMap<AccountId, MinerEntry>>,
	by_id: RwLock<HashMap<u64, AccountId>>,
	ips: RwLock<HashSet<IpAddr>>,
	blacklist: Mutex<HashSet<AccountId>>,
}

/// Decode the on-chain endpoint: base58 of `ip:port`, stray spaces
/// stripped.
pub fn decode_endpoint(encoded: &str) -> Option<String> {
	let bytes = bs58::decode(encoded.trim()).into_vec().ok()?;
	let text: String = String::from_utf8(bytes).ok()?.replace(' ', "");
	let (host, port) = text.rsplit_once(':')?;
	if host.is_empty() || port.parse::<u16>().is_err() {
		return None;
	}
	Some(text)
}

impl MinerCache {
	/// Empty cache.
	pub fn new() -> MinerCache {
		MinerCache {
			entries: RwLock::new(HashMap::new()),
			by_id: RwLock::new(HashMap::new()),
			ips: RwLock::new(HashSet::new()),
			blacklist: Mutex::new(HashSet::new()),
		}
	}

	/// One refresh epoch: mirror the chain's miner set, evict everything
	/// not `positive`, rebuild the address index, clear the blacklist.
	/// Entries are also persisted to the KV cache so lookups survive a
	/// restart.
	pub fn refresh_from(&self, chain: &Gateway, kv: &KvCache) -> Result<usize, Error> {
		let set = chain.get_miner_set()?;
		let now = Utc::now().timestamp();
		let mut fresh: HashMap<AccountId, MinerEntry> = HashMap::new();

		for acc in set {
			let info = match chain.get_miner(&acc) {
				Ok(info) => info,
				Err(e) => {
					debug!("miner {} unreadable, skipping: {}", acc, e);
					continue;
				}
			};
			if info.state != MinerState::Positive {
				continue;
			}
			let endpoint = match decode_endpoint(&info.ip) {
				Some(ep) => ep,
				None => {
					warn!("miner {} advertises an undecodable endpoint", acc);
					continue;
				}
			};
			let entry = MinerEntry {
				acc,
				peer_id: info.peer_id,
				endpoint,
				power: info.power,
				space: info.space,
				free: info.power.saturating_sub(info.space),
				refreshed_at: now,
			};
			fresh.insert(acc, entry);
		}

		// persist adds and drops
		{
			let old = self.entries.read();
			for acc in old.keys() {
				if !fresh.contains_key(acc) {
					let _ = kv.delete(&acc.to_string());
				}
			}
		}
		for (acc, entry) in fresh.iter() {
			if let Ok(bytes) = serde_json::to_vec(entry) {
				let _ = kv.put(&acc.to_string(), &bytes);
				let _ = kv.put(&format!("id:{}", entry.peer_id), &bytes);
			}
		}

		let count = fresh.len();
		let mut ips = HashSet::new();
		let mut by_id = HashMap::new();
		for entry in fresh.values() {
			by_id.insert(entry.peer_id, entry.acc);
			if let Some(host) = entry.endpoint.rsplit_once(':').map(|(h, _)| h) {
				if let Ok(ip) = IpAddr::from_str(host) {
					ips.insert(ip);
				}
			}
		}
		*self.entries.write() = fresh;
		*self.by_id.write() = by_id;
		*self.ips.write() = ips;
		self.blacklist.lock().clear();
		Ok(count)
	}

	/// Positive miners of the current snapshot, minus the blacklist.
	pub fn snapshot(&self) -> Vec<MinerEntry> {
		let blacklist = self.blacklist.lock();
		self.entries
			.read()
			.values()
			.filter(|e| !blacklist.contains(&e.acc))
			.cloned()
			.collect()
	}

	/// Lookup by account.
	pub fn get(&self, acc: &AccountId) -> Option<MinerEntry> {
		self.entries.read().get(acc).cloned()
	}

	/// Lookup by numeric peer id.
	pub fn get_by_id(&self, peer_id: u64) -> Option<MinerEntry> {
		let by_id = self.by_id.read();
		let acc = by_id.get(&peer_id)?;
		self.entries.read().get(acc).cloned()
	}

	/// Whether the address belongs to a cached miner; admission control
	/// for the accept loop.
	pub fn known_ip(&self, ip: &IpAddr) -> bool {
		self.ips.read().contains(ip)
	}

	/// Blacklist a miner for the rest of the current refresh epoch.
	pub fn report_failed(&self, acc: AccountId) {
		self.blacklist.lock().insert(acc);
	}

	/// Current blacklist, for the periodic stats log.
	pub fn blacklisted(&self) -> Vec<AccountId> {
		self.blacklist.lock().iter().cloned().collect()
	}

	/// Cached miner count.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}
}

/// Long-lived refresh task.
pub fn start_refresh(node: Arc<Node>) -> thread::JoinHandle<()> {
	thread::Builder::new()
		.name("miner-cache".to_string())
		.spawn(move || {
			info!("miner cache refresh task started");
			loop {
				if node.stop.load(Ordering::Relaxed) {
					break;
				}
				if !node.chain.chain_ok() {
					thread::sleep(Duration::from_secs(CHAIN_WAIT_SECS));
					continue;
				}
				match node.miners.refresh_from(&node.chain, &node.kv) {
					Ok(count) => debug!("miner cache refreshed, {} entries", count),
					Err(e) => warn!("miner cache refresh failed: {}", e),
				}
				// sleep in slices so shutdown stays prompt
				for _ in 0..(REFRESH_SECS / CHAIN_WAIT_SECS) {
					if node.stop.load(Ordering::Relaxed) {
						return;
					}
					thread::sleep(Duration::from_secs(CHAIN_WAIT_SECS));
				}
			}
		})
		.expect("spawn miner-cache")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn endpoint_decoding() {
		let encoded = bs58::encode("192.168.1.5:15001").into_string();
		assert_eq!(
			decode_endpoint(&encoded),
			Some("192.168.1.5:15001".to_string())
		);
		let spaced = bs58::encode("10.0.0.1 :15001").into_string();
		assert_eq!(decode_endpoint(&spaced), Some("10.0.0.1:15001".to_string()));
		assert_eq!(decode_endpoint("!!!not-base58!!!"), None);
		let portless = bs58::encode("10.0.0.1").into_string();
		assert_eq!(decode_endpoint(&portless), None);
	}

	#[test]
	fn blacklist_hides_entries_from_snapshots() {
		let cache = MinerCache::new();
		let acc = AccountId([5u8; 32]);
		cache.entries.write().insert(
			acc,
			MinerEntry {
				acc,
				peer_id: 5,
				endpoint: "127.0.0.1:1".to_string(),
				power: 100,
				space: 0,
				free: 100,
				refreshed_at: 0,
			},
		);
		assert_eq!(cache.snapshot().len(), 1);
		cache.report_failed(acc);
		assert!(cache.snapshot().is_empty());
		assert!(cache.get(&acc).is_some());
	}
}
