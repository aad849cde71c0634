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

//! Typed facade over the node RPC. Callers see synchronous methods with
//! the scheduler's data model; transient failures are retried here with
//! exponential backoff, and a background keepalive maintains the
//! process-wide chain status flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use cess_core::constants::MAX_PROOF_BATCH;
use cess_core::{
	AccountId, FileMeta, FillerMeta, MinerInfo, ProofRecord, ProofResult, ReplicaDescriptor,
	SchedulerEntry, SyncStatus, UserSpace,
};

use crate::error::Error;
use crate::keys::ControllerKeys;

/// The black-box lower-level chain RPC. One implementation speaks to the
/// real node (`client::WsClient`), one is the in-memory test double
/// (`mock::MockNode`).
pub trait NodeRpc: Send + Sync {
	/// Issue one RPC and return its `result` value.
	fn request(&self, method: &str, params: Value) -> Result<Value, Error>;

	/// Tear down and re-establish the underlying session.
	fn reconnect(&self) -> Result<(), Error>;
}

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_SECS: u64 = 3;
const RETRY_CAP_SECS: u64 = 30;
const KEEPALIVE_SECS: u64 = 25;

/// Typed chain gateway.
pub struct Gateway {
	node: Arc<dyn NodeRpc>,
	keys: ControllerKeys,
	chain_ok: AtomicBool,
	retry_base: Duration,
}

impl Gateway {
	/// Wrap a node session with the controller identity.
	pub fn new(node: Arc<dyn NodeRpc>, keys: ControllerKeys) -> Gateway {
		Gateway::with_retry_base(node, keys, Duration::from_secs(RETRY_BASE_SECS))
	}

	/// As `new`, with a shortened backoff base. Meant for tests that
	/// exercise the retry path.
	pub fn with_retry_base(
		node: Arc<dyn NodeRpc>,
		keys: ControllerKeys,
		retry_base: Duration,
	) -> Gateway {
		Gateway {
			node,
			keys,
			chain_ok: AtomicBool::new(true),
			retry_base,
		}
	}

	/// Whether the keepalive currently considers the chain reachable.
	pub fn chain_ok(&self) -> bool {
		self.chain_ok.load(Ordering::Relaxed)
	}

	/// Controller account.
	pub fn account(&self) -> AccountId {
		self.keys.account()
	}

	/// Printable controller address.
	pub fn address(&self) -> String {
		self.keys.address()
	}

	/// Controller key material (PoDR2 seed derivation, payload signing).
	pub fn keys(&self) -> &ControllerKeys {
		&self.keys
	}

	fn retry<T, F>(&self, what: &str, f: F) -> Result<T, Error>
	where
		F: Fn() -> Result<T, Error>,
	{
		let mut backoff = self.retry_base;
		let cap = Duration::from_secs(RETRY_CAP_SECS);
		let mut last = Error::Unavailable;
		for attempt in 1..=RETRY_ATTEMPTS {
			match f() {
				Ok(v) => return Ok(v),
				Err(e) if e.is_transient() => {
					warn!("{} attempt {}/{} failed: {}", what, attempt, RETRY_ATTEMPTS, e);
					last = e;
					if attempt < RETRY_ATTEMPTS {
						thread::sleep(backoff);
						backoff = std::cmp::min(backoff * 2, cap);
					}
				}
				Err(e) => return Err(e),
			}
		}
		Err(last)
	}

	fn call<T: serde::de::DeserializeOwned>(
		&self,
		method: &'static str,
		params: Value,
	) -> Result<T, Error> {
		self.retry(method, || {
			let value = self.node.request(method, params.clone())?;
			if value.is_null() {
				return Err(Error::NotFound);
			}
			Ok(serde_json::from_value(value)?)
		})
	}

	/// Accounts of every registered storage miner.
	pub fn get_miner_set(&self) -> Result<Vec<AccountId>, Error> {
		self.call("scheduler_minerSet", json!([]))
	}

	/// Details of one miner.
	pub fn get_miner(&self, acc: &AccountId) -> Result<MinerInfo, Error> {
		self.call("scheduler_miner", json!([acc]))
	}

	/// File metadata, `Err(NotFound)` when the file is unknown.
	pub fn get_file_meta(&self, file_id: &str) -> Result<FileMeta, Error> {
		self.call("scheduler_fileMeta", json!([file_id]))
	}

	/// All proofs waiting for verification.
	pub fn get_proofs(&self) -> Result<Vec<ProofRecord>, Error> {
		self.call("scheduler_proofs", json!([]))
	}

	/// Submit one batch of verification results, at most `MAX_PROOF_BATCH`.
	pub fn submit_proof_results(&self, batch: &[ProofResult]) -> Result<String, Error> {
		debug_assert!(batch.len() <= MAX_PROOF_BATCH);
		self.call(
			"scheduler_submitProofResults",
			json!({ "signer": self.account(), "results": batch }),
		)
	}

	/// Commit the metadata of a fully placed user file.
	pub fn submit_file_meta(
		&self,
		file_id: &str,
		size: u64,
		replicas: &[ReplicaDescriptor],
	) -> Result<String, Error> {
		self.call(
			"scheduler_submitFileMeta",
			json!({
				"signer": self.account(),
				"file_id": file_id,
				"size": size,
				"replicas": replicas,
			}),
		)
	}

	/// Commit filler metadata on a miner's behalf.
	pub fn submit_filler_meta(
		&self,
		miner_id: u64,
		fillers: &[FillerMeta],
	) -> Result<String, Error> {
		self.call(
			"scheduler_submitFillerMeta",
			json!({
				"signer": self.account(),
				"miner_id": miner_id,
				"fillers": fillers,
			}),
		)
	}

	/// Register this scheduler.
	pub fn register(&self, stash: &str, endpoint: &str) -> Result<String, Error> {
		self.call(
			"scheduler_register",
			json!({
				"controller": self.account(),
				"stash": stash,
				"endpoint": endpoint,
			}),
		)
	}

	/// Update the registered endpoint.
	pub fn update_endpoint(&self, endpoint: &str) -> Result<String, Error> {
		self.call(
			"scheduler_updateEndpoint",
			json!({ "controller": self.account(), "endpoint": endpoint }),
		)
	}

	/// Every registered scheduler.
	pub fn scheduler_set(&self) -> Result<Vec<SchedulerEntry>, Error> {
		self.call("scheduler_schedulerSet", json!([]))
	}

	/// Free balance of an account, in pico.
	pub fn account_balance(&self, acc: &AccountId) -> Result<u128, Error> {
		let raw: String = self.call("scheduler_balance", json!([acc]))?;
		raw.parse::<u128>()
			.map_err(|e| Error::Rpc(format!("bad balance value: {}", e)))
	}

	/// A user's purchased space.
	pub fn user_space(&self, acc: &AccountId) -> Result<UserSpace, Error> {
		self.call("scheduler_userSpace", json!([acc]))
	}

	/// Report a replica as lost so the chain schedules recovery.
	pub fn report_recovery(&self, replica_id: &str) -> Result<String, Error> {
		self.call(
			"scheduler_reportRecovery",
			json!({ "signer": self.account(), "replica_id": replica_id }),
		)
	}

	/// Sync progress of the node.
	pub fn sync_status(&self) -> Result<SyncStatus, Error> {
		self.retry("sync_status", || {
			let health = self.node.request("system_health", json!([]))?;
			let syncing = health
				.get("isSyncing")
				.and_then(Value::as_bool)
				.unwrap_or(true);
			let state = self.node.request("system_syncState", json!([]))?;
			let current = state
				.get("currentBlock")
				.and_then(Value::as_u64)
				.unwrap_or(0);
			let highest = state
				.get("highestBlock")
				.and_then(Value::as_u64)
				.unwrap_or(current);
			Ok(SyncStatus {
				synced: !syncing,
				behind_blocks: highest.saturating_sub(current),
			})
		})
	}

	fn ping(&self) -> Result<(), Error> {
		let health = self.node.request("system_health", json!([]))?;
		let peers = health.get("peers").and_then(Value::as_u64).unwrap_or(0);
		if peers == 0 {
			return Err(Error::Unavailable);
		}
		Ok(())
	}

	/// Keepalive loop: ping every 25 s, reconnect after two consecutive
	/// failures, maintain the chain status flag. Runs until `stop`.
	pub fn start_keepalive(
		gateway: Arc<Gateway>,
		stop: Arc<AtomicBool>,
	) -> thread::JoinHandle<()> {
		thread::Builder::new()
			.name("chain-keepalive".to_string())
			.spawn(move || {
				let mut failures = 0u32;
				loop {
					if stop.load(Ordering::Relaxed) {
						break;
					}
					match gateway.ping() {
						Ok(_) => {
							if !gateway.chain_ok() {
								info!("chain is reachable again");
							}
							failures = 0;
							gateway.chain_ok.store(true, Ordering::Relaxed);
						}
						Err(e) => {
							failures += 1;
							warn!("chain keepalive failed ({}): {}", failures, e);
							if failures >= 2 {
								gateway.chain_ok.store(false, Ordering::Relaxed);
								if let Err(e) = gateway.node.reconnect() {
									warn!("chain reconnect failed: {}", e);
								}
							}
						}
					}
					thread::sleep(Duration::from_secs(KEEPALIVE_SECS));
				}
			})
			.expect("spawn chain-keepalive")
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::MockNode;
	use cess_core::MinerState;

	fn gateway(node: Arc<MockNode>) -> Gateway {
		let keys = ControllerKeys::from_mnemonic("gateway test mnemonic").unwrap();
		Gateway::with_retry_base(node, keys, Duration::from_millis(1))
	}

	#[test]
	fn reads_decode_into_typed_values() {
		let node = Arc::new(MockNode::new());
		let acc = AccountId([9u8; 32]);
		node.add_miner(
			acc,
			MinerInfo {
				peer_id: 1,
				ip: bs58::encode("127.0.0.1:15001").into_string(),
				power: 1 << 30,
				space: 0,
				state: MinerState::Positive,
			},
		);
		let gw = gateway(node);
		assert_eq!(gw.get_miner_set().unwrap(), vec![acc]);
		let miner = gw.get_miner(&acc).unwrap();
		assert_eq!(miner.peer_id, 1);
		assert!(matches!(gw.get_miner(&AccountId([1u8; 32])), Err(Error::NotFound)));
	}

	#[test]
	fn transient_failures_are_retried() {
		let node = Arc::new(MockNode::new());
		node.set_balance(AccountId([2u8; 32]), 77);
		node.fail_next(2); // under the 3-attempt budget
		let gw = gateway(node);
		assert_eq!(gw.account_balance(&AccountId([2u8; 32])).unwrap(), 77);
	}

	#[test]
	fn missing_file_meta_is_not_retried_as_unavailable() {
		let node = Arc::new(MockNode::new());
		let gw = gateway(node);
		assert!(matches!(gw.get_file_meta("nope"), Err(Error::NotFound)));
	}
}
