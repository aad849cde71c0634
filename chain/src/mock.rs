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

//! In-memory chain node used by the test suites. It answers the same RPC
//! methods as the real node, so the gateway's decode path is exercised
//! unchanged.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::{json, Value};

use cess_core::{
	AccountId, FileMeta, FileState, FillerMeta, MinerInfo, ProofRecord, ProofResult,
	SchedulerEntry, UserSpace,
};
use cess_util::Mutex;

use crate::error::Error;
use crate::gateway::NodeRpc;

/// Everything the mock chain knows.
#[derive(Default)]
pub struct MockState {
	/// Registered miners
	pub miners: BTreeMap<AccountId, MinerInfo>,
	/// Files by id
	pub file_metas: BTreeMap<String, FileMeta>,
	/// Proofs waiting for verification
	pub proofs: Vec<ProofRecord>,
	/// Batches submitted by the verifier
	pub proof_result_batches: Vec<Vec<ProofResult>>,
	/// Filler metadata submissions
	pub filler_metas: Vec<(u64, Vec<FillerMeta>)>,
	/// Registered schedulers
	pub schedulers: Vec<SchedulerEntry>,
	/// Account balances in pico
	pub balances: BTreeMap<AccountId, u128>,
	/// Purchased space per user
	pub spaces: BTreeMap<AccountId, UserSpace>,
	/// Replica ids reported for recovery
	pub recovery_reports: Vec<String>,
	/// Whether the node reports itself as syncing
	pub syncing: bool,
	/// Block heights reported by system_syncState
	pub blocks: (u64, u64),
}

/// The in-memory node.
pub struct MockNode {
	state: Mutex<MockState>,
	fail_next: AtomicU32,
	tx_counter: AtomicU32,
}

impl MockNode {
	/// A reachable, synced, empty chain.
	pub fn new() -> MockNode {
		MockNode {
			state: Mutex::new(MockState {
				blocks: (100, 100),
				..MockState::default()
			}),
			fail_next: AtomicU32::new(0),
			tx_counter: AtomicU32::new(0),
		}
	}

	/// Make the next `n` requests fail as unavailable.
	pub fn fail_next(&self, n: u32) {
		self.fail_next.store(n, Ordering::SeqCst);
	}

	/// Register a miner.
	pub fn add_miner(&self, acc: AccountId, info: MinerInfo) {
		self.state.lock().miners.insert(acc, info);
	}

	/// Drop a miner from the set.
	pub fn remove_miner(&self, acc: &AccountId) {
		self.state.lock().miners.remove(acc);
	}

	/// Seed a file meta record.
	pub fn set_file_meta(&self, file_id: &str, meta: FileMeta) {
		self.state.lock().file_metas.insert(file_id.to_string(), meta);
	}

	/// Queue a proof for the verifier.
	pub fn push_proof(&self, proof: ProofRecord) {
		self.state.lock().proofs.push(proof);
	}

	/// Seed a balance.
	pub fn set_balance(&self, acc: AccountId, pico: u128) {
		self.state.lock().balances.insert(acc, pico);
	}

	/// Seed purchased space.
	pub fn set_user_space(&self, acc: AccountId, space: UserSpace) {
		self.state.lock().spaces.insert(acc, space);
	}

	/// Flip the syncing flag.
	pub fn set_syncing(&self, syncing: bool) {
		self.state.lock().syncing = syncing;
	}

	/// Inspect the accumulated state.
	pub fn with_state<T>(&self, f: impl FnOnce(&MockState) -> T) -> T {
		f(&self.state.lock())
	}

	fn tx_hash(&self) -> String {
		format!("0xmock{:08x}", self.tx_counter.fetch_add(1, Ordering::SeqCst))
	}

	fn param_account(params: &Value) -> Result<AccountId, Error> {
		serde_json::from_value(params.get(0).cloned().unwrap_or(Value::Null))
			.map_err(|e| Error::Rpc(format!("bad account param: {}", e)))
	}

	fn param_str(params: &Value) -> Result<String, Error> {
		params
			.get(0)
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| Error::Rpc("missing string param".to_string()))
	}
}

impl NodeRpc for MockNode {
	fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
		loop {
			let left = self.fail_next.load(Ordering::SeqCst);
			if left == 0 {
				break;
			}
			if self
				.fail_next
				.compare_exchange(left, left - 1, Ordering::SeqCst, Ordering::SeqCst)
				.is_ok()
			{
				return Err(Error::Unavailable);
			}
		}

		let mut state = self.state.lock();
		let out = match method {
			"system_health" => json!({ "peers": 1, "isSyncing": state.syncing }),
			"system_syncState" => {
				json!({ "currentBlock": state.blocks.0, "highestBlock": state.blocks.1 })
			}
			"scheduler_minerSet" => {
				let accs: Vec<&AccountId> = state.miners.keys().collect();
				serde_json::to_value(accs)?
			}
			"scheduler_miner" => {
				let acc = Self::param_account(&params)?;
				match state.miners.get(&acc) {
					Some(info) => serde_json::to_value(info)?,
					None => Value::Null,
				}
			}
			"scheduler_fileMeta" => {
				let fid = Self::param_str(&params)?;
				match state.file_metas.get(&fid) {
					Some(meta) => serde_json::to_value(meta)?,
					None => Value::Null,
				}
			}
			"scheduler_proofs" => serde_json::to_value(&state.proofs)?,
			"scheduler_submitProofResults" => {
				let batch: Vec<ProofResult> =
					serde_json::from_value(params["results"].clone())?;
				state.proofs.retain(|p| {
					!batch
						.iter()
						.any(|r| r.miner == p.miner && r.file_id == p.challenge.file_id)
				});
				state.proof_result_batches.push(batch);
				Value::String(self.tx_hash())
			}
			"scheduler_submitFileMeta" => {
				let fid = params["file_id"]
					.as_str()
					.ok_or_else(|| Error::Rpc("missing file_id".to_string()))?
					.to_string();
				let size = params["size"].as_u64().unwrap_or(0);
				let replicas = serde_json::from_value(params["replicas"].clone())?;
				let entry = state.file_metas.entry(fid).or_insert(FileMeta {
					size,
					state: FileState::Pending,
					users: vec![],
					names: vec![],
					replicas: vec![],
				});
				entry.size = size;
				entry.state = FileState::Active;
				entry.replicas = replicas;
				Value::String(self.tx_hash())
			}
			"scheduler_submitFillerMeta" => {
				let miner_id = params["miner_id"].as_u64().unwrap_or(0);
				let fillers: Vec<FillerMeta> =
					serde_json::from_value(params["fillers"].clone())?;
				state.filler_metas.push((miner_id, fillers));
				Value::String(self.tx_hash())
			}
			"scheduler_register" => {
				let entry: SchedulerEntry = SchedulerEntry {
					endpoint: params["endpoint"].as_str().unwrap_or("").to_string(),
					stash: serde_json::from_value(params["stash"].clone())
						.unwrap_or(AccountId([0u8; 32])),
					controller: serde_json::from_value(params["controller"].clone())?,
				};
				state.schedulers.push(entry);
				Value::String(self.tx_hash())
			}
			"scheduler_updateEndpoint" => {
				let controller: AccountId =
					serde_json::from_value(params["controller"].clone())?;
				let endpoint = params["endpoint"].as_str().unwrap_or("").to_string();
				for entry in state.schedulers.iter_mut() {
					if entry.controller == controller {
						entry.endpoint = endpoint.clone();
					}
				}
				Value::String(self.tx_hash())
			}
			"scheduler_schedulerSet" => serde_json::to_value(&state.schedulers)?,
			"scheduler_balance" => {
				let acc = Self::param_account(&params)?;
				match state.balances.get(&acc) {
					Some(pico) => Value::String(pico.to_string()),
					None => Value::String("0".to_string()),
				}
			}
			"scheduler_userSpace" => {
				let acc = Self::param_account(&params)?;
				match state.spaces.get(&acc) {
					Some(space) => serde_json::to_value(space)?,
					None => Value::Null,
				}
			}
			"scheduler_reportRecovery" => {
				let replica = params["replica_id"].as_str().unwrap_or("").to_string();
				state.recovery_reports.push(replica);
				Value::String(self.tx_hash())
			}
			other => return Err(Error::Rpc(format!("unknown method {}", other))),
		};
		Ok(out)
	}

	fn reconnect(&self) -> Result<(), Error> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stash_defaults_do_not_mask_submits() {
		let node = MockNode::new();
		let res = node.request(
			"scheduler_register",
			json!({
				"controller": AccountId([3u8; 32]),
				"stash": AccountId([4u8; 32]),
				"endpoint": "ep",
			}),
		);
		assert!(res.is_ok());
		assert_eq!(node.with_state(|s| s.schedulers.len()), 1);
	}

	#[test]
	fn fail_next_counts_down() {
		let node = MockNode::new();
		node.fail_next(1);
		assert!(node.request("system_health", json!([])).is_err());
		assert!(node.request("system_health", json!([])).is_ok());
	}
}
