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

//! The challenge verifier. Polls the chain for unverified proofs, pulls
//! the matching tag from the holding miner, runs PoDR2 verification and
//! submits results in batches of at most forty.
//!
//! A miner that is no longer in the directory fails its proof outright.
//! A failing or malformed tag fetch passes it instead: transient network
//! trouble on the scheduler's side must not slash a holder.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{thread_rng, Rng};

use cess_core::constants::{
	MAX_PROOF_BATCH, RPC_METHOD_MINER_READTAG, RPC_SERVICE_MINER,
};
use cess_core::podr2::{self, TagInfo};
use cess_core::{ProofRecord, ProofResult};
use cess_rpc::client::{Client, DIAL_TIMEOUT};
use cess_rpc::msg::{encode, ReadTagReq};

use crate::scheduler::server::Node;

/// Poll interval when the proof list is empty.
const IDLE_SECS: u64 = 60;
/// Attempts to fetch a tag from a miner.
const TAG_FETCH_ATTEMPTS: u32 = 3;
/// Deadline for one tag fetch.
const TAG_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-lived verifier task.
pub fn start(node: Arc<Node>) -> thread::JoinHandle<()> {
	thread::Builder::new()
		.name("verify-proofs".to_string())
		.spawn(move || {
			info!("challenge verifier started");
			loop {
				if node.stop.load(Ordering::Relaxed) {
					break;
				}
				match run_cycle(&node) {
					Ok(0) => idle_sleep(&node),
					// something was submitted; poll again right away
					Ok(_) => continue,
					Err(e) => {
						warn!("verification cycle failed: {}", e);
						idle_sleep(&node);
					}
				}
			}
		})
		.expect("spawn verify-proofs")
}

fn idle_sleep(node: &Arc<Node>) {
	for _ in 0..IDLE_SECS {
		if node.stop.load(Ordering::Relaxed) {
			return;
		}
		thread::sleep(Duration::from_secs(1));
	}
}

/// One verification cycle. Returns the number of submitted batches.
pub fn run_cycle(node: &Arc<Node>) -> Result<usize, crate::common::types::Error> {
	let proofs = node.chain.get_proofs()?;
	if proofs.is_empty() {
		return Ok(0);
	}
	info!("verifying {} proofs", proofs.len());

	let mut batches = 0;
	let mut batch: Vec<ProofResult> = Vec::with_capacity(MAX_PROOF_BATCH);
	for proof in proofs.iter() {
		if node.stop.load(Ordering::Relaxed) {
			break;
		}
		let result = verify_one(node, proof);
		batch.push(ProofResult {
			miner: proof.miner,
			file_id: proof.challenge.file_id.clone(),
			result,
		});
		if batch.len() >= MAX_PROOF_BATCH {
			submit_batch(node, &batch);
			batches += 1;
			batch.clear();
		}
	}
	if !batch.is_empty() {
		submit_batch(node, &batch);
		batches += 1;
	}
	Ok(batches)
}

fn verify_one(node: &Arc<Node>, proof: &ProofRecord) -> bool {
	// a miner we no longer know cannot hold the file
	let entry = match node.miners.get(&proof.miner) {
		Some(entry) => entry,
		None => return false,
	};

	// the tag lives with the miner; give it the benefit of the doubt
	// when the fetch itself fails
	let tag = match fetch_tag(node, &entry.endpoint, &proof.challenge.file_id) {
		Some(tag) => tag,
		None => return true,
	};

	let q = match podr2::challenge_from_chain(&proof.challenge.block_list, &proof.challenge.random)
	{
		Ok(q) => q,
		Err(e) => {
			warn!(
				"[{}] malformed challenge ({} blocks, {} vectors): {}",
				proof.challenge.file_id,
				proof.challenge.block_list.len(),
				proof.challenge.random.len(),
				e
			);
			return true;
		}
	};

	node.podr2.verify(&tag.t, &q, &proof.mu, &proof.sigma)
}

fn fetch_tag(node: &Arc<Node>, endpoint: &str, file_id: &str) -> Option<TagInfo> {
	let req = ReadTagReq {
		acc: node.chain.address(),
		file_id: file_id.to_string(),
	};
	let body = encode(&req).ok()?;
	for attempt in 1..=TAG_FETCH_ATTEMPTS {
		let client = match Client::dial(endpoint, DIAL_TIMEOUT) {
			Ok(c) => c,
			Err(e) => {
				debug!("[{}] tag fetch dial {} failed: {}", file_id, endpoint, e);
				continue;
			}
		};
		match client.call_data(
			RPC_SERVICE_MINER,
			RPC_METHOD_MINER_READTAG,
			body.clone(),
			TAG_FETCH_TIMEOUT,
		) {
			Ok(data) => match serde_json::from_slice::<TagInfo>(&data) {
				Ok(tag) => return Some(tag),
				Err(e) => {
					debug!("[{}] miner returned a malformed tag: {}", file_id, e);
					return None;
				}
			},
			Err(e) => {
				debug!(
					"[{}] tag fetch attempt {}/{} failed: {}",
					file_id, attempt, TAG_FETCH_ATTEMPTS, e
				);
			}
		}
		if node.stop.load(Ordering::Relaxed) {
			return None;
		}
	}
	None
}

/// Results are idempotent on chain; keep submitting until accepted.
fn submit_batch(node: &Arc<Node>, batch: &[ProofResult]) {
	loop {
		match node.chain.submit_proof_results(batch) {
			Ok(tx) => {
				info!("proof results submitted ({} records): {}", batch.len(), tx);
				return;
			}
			Err(e) => {
				warn!("proof result submission failed: {}", e);
				if node.stop.load(Ordering::Relaxed) {
					return;
				}
				let secs = thread_rng().gen_range(3u64, 16);
				thread::sleep(Duration::from_secs(secs));
			}
		}
	}
}
