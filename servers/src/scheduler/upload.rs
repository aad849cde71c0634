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

//! The placement engine. A validated assembly is cut into redundancy
//! shards; every shard becomes one encrypted replica, placed on a freshly
//! selected miner by its own worker, tagged, and finally committed as one
//! file-meta transaction. Failed shards requeue for up to three outer
//! rounds; the commit itself retries for as long as it takes.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{thread_rng, Rng};

use cess_core::constants::{
	RPC_FILE_BUFFER, RPC_METHOD_MINER_WRITEFILE, RPC_METHOD_MINER_WRITETAG, RPC_SERVICE_MINER,
};
use cess_core::{coding, encrypt, podr2, AccountId, BlockEntry, ReplicaDescriptor};
use cess_rpc::client::{Client, CALL_TIMEOUT, DIAL_TIMEOUT};
use cess_rpc::msg::{encode, PutFileToBucket, PutTagToBucket};

use crate::common::types::Error;
use crate::scheduler::miners::MinerEntry;
use crate::scheduler::server::Node;
use crate::scheduler::sig_gen_task;

/// Outer rounds a failed shard may requeue for.
const MAX_ROUNDS: u32 = 3;
/// Consecutive transfer failures tolerated before switching miners.
const MAX_TRANSFER_FAILS: u32 = 5;
/// Miner selection attempts before a shard is declared unplaceable.
const MAX_SELECT_ATTEMPTS: u32 = 100;

/// One shard waiting for placement.
struct ShardJob {
	index: usize,
	replica_id: String,
	rand_key: String,
	path: PathBuf,
	size: u64,
}

/// Spawn the background task placing one uploaded file.
pub fn spawn_store(node: Arc<Node>, file_id: String, assembly: PathBuf, owner: AccountId) {
	let name = format!("upfile-{}", &file_id[..std::cmp::min(12, file_id.len())]);
	let file_id_for_thread = file_id.clone();
	let spawn = thread::Builder::new().name(name).spawn(move || {
		if let Err(e) = store_file(&node, &file_id_for_thread, &assembly, owner) {
			error!("[{}] placement failed: {}", file_id_for_thread, e);
		}
	});
	if let Err(e) = spawn {
		error!("[{}] failed to spawn placement task: {}", file_id, e);
	}
}

/// Full placement pipeline for one validated assembly.
pub fn store_file(
	node: &Arc<Node>,
	file_id: &str,
	assembly: &PathBuf,
	owner: AccountId,
) -> Result<(), Error> {
	info!(
		"[{}] start the file backup management process for {}",
		file_id, owner
	);
	let plain = fs::read(assembly)?;
	let file_size = plain.len() as u64;

	let (shards, layout) = coding::encode(&plain)?;
	drop(plain);
	info!(
		"[{}] coded into {} data and {} parity shards",
		file_id, layout.data, layout.parity
	);

	// every shard becomes one replica, sealed under its own key
	let dir = node.dirs.file_dir(file_id);
	let mut jobs = Vec::with_capacity(shards.len());
	for (index, shard) in shards.into_iter().enumerate() {
		let key = encrypt::random_key();
		let rand_key = bs58::encode(key.as_bytes()).into_string();
		let iv = encrypt::iv_from_rand_key(&rand_key)?;
		let sealed = encrypt::aes_ctr_encrypt(&shard, key.as_bytes(), &iv)?;

		let replica_id = format!("{}.d{}", file_id, index);
		let path = dir.join(&replica_id);
		fs::write(&path, &sealed)?;
		// key marker next to the replica, mirroring the chain record
		let marker = dir.join(format!("{}.k{}", rand_key, index));
		let _ = fs::File::create(&marker);

		jobs.push(ShardJob {
			index,
			replica_id,
			rand_key,
			path,
			size: sealed.len() as u64,
		});
	}

	// per-shard workers, joined over a channel; failures requeue
	let mut descriptors: Vec<Option<ReplicaDescriptor>> = vec![None; jobs.len()];
	let mut pending = jobs;
	let mut round = 0;
	while !pending.is_empty() {
		round += 1;
		if round > MAX_ROUNDS {
			return Err(Error::Placement(format!(
				"{} shards still unplaced after {} rounds",
				pending.len(),
				MAX_ROUNDS
			)));
		}

		let (tx, rx) = mpsc::channel();
		let in_flight = pending.len();
		for job in pending.drain(..) {
			let tx = tx.clone();
			let node = node.clone();
			let file_id = file_id.to_string();
			let spawned = thread::Builder::new()
				.name(format!("shard-{}", job.index))
				.spawn(move || {
					let outcome = place_shard(&node, &file_id, &job);
					let _ = tx.send((job, outcome));
				});
			if let Err(e) = spawned {
				return Err(Error::Io(e));
			}
		}
		drop(tx);

		for _ in 0..in_flight {
			let (job, outcome) = rx
				.recv()
				.map_err(|_| Error::Placement("shard worker lost".to_string()))?;
			match outcome {
				Ok(descriptor) => {
					info!("[{}] shard {} stored successfully", file_id, job.index);
					descriptors[job.index] = Some(descriptor);
				}
				Err(e) => {
					warn!("[{}] shard {} retries next round: {}", file_id, job.index, e);
					pending.push(job);
				}
			}
		}
	}

	let mut replicas: Vec<ReplicaDescriptor> =
		descriptors.into_iter().map(|d| d.expect("all placed")).collect();

	// the committed endpoint must be the directory's view at commit time
	for replica in replicas.iter_mut() {
		if let Some(entry) = node.miners.get(&replica.miner_acc) {
			replica.miner_endpoint = entry.endpoint;
		}
	}

	// the chain is the source of truth; keep trying until it accepts
	loop {
		match node.chain.submit_file_meta(file_id, file_size, &replicas) {
			Ok(tx) => {
				info!("[{}] file meta on chain: {}", file_id, tx);
				break;
			}
			Err(e) => {
				warn!("[{}] file meta commit failed: {}", file_id, e);
				if node.stop.load(Ordering::Relaxed) {
					return Err(Error::Chain(e));
				}
				let secs = thread_rng().gen_range(3u64, 16);
				thread::sleep(Duration::from_secs(secs));
			}
		}
	}

	// staging cleanup; the serving cache (`.u`) is rebuilt on demand
	let _ = fs::remove_file(assembly);
	for replica in replicas.iter() {
		let _ = fs::remove_file(node.dirs.file_dir(file_id).join(&replica.replica_id));
	}
	if let Ok(entries) = fs::read_dir(node.dirs.file_dir(file_id)) {
		for entry in entries.flatten() {
			if entry.file_name().to_string_lossy().contains(".k") {
				let _ = fs::remove_file(entry.path());
			}
		}
	}
	Ok(())
}

/// Place one sealed shard: pick a miner, stream the chunks, generate and
/// push the tag, report the descriptor.
fn place_shard(node: &Arc<Node>, file_id: &str, job: &ShardJob) -> Result<ReplicaDescriptor, Error> {
	let data = fs::read(&job.path)?;
	let mut rejected: HashSet<AccountId> = HashSet::new();

	let mut attempts = 0;
	'select: loop {
		attempts += 1;
		if attempts > MAX_SELECT_ATTEMPTS {
			return Err(Error::Placement(format!(
				"{} gave up after {} selection attempts",
				job.replica_id, attempts - 1
			)));
		}
		if node.stop.load(Ordering::Relaxed) {
			return Err(Error::Placement("shutting down".to_string()));
		}

		let entry = match pick_miner(node, &rejected, job.size) {
			Some(entry) => entry,
			None => {
				// exhausted this snapshot; start over unless the chain
				// set itself is empty
				rejected.clear();
				if node.miners.snapshot().is_empty() {
					let _ = node.miners.refresh_from(&node.chain, &node.kv);
					if node.miners.snapshot().is_empty() {
						return Err(Error::Placement("no miners available".to_string()));
					}
				}
				continue;
			}
		};

		// declared capacity below used space marks a corrupt record
		if entry.power < entry.space {
			warn!(
				"[{}] miner {} reports power {} below space {}",
				file_id, entry.acc, entry.power, entry.space
			);
			rejected.insert(entry.acc);
			node.miners.report_failed(entry.acc);
			continue;
		}

		let client = match Client::dial(&entry.endpoint, DIAL_TIMEOUT) {
			Ok(c) => c,
			Err(e) => {
				debug!("[{}] dial {} failed: {}", file_id, entry.endpoint, e);
				rejected.insert(entry.acc);
				node.miners.report_failed(entry.acc);
				continue;
			}
		};
		info!("[{}] {} connected to {}", file_id, job.replica_id, entry.endpoint);

		// sequential chunk stream; a flaky transfer switches miners
		let block_total = ((job.size + RPC_FILE_BUFFER - 1) / RPC_FILE_BUFFER) as u32;
		let mut failures = 0u32;
		let mut block_index = 0u32;
		while block_index < block_total {
			let start = block_index as usize * RPC_FILE_BUFFER as usize;
			let end = std::cmp::min(start + RPC_FILE_BUFFER as usize, data.len());
			let body = encode(&PutFileToBucket {
				file_id: job.replica_id.clone(),
				block_total,
				block_index,
				block_size: (end - start) as u32,
				data: data[start..end].to_vec(),
			})?;
			match client.call_data(
				RPC_SERVICE_MINER,
				RPC_METHOD_MINER_WRITEFILE,
				body,
				CALL_TIMEOUT,
			) {
				Ok(_) => {
					failures = 0;
					block_index += 1;
				}
				Err(e) => {
					failures += 1;
					if failures >= MAX_TRANSFER_FAILS {
						warn!(
							"[{}] transfer to {} failed {} times: {}",
							file_id, entry.endpoint, failures, e
						);
						rejected.insert(entry.acc);
						node.miners.report_failed(entry.acc);
						continue 'select;
					}
					thread::sleep(Duration::from_secs(thread_rng().gen_range(1u64, 4)));
				}
			}
		}

		// tag over the sealed shard, pushed on the same connection
		let (block_size, scan_size) = podr2::block_size_for(job.size);
		let tag = sig_gen_task(
			node.podr2.clone(),
			job.replica_id.clone().into_bytes(),
			data.clone(),
			block_size,
			scan_size,
			None,
		)?;
		let tag_bytes = serde_json::to_vec(&tag)
			.map_err(|e| Error::Placement(format!("tag serialization: {}", e)))?;
		fs::write(node.dirs.tag_path(&job.replica_id), &tag_bytes)?;

		let body = encode(&PutTagToBucket {
			file_id: job.replica_id.clone(),
			tag: tag.clone(),
		})?;
		if let Err(e) = client.call_data(
			RPC_SERVICE_MINER,
			RPC_METHOD_MINER_WRITETAG,
			body,
			CALL_TIMEOUT,
		) {
			warn!("[{}] tag push to {} failed: {}", file_id, entry.endpoint, e);
			rejected.insert(entry.acc);
			node.miners.report_failed(entry.acc);
			continue;
		}

		let block_count = tag.sigmas.len() as u32;
		let mut block_table = Vec::with_capacity(block_count as usize);
		for i in 0..block_count {
			let remaining = job.size - u64::from(i) * block_size;
			block_table.push(BlockEntry {
				index: i + 1,
				size: std::cmp::min(block_size, remaining) as u32,
			});
		}

		return Ok(ReplicaDescriptor {
			replica_id: job.replica_id.clone(),
			rand_key: job.rand_key.clone(),
			miner_id: entry.peer_id,
			miner_acc: entry.acc,
			miner_endpoint: entry.endpoint,
			scan_size: scan_size as u32,
			block_count,
			block_table,
		});
	}
}

/// Random pick among positive miners with strictly more free space than
/// the shard needs, skipping the worker's own rejects.
fn pick_miner(node: &Arc<Node>, rejected: &HashSet<AccountId>, size: u64) -> Option<MinerEntry> {
	let candidates: Vec<MinerEntry> = node
		.miners
		.snapshot()
		.into_iter()
		.filter(|e| !rejected.contains(&e.acc) && e.free > size)
		.collect();
	if candidates.is_empty() {
		return None;
	}
	let pick = thread_rng().gen_range(0, candidates.len());
	Some(candidates[pick].clone())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chunk_arithmetic_covers_the_tail() {
		let size = 5 * 1024 * 1024u64; // 2 full blocks and one tail
		let total = ((size + RPC_FILE_BUFFER - 1) / RPC_FILE_BUFFER) as u32;
		assert_eq!(total, 3);
		let last_start = 2 * RPC_FILE_BUFFER;
		assert_eq!(size - last_start, 1024 * 1024);
	}
}
