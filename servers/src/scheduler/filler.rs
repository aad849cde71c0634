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

//! The filler engine. Miners pull scheduler-generated space files to back
//! their declared capacity: generate, stream in 512 KiB chunks, tag with
//! PoDR2, and commit the filler metadata on the miner's behalf.

use std::convert::TryFrom;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ed25519_dalek::{PublicKey, Signature, Verifier};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use cess_core::constants::{
	FILLER_BLOCK_SIZE, FILLER_LINE_WIDTH, FILLER_MAX_MB, FILLER_SCAN_SIZE, RPC_SPACE_BUFFER,
	SIZE_1MIB,
};
use cess_core::hash::sha256_hex;
use cess_core::{AccountId, FillerMeta};
use cess_rpc::msg::{encode, RespBody, SpaceFileInfo, SpaceFileReq, SpaceTagInfo, SpaceTagReq, FileBackReq};

use crate::scheduler::miners::MinerEntry;
use crate::scheduler::server::Node;
use crate::scheduler::sig_gen_task;

/// Wall-clock budget for filler tag generation.
const TAG_DEADLINE: Duration = Duration::from_secs(5);

/// Authenticate a filler RPC: the signature must cover the miner id
/// bytes and verify against the cached miner key.
fn authenticate(node: &Arc<Node>, miner_id: u64, sign: &[u8]) -> Result<MinerEntry, RespBody> {
	let entry = match node.miners.get_by_id(miner_id) {
		Some(entry) => Some(entry),
		// fall back to the persisted cache, the refresh may not have run yet
		None => node
			.kv
			.get(&format!("id:{}", miner_id))
			.ok()
			.flatten()
			.and_then(|bytes| serde_json::from_slice(&bytes).ok()),
	};
	let entry: MinerEntry = match entry {
		Some(entry) => entry,
		None => return Err(RespBody::err(404, "Miner not found")),
	};

	let key = match PublicKey::from_bytes(entry.acc.as_bytes()) {
		Ok(key) => key,
		Err(_) => return Err(RespBody::err(500, "Corrupt miner key")),
	};
	let sig = match Signature::try_from(sign) {
		Ok(sig) => sig,
		Err(_) => return Err(RespBody::err(403, "Invalid signature")),
	};
	if key.verify(&miner_id.to_be_bytes(), &sig).is_err() {
		return Err(RespBody::err(403, "Invalid signature"));
	}
	Ok(entry)
}

fn filler_path(node: &Arc<Node>, miner_id: u64, file_id: &str) -> PathBuf {
	node.dirs.filler_dir(miner_id).join(file_id)
}

/// `spacefile`: serve a chunk of an existing filler, or generate a fresh
/// one and serve its first chunk.
pub fn spacefile(node: &Arc<Node>, req: &SpaceFileReq) -> RespBody {
	if req.miner_id == 0 {
		return RespBody::err(400, "Invalid parameter");
	}
	if let Err(resp) = authenticate(node, req.miner_id, &req.sign) {
		return resp;
	}
	let basedir = node.dirs.filler_dir(req.miner_id);
	if let Err(e) = cess_util::file::ensure_dir(&basedir) {
		return RespBody::err(500, &format!("{}", e));
	}

	if !req.file_id.is_empty() {
		let path = filler_path(node, req.miner_id, &req.file_id);
		if let Ok(meta) = fs::metadata(&path) {
			return serve_chunk(&path, &req.file_id, req.block_index, meta.len());
		}
	}

	if req.size_mb == 0 || req.size_mb > FILLER_MAX_MB {
		return RespBody::err(400, "SizeMb up to 32 and not 0");
	}

	let file_id = format!(
		"C{}_{}{}",
		req.miner_id,
		Utc::now().timestamp(),
		thread_rng().gen_range(1000, 10000)
	);
	let path = basedir.join(&file_id);
	if let Err(e) = generate(&path, req.size_mb) {
		let _ = fs::remove_file(&path);
		return RespBody::err(500, &format!("{}", e));
	}
	let size = u64::from(req.size_mb) * SIZE_1MIB;
	info!("[C{}] generated filler {} of {} MiB", req.miner_id, file_id, req.size_mb);
	serve_chunk(&path, &file_id, 0, size)
}

/// Line-oriented random content of exactly `size_mb` MiB.
fn generate(path: &PathBuf, size_mb: u32) -> std::io::Result<()> {
	let lines = u64::from(size_mb) * SIZE_1MIB / FILLER_LINE_WIDTH as u64;
	let file = fs::File::create(path)?;
	let mut writer = std::io::BufWriter::new(file);
	for _ in 0..lines {
		let line: String = thread_rng()
			.sample_iter(&Alphanumeric)
			.take(FILLER_LINE_WIDTH - 1)
			.collect();
		writer.write_all(line.as_bytes())?;
		writer.write_all(b"\n")?;
	}
	writer.flush()?;
	writer.get_ref().sync_all()?;
	Ok(())
}

/// One 512 KiB slice; the last slice also carries the whole-file hash.
fn serve_chunk(path: &PathBuf, file_id: &str, block_index: u32, size: u64) -> RespBody {
	let block_total = (size / RPC_SPACE_BUFFER) as u32;
	if block_index >= block_total {
		return RespBody::err(400, "Invalid block index");
	}
	let content = match fs::read(path) {
		Ok(c) => c,
		Err(e) => return RespBody::err(500, &format!("{}", e)),
	};
	let start = block_index as usize * RPC_SPACE_BUFFER as usize;
	if start >= content.len() {
		return RespBody::err(500, "Filler truncated on disk");
	}
	let end = std::cmp::min(start + RPC_SPACE_BUFFER as usize, content.len());

	let file_hash = if block_index + 1 == block_total {
		sha256_hex(&content)
	} else {
		String::new()
	};

	let info = SpaceFileInfo {
		file_id: file_id.to_string(),
		file_hash,
		block_total,
		block_index,
		data: content[start..end].to_vec(),
	};
	match encode(&info) {
		Ok(bytes) => RespBody::ok(bytes),
		Err(e) => RespBody::err(500, &format!("{}", e)),
	}
}

/// `spacetag`: PoDR2 over a generated filler, 8 MiB blocks scanned at
/// 1 MiB, bounded by the tag deadline.
pub fn spacetag(node: &Arc<Node>, req: &SpaceTagReq) -> RespBody {
	if req.miner_id == 0 || req.file_id.is_empty() {
		return RespBody::err(400, "Invalid parameter");
	}
	if let Err(resp) = authenticate(node, req.miner_id, &req.sign) {
		return resp;
	}
	let path = filler_path(node, req.miner_id, &req.file_id);
	let data = match fs::read(&path) {
		Ok(d) => d,
		Err(_) => return RespBody::err(400, "No such filler"),
	};

	let tag = match sig_gen_task(
		node.podr2.clone(),
		req.file_id.clone().into_bytes(),
		data,
		FILLER_BLOCK_SIZE,
		FILLER_SCAN_SIZE,
		Some(TAG_DEADLINE),
	) {
		Ok(tag) => tag,
		Err(e) => {
			warn!("[C{}] filler tag for {} failed: {}", req.miner_id, req.file_id, e);
			return RespBody::err(500, "unexpected system error");
		}
	};

	if let Ok(bytes) = serde_json::to_vec(&tag) {
		let _ = fs::write(node.dirs.tag_path(&req.file_id), &bytes);
	}

	let info = SpaceTagInfo {
		file_id: req.file_id.clone(),
		tag,
	};
	match encode(&info) {
		Ok(bytes) => RespBody::ok(bytes),
		Err(e) => RespBody::err(500, &format!("{}", e)),
	}
}

/// `fileback`: commit the filler metadata on the miner's behalf, then
/// delete the local file.
pub fn fileback(node: &Arc<Node>, req: &FileBackReq) -> RespBody {
	if req.miner_id == 0 || req.file_id.is_empty() {
		return RespBody::err(400, "Invalid parameter");
	}
	if let Err(resp) = authenticate(node, req.miner_id, &req.sign) {
		return resp;
	}
	let path = filler_path(node, req.miner_id, &req.file_id);
	let content = match fs::read(&path) {
		Ok(c) => c,
		Err(_) => return RespBody::err(400, "No such filler"),
	};

	let hash = sha256_hex(&content);
	if hash != req.file_hash {
		return RespBody::err(400, "Invalid file hash");
	}
	let acc = match AccountId::from_base58(&req.acc) {
		Ok(acc) => acc,
		Err(_) => return RespBody::err(400, "Invalid account"),
	};

	let size = content.len() as u64;
	let mut block_num = (size / FILLER_BLOCK_SIZE) as u32;
	if size % FILLER_BLOCK_SIZE != 0 || block_num == 0 {
		block_num += 1;
	}
	let meta = FillerMeta {
		file_id: req.file_id.clone(),
		hash,
		size,
		acc,
		miner_id: req.miner_id,
		block_num,
		block_size: FILLER_BLOCK_SIZE as u32,
		scan_size: FILLER_SCAN_SIZE as u32,
	};

	match node.chain.submit_filler_meta(req.miner_id, &[meta]) {
		Ok(tx) => {
			let _ = fs::remove_file(&path);
			info!("[C{}] filler {} committed: {}", req.miner_id, req.file_id, tx);
			RespBody {
				code: 200,
				msg: "success".to_string(),
				data: tx.into_bytes(),
			}
		}
		Err(e) => RespBody::err(500, &format!("{}", e)),
	}
}
