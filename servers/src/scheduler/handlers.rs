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

//! The scheduler's RPC service: upload authorization and chunk intake,
//! download serving, the filler methods and tag read-back. Handlers map
//! every failure to a response code; they never take the connection down.

use std::convert::TryFrom;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use ed25519_dalek::{PublicKey, Signature, Verifier};

use cess_chain::Error as ChainError;
use cess_core::constants::{RPC_FILE_BUFFER, RPC_METHOD_MINER_READFILE, RPC_SERVICE_MINER};
use cess_core::hash::file_digest;
use cess_core::{coding, embedded_hash, encrypt, AccountId, FileState};
use cess_rpc::client::{Client, CALL_TIMEOUT, DIAL_TIMEOUT};
use cess_rpc::msg::{
	decode, encode, AuthReq, FileDownloadInfo, FileDownloadReq, FileUploadReq, ReadTagReq,
	RespBody, SpaceFileReq, SpaceTagReq, FileBackReq,
};
use cess_rpc::Service;

use crate::scheduler::auth::AuthError;
use crate::scheduler::filler;
use crate::scheduler::server::Node;
use crate::scheduler::upload;

/// The `wservice` RPC surface.
pub struct WService {
	node: Arc<Node>,
}

impl WService {
	/// Bind the service to the node state.
	pub fn new(node: Arc<Node>) -> WService {
		WService { node }
	}

	fn auth(&self, body: &[u8]) -> RespBody {
		let req: AuthReq = match decode(body) {
			Ok(r) => r,
			Err(_) => return RespBody::err(400, "Bad Request"),
		};
		if !self.node.chain.chain_ok() {
			return RespBody::err(500, "Chain unavailable");
		}
		if req.msg.is_empty() || req.sign.len() < 64 {
			return RespBody::err(400, "Invalid Sign");
		}

		let pubkey = match AccountId::from_slice(&req.pubkey) {
			Ok(acc) => acc,
			Err(_) => return RespBody::err(400, "Invalid PublicKey"),
		};

		// an in-flight upload under the same key reuses its token
		if let Some(token) = self.node.auth.existing_token(&pubkey) {
			return RespBody {
				code: 200,
				msg: "success".to_string(),
				data: token.into_bytes(),
			};
		}

		let verify_key = match PublicKey::from_bytes(pubkey.as_bytes()) {
			Ok(k) => k,
			Err(_) => return RespBody::err(400, "Invalid PublicKey"),
		};
		let signature = match Signature::try_from(&req.sign[..64]) {
			Ok(s) => s,
			Err(_) => return RespBody::err(403, "Authentication failed"),
		};
		if verify_key.verify(&req.msg, &signature).is_err() {
			return RespBody::err(403, "Authentication failed");
		}

		if req.file_size == 0 {
			return RespBody::err(400, "Invalid File Size");
		}
		if req.block_total == 0 {
			return RespBody::err(400, "Invalid parameter");
		}
		if embedded_hash(&req.file_id).is_none() {
			return RespBody::err(400, "Invalid fileid");
		}

		let space = match self.node.chain.user_space(&pubkey) {
			Ok(space) => space,
			Err(e) => return RespBody::err(500, &format!("{}", e)),
		};
		if req.file_size > space.remaining {
			return RespBody::err(403, "Not enough space");
		}

		match self.node.chain.get_file_meta(&req.file_id) {
			Ok(meta) if meta.state == FileState::Active => {
				// already stored; no upload needed
				return RespBody {
					code: 201,
					msg: "success".to_string(),
					data: Vec::new(),
				};
			}
			Ok(_) | Err(ChainError::NotFound) => {}
			Err(e) => return RespBody::err(500, &format!("{}", e)),
		}

		let token =
			self.node
				.auth
				.grant(pubkey, &req.file_id, &req.file_name, req.block_total);
		info!("[{}] upload authorized, {} blocks", req.file_id, req.block_total);
		RespBody {
			code: 200,
			msg: "success".to_string(),
			data: token.into_bytes(),
		}
	}

	fn writefile(&self, body: &[u8]) -> RespBody {
		let req: FileUploadReq = match decode(body) {
			Ok(r) => r,
			Err(_) => return RespBody::err(400, "Bad Request"),
		};
		if req.block_index == 0 || req.data.is_empty() {
			return RespBody::err(400, "Invalid parameter");
		}

		let ticket = match self
			.node
			.auth
			.advance(&req.auth, req.block_index, req.data.len() as u64)
		{
			Ok(t) => t,
			Err(AuthError::NoSuchToken) => return RespBody::err(403, "Forbidden"),
			Err(AuthError::Expired) => return RespBody::err(403, "Authorization expired"),
			Err(AuthError::BadIndex { .. }) => {
				return RespBody::err(400, "Invalid block index")
			}
		};

		let dir = self.node.dirs.file_dir(&ticket.file_id);
		let assembly = dir.join(format!("{}.cess", ticket.file_id));
		let appended = (|| -> std::io::Result<()> {
			if req.block_index == 1 {
				fs::create_dir_all(&dir)?;
				fs::File::create(&assembly)?;
			}
			let mut file = OpenOptions::new().append(true).open(&assembly)?;
			file.write_all(&req.data)?;
			file.sync_all()
		})();
		if let Err(e) = appended {
			error!("[{}] chunk {} append failed: {}", ticket.file_id, req.block_index, e);
			self.node.auth.revoke(&req.auth);
			let _ = fs::remove_file(&assembly);
			return RespBody::err(500, &format!("{}", e));
		}

		if !ticket.is_final {
			debug!("[{}] chunk {} received", ticket.file_id, req.block_index);
			return RespBody::ok(Vec::new());
		}

		info!(
			"[{}] all {} chunks received",
			ticket.file_id, ticket.block_total
		);
		let digest = match file_digest(&assembly) {
			Ok(d) => d,
			Err(e) => {
				let _ = fs::remove_file(&assembly);
				return RespBody::err(500, &format!("{}", e));
			}
		};
		if Some(digest.as_str()) != embedded_hash(&ticket.file_id) {
			let _ = fs::remove_file(&assembly);
			warn!("[{}] assembly digest mismatch", ticket.file_id);
			return RespBody::err(400, "Invalid file hash");
		}

		upload::spawn_store(
			self.node.clone(),
			ticket.file_id.clone(),
			assembly,
			ticket.pubkey,
		);
		RespBody::ok(Vec::new())
	}

	fn readfile(&self, body: &[u8]) -> RespBody {
		let req: FileDownloadReq = match decode(body) {
			Ok(r) => r,
			Err(_) => return RespBody::err(400, "Bad Request"),
		};
		if req.file_id.is_empty() || req.block_index == 0 {
			return RespBody::err(400, "Invalid parameter");
		}

		if req.block_index == 1 {
			let wallet = match AccountId::from_base58(&req.wallet_address) {
				Ok(acc) => acc,
				Err(_) => return RespBody::err(400, "Invalid wallet"),
			};
			match self.node.chain.user_space(&wallet) {
				Ok(space) if space.used > space.purchased => {
					return RespBody::err(403, "Not enough space")
				}
				Ok(_) => {}
				Err(e) => return RespBody::err(500, &format!("{}", e)),
			}
			match self.node.chain.get_file_meta(&req.file_id) {
				Ok(meta) if meta.state != FileState::Active => {
					return RespBody::err(403, "Please download later")
				}
				Ok(_) => {}
				Err(ChainError::NotFound) => return RespBody::err(404, "No such file"),
				Err(e) => return RespBody::err(500, &format!("{}", e)),
			}
		}

		let dir = self.node.dirs.file_dir(&req.file_id);
		let serving = dir.join(format!("{}.u", req.file_id));
		if !serving.is_file() {
			if let Err(resp) = self.build_serving_cache(&req) {
				return resp;
			}
		}

		let content = match fs::read(&serving) {
			Ok(c) => c,
			Err(e) => return RespBody::err(500, &format!("{}", e)),
		};
		let block_total =
			((content.len() as u64 + RPC_FILE_BUFFER - 1) / RPC_FILE_BUFFER) as u32;
		if req.block_index > block_total {
			return RespBody::err(400, "Invalid block index");
		}
		let start = (req.block_index - 1) as usize * RPC_FILE_BUFFER as usize;
		let end = std::cmp::min(start + RPC_FILE_BUFFER as usize, content.len());
		let info = FileDownloadInfo {
			file_id: req.file_id.clone(),
			block_total,
			block_size: (end - start) as u32,
			block_index: req.block_index,
			data: content[start..end].to_vec(),
		};
		match encode(&info) {
			Ok(bytes) => RespBody::ok(bytes),
			Err(e) => RespBody::err(500, &format!("{}", e)),
		}
	}

	/// Restore the plaintext into the `.u` serving cache: gather enough
	/// replicas (local staging first, then the holding miners), decrypt
	/// each under its committed key, reverse the redundancy coding.
	fn build_serving_cache(&self, req: &FileDownloadReq) -> Result<(), RespBody> {
		let meta = match self.node.chain.get_file_meta(&req.file_id) {
			Ok(meta) => meta,
			Err(ChainError::NotFound) => return Err(RespBody::err(404, "No such file")),
			Err(e) => return Err(RespBody::err(500, &format!("{}", e))),
		};
		let (data, parity) = coding::shard_counts(meta.size);
		let shard_size = (meta.size as usize + data - 1) / data;
		let layout = coding::ShardLayout {
			data,
			parity,
			shard_size,
			file_size: meta.size,
		};

		let dir = self.node.dirs.file_dir(&req.file_id);
		if let Err(e) = fs::create_dir_all(&dir) {
			return Err(RespBody::err(500, &format!("{}", e)));
		}

		let mut slots: Vec<Option<Vec<u8>>> = vec![None; layout.total()];
		let mut alive = 0usize;
		for replica in meta.replicas.iter() {
			if alive >= layout.data {
				break;
			}
			let index = match replica
				.replica_id
				.rsplit(".d")
				.next()
				.and_then(|s| s.parse::<usize>().ok())
			{
				Some(i) if i < layout.total() => i,
				_ => continue,
			};
			if slots[index].is_some() {
				continue;
			}

			// staged copy first, then the holding miner
			let local = dir.join(&replica.replica_id);
			let mut sealed = if local.is_file() {
				fs::read(&local).ok()
			} else {
				None
			};
			if sealed.is_none() {
				sealed = fetch_replica(
					&replica.miner_endpoint,
					&replica.replica_id,
					&req.wallet_address,
				);
			}
			let sealed = match sealed {
				Some(s) => s,
				None => {
					self.report_lost(&replica.replica_id);
					continue;
				}
			};
			match encrypt::decrypt_with_rand_key(&sealed, &replica.rand_key) {
				Ok(shard) if shard.len() == layout.shard_size => {
					slots[index] = Some(shard);
					alive += 1;
				}
				Ok(_) => {
					debug!("[{}] replica {} has a bad length", req.file_id, index);
					self.report_lost(&replica.replica_id);
				}
				Err(e) => {
					debug!("[{}] replica {} decrypt failed: {}", req.file_id, index, e);
					self.report_lost(&replica.replica_id);
				}
			}
		}

		let plain = match coding::restore(slots, &layout) {
			Ok(p) => p,
			Err(coding::Error::NotEnoughShards) => {
				return Err(RespBody::err(500, "No replicas reachable"))
			}
			Err(e) => return Err(RespBody::err(500, &format!("{}", e))),
		};

		let serving = dir.join(format!("{}.u", req.file_id));
		if let Err(e) = fs::write(&serving, &plain) {
			return Err(RespBody::err(500, &format!("{}", e)));
		}
		Ok(())
	}

	/// A replica that cannot be recovered from its holder goes to the
	/// chain's recovery queue.
	fn report_lost(&self, replica_id: &str) {
		match self.node.chain.report_recovery(replica_id) {
			Ok(tx) => info!("replica {} reported for recovery: {}", replica_id, tx),
			Err(e) => warn!("recovery report for {} failed: {}", replica_id, e),
		}
	}

	fn state(&self) -> RespBody {
		let count = self.node.miners.len() as u32;
		RespBody::ok(count.to_be_bytes().to_vec())
	}

	fn readtag(&self, body: &[u8]) -> RespBody {
		let req: ReadTagReq = match decode(body) {
			Ok(r) => r,
			Err(_) => return RespBody::err(400, "Bad Request"),
		};
		match fs::read(self.node.dirs.tag_path(&req.file_id)) {
			Ok(bytes) => RespBody::ok(bytes),
			Err(_) => RespBody::err(404, "No such tag"),
		}
	}
}

/// Pull one whole replica from its holding miner.
fn fetch_replica(endpoint: &str, replica_id: &str, wallet: &str) -> Option<Vec<u8>> {
	let client = Client::dial(endpoint, DIAL_TIMEOUT).ok()?;
	let mut out: Vec<u8> = Vec::new();
	let mut index = 1u32;
	loop {
		let body = encode(&FileDownloadReq {
			file_id: replica_id.to_string(),
			wallet_address: wallet.to_string(),
			block_index: index,
		})
		.ok()?;
		let data = client
			.call_data(RPC_SERVICE_MINER, RPC_METHOD_MINER_READFILE, body, CALL_TIMEOUT)
			.ok()?;
		let info: FileDownloadInfo = decode(&data).ok()?;
		out.extend_from_slice(&info.data);
		if index >= info.block_total {
			return Some(out);
		}
		index += 1;
	}
}

impl Service for WService {
	fn handle(&self, method: &str, body: &[u8]) -> RespBody {
		match method {
			"auth" => self.auth(body),
			"writefile" => self.writefile(body),
			"readfile" => self.readfile(body),
			"spacefile" => match decode::<SpaceFileReq>(body) {
				Ok(req) => filler::spacefile(&self.node, &req),
				Err(_) => RespBody::err(400, "Bad Request"),
			},
			"spacetag" => match decode::<SpaceTagReq>(body) {
				Ok(req) => filler::spacetag(&self.node, &req),
				Err(_) => RespBody::err(400, "Bad Request"),
			},
			"fileback" => match decode::<FileBackReq>(body) {
				Ok(req) => filler::fileback(&self.node, &req),
				Err(_) => RespBody::err(400, "Bad Request"),
			},
			"state" => self.state(),
			"readtag" => self.readtag(body),
			_ => RespBody::err(400, "Unknown method"),
		}
	}
}
