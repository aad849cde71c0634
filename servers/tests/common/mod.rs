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

//! Test harness: a node wired to the in-memory chain, and a simulated
//! storage miner served over the real framed transport.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{ExpandedSecretKey, PublicKey, SecretKey};

use cess_chain::mock::MockNode;
use cess_chain::{ControllerKeys, Gateway};
use cess_core::podr2;
use cess_core::{AccountId, MinerInfo, MinerState, UserSpace};
use cess_rpc::msg::{
	decode, encode, FileDownloadInfo, FileDownloadReq, PutFileToBucket, PutTagToBucket, RespBody,
};
use cess_rpc::server::AllowAll;
use cess_rpc::{Server as RpcServer, Service};
use cess_servers::scheduler::auth::AuthLedger;
use cess_servers::scheduler::cache::{KvCache, NAMESPACE};
use cess_servers::scheduler::miners::MinerCache;
use cess_servers::scheduler::server::{DataDirs, Node};
use cess_servers::ServerConfig;
use cess_util::Mutex;

/// An ed25519 identity for simulated clients and miners.
pub struct TestKey {
	secret: SecretKey,
	public: PublicKey,
}

impl TestKey {
	pub fn from_seed(seed: u8) -> TestKey {
		let secret = SecretKey::from_bytes(&[seed; 32]).unwrap();
		let public = PublicKey::from(&secret);
		TestKey { secret, public }
	}

	pub fn account(&self) -> AccountId {
		AccountId(self.public.to_bytes())
	}

	pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
		let expanded: ExpandedSecretKey = (&self.secret).into();
		expanded.sign(msg, &self.public).to_bytes().to_vec()
	}
}

/// Node over the in-memory chain, with its own temp data dir.
pub fn test_node(mock: Arc<MockNode>) -> Arc<Node> {
	let keys = ControllerKeys::from_mnemonic("test node controller mnemonic").unwrap();
	let podr2_seed = keys.podr2_seed();
	let chain = Arc::new(Gateway::with_retry_base(
		mock,
		keys,
		Duration::from_millis(1),
	));

	let base = std::env::temp_dir().join(format!("cess_test_{}", cess_util::random_code(10)));
	let dirs = DataDirs::build(base.to_str().unwrap(), &chain.address()).unwrap();
	let kv = Arc::new(KvCache::open(&dirs.cache, NAMESPACE).unwrap());

	Arc::new(Node {
		config: ServerConfig {
			service_addr: "127.0.0.1".to_string(),
			service_port: 15001,
			data_dir: base.to_string_lossy().into_owned(),
			stash_acc: "stash".to_string(),
		},
		chain,
		miners: Arc::new(MinerCache::new()),
		auth: Arc::new(AuthLedger::new()),
		kv,
		podr2: Arc::new(podr2::Keys::from_seed(&podr2_seed)),
		dirs,
		stop: Arc::new(AtomicBool::new(false)),
	})
}

/// What a simulated miner has received.
#[derive(Default)]
pub struct MinerStore {
	pub files: HashMap<String, Vec<u8>>,
	pub tags: HashMap<String, Vec<u8>>,
}

/// A storage miner simulated over the real framed transport.
pub struct MinerSim {
	pub store: Arc<Mutex<MinerStore>>,
	pub endpoint: String,
	stop: Arc<AtomicBool>,
}

struct MinerService {
	store: Arc<Mutex<MinerStore>>,
}

impl Service for MinerService {
	fn handle(&self, method: &str, body: &[u8]) -> RespBody {
		match method {
			"writefile" => {
				let req: PutFileToBucket = match decode(body) {
					Ok(r) => r,
					Err(_) => return RespBody::err(400, "Bad Request"),
				};
				let mut store = self.store.lock();
				let entry = store.files.entry(req.file_id.clone()).or_default();
				if req.block_index == 0 {
					entry.clear();
				}
				entry.extend_from_slice(&req.data);
				RespBody::ok(Vec::new())
			}
			"writefiletag" => {
				let req: PutTagToBucket = match decode(body) {
					Ok(r) => r,
					Err(_) => return RespBody::err(400, "Bad Request"),
				};
				let bytes = serde_json::to_vec(&req.tag).unwrap();
				self.store.lock().tags.insert(req.file_id, bytes);
				RespBody::ok(Vec::new())
			}
			"readfile" => {
				let req: FileDownloadReq = match decode(body) {
					Ok(r) => r,
					Err(_) => return RespBody::err(400, "Bad Request"),
				};
				let store = self.store.lock();
				let content = match store.files.get(&req.file_id) {
					Some(c) => c,
					None => return RespBody::err(404, "No such file"),
				};
				let buf = 2 * 1024 * 1024usize;
				let total = ((content.len() + buf - 1) / buf) as u32;
				if req.block_index == 0 || req.block_index > total {
					return RespBody::err(400, "Invalid block index");
				}
				let start = (req.block_index - 1) as usize * buf;
				let end = std::cmp::min(start + buf, content.len());
				let info = FileDownloadInfo {
					file_id: req.file_id.clone(),
					block_total: total,
					block_size: (end - start) as u32,
					block_index: req.block_index,
					data: content[start..end].to_vec(),
				};
				RespBody::ok(encode(&info).unwrap())
			}
			"readfiletag" => self.read_tag(body),
			_ => RespBody::err(400, "Unknown method"),
		}
	}
}

impl MinerService {
	fn read_tag(&self, body: &[u8]) -> RespBody {
		let req: cess_rpc::msg::ReadTagReq = match decode(body) {
			Ok(r) => r,
			Err(_) => return RespBody::err(400, "Bad Request"),
		};
		match self.store.lock().tags.get(&req.file_id) {
			Some(tag) => RespBody::ok(tag.clone()),
			None => RespBody::err(404, "No such tag"),
		}
	}
}

impl MinerSim {
	/// Serve `mservice` on an ephemeral loopback port.
	pub fn start() -> MinerSim {
		let store = Arc::new(Mutex::new(MinerStore::default()));
		let stop = Arc::new(AtomicBool::new(false));
		let server = Arc::new(RpcServer::new(Arc::new(AllowAll), stop.clone()));
		server.register(
			"mservice",
			Arc::new(MinerService {
				store: store.clone(),
			}),
		);
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let endpoint = listener.local_addr().unwrap().to_string();
		std::thread::spawn(move || {
			let _ = server.listen(listener);
		});
		MinerSim {
			store,
			endpoint,
			stop,
		}
	}

	pub fn stop(&self) {
		self.stop
			.store(true, std::sync::atomic::Ordering::Relaxed);
	}
}

/// Register a miner on the mock chain with the sim's endpoint and the
/// key's account, then refresh the cache so lookups see it.
pub fn register_miner(
	mock: &Arc<MockNode>,
	node: &Arc<Node>,
	key: &TestKey,
	peer_id: u64,
	endpoint: &str,
	power: u64,
) {
	mock.add_miner(
		key.account(),
		MinerInfo {
			peer_id,
			ip: bs58::encode(endpoint).into_string(),
			power,
			space: 0,
			state: MinerState::Positive,
		},
	);
	node.miners.refresh_from(&node.chain, &node.kv).unwrap();
}

/// Give a user plenty of purchased space on the mock chain.
pub fn fund_user(mock: &Arc<MockNode>, acc: AccountId) {
	mock.set_user_space(
		acc,
		UserSpace {
			purchased: 1 << 40,
			used: 0,
			remaining: 1 << 40,
		},
	);
}
