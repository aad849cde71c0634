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

//! Scheduler server implementation, glues the different parts of the
//! system (chain gateway, miner cache, engines, framed RPC) and acts as
//! a facade.

use std::net::{IpAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cess_chain::{ControllerKeys, Gateway, NodeRpc};
use cess_config::GlobalConfig;
use cess_core::constants::{MINIMUM_BALANCE, RPC_SERVICE_SCHEDULER};
use cess_core::podr2;
use cess_rpc::{ConnectGate, Server as RpcServer};
use cess_util::file as fsutil;

use crate::common::types::{Error, ServerConfig};
use crate::scheduler::auth::{self, AuthLedger};
use crate::scheduler::cache::{self, KvCache};
use crate::scheduler::handlers::WService;
use crate::scheduler::miners::{self, MinerCache};
use crate::scheduler::verify;

/// The node's on-disk layout, rooted at
/// `<DataDir>/<controller-account>/cess/`.
#[derive(Clone, Debug)]
pub struct DataDirs {
	/// Layout root
	pub base: PathBuf,
	/// Rotated log files
	pub log: PathBuf,
	/// Embedded KV cache
	pub cache: PathBuf,
	/// Upload assembly and replica staging
	pub file: PathBuf,
	/// Generated filler files
	pub filler: PathBuf,
	/// Stored tags
	pub tag: PathBuf,
}

impl DataDirs {
	/// Create the layout. Everything except `log/` holds only transient
	/// state and is wiped at startup.
	pub fn build(data_dir: &str, controller: &str) -> Result<DataDirs, Error> {
		let base = PathBuf::from(data_dir).join(controller).join("cess");
		let dirs = DataDirs {
			log: base.join("log"),
			cache: base.join("cache"),
			file: base.join("file"),
			filler: base.join("filler"),
			tag: base.join("tag"),
			base,
		};
		fsutil::ensure_dir(&dirs.base)?;
		fsutil::ensure_dir(&dirs.log)?;
		fsutil::recreate_dir(&dirs.cache)?;
		fsutil::recreate_dir(&dirs.file)?;
		fsutil::recreate_dir(&dirs.filler)?;
		fsutil::recreate_dir(&dirs.tag)?;
		Ok(dirs)
	}

	/// Staging directory of one upload.
	pub fn file_dir(&self, file_id: &str) -> PathBuf {
		self.file.join(file_id)
	}

	/// Filler directory of one miner.
	pub fn filler_dir(&self, miner_id: u64) -> PathBuf {
		self.filler.join(format!("C{}", miner_id))
	}

	/// Where a tag blob lives.
	pub fn tag_path(&self, file_id: &str) -> PathBuf {
		self.tag.join(format!("{}.tag", file_id))
	}
}

/// Shared state every component hangs off.
pub struct Node {
	/// Node settings
	pub config: ServerConfig,
	/// Typed chain gateway
	pub chain: Arc<Gateway>,
	/// Miner directory cache
	pub miners: Arc<MinerCache>,
	/// Upload authorization ledger
	pub auth: Arc<AuthLedger>,
	/// Embedded KV cache
	pub kv: Arc<KvCache>,
	/// PoDR2 key set
	pub podr2: Arc<podr2::Keys>,
	/// On-disk layout
	pub dirs: DataDirs,
	/// Cooperative shutdown flag
	pub stop: Arc<AtomicBool>,
}

struct NodeGate(Arc<Node>);

impl ConnectGate for NodeGate {
	fn chain_ok(&self) -> bool {
		self.0.chain.chain_ok()
	}
	fn known_ip(&self, ip: &IpAddr) -> bool {
		self.0.miners.known_ip(ip)
	}
}

/// Scheduler server holding internal structures.
pub struct Server {
	node: Arc<Node>,
	threads: Vec<JoinHandle<()>>,
}

impl Server {
	/// Build the node: verify balance and sync, confirm or perform
	/// registration, create the data layout. The lower-level node
	/// session is injected so tests run against the in-memory chain.
	pub fn build(config: &GlobalConfig, node_rpc: Arc<dyn NodeRpc>) -> Result<Server, Error> {
		let keys = ControllerKeys::from_mnemonic(&config.scheduler.ctrl_prk)?;
		let chain = Arc::new(Gateway::new(node_rpc, keys));
		let server_config = ServerConfig::from(&config.scheduler);
		let stop = Arc::new(AtomicBool::new(false));

		let balance = chain.account_balance(&chain.account())?;
		if balance < MINIMUM_BALANCE {
			return Err(Error::Startup(format!(
				"controller balance {} pico is below the required {}",
				balance, MINIMUM_BALANCE
			)));
		}

		loop {
			let status = chain.sync_status()?;
			if status.synced {
				break;
			}
			info!("chain syncing, {} blocks behind", status.behind_blocks);
			if stop.load(Ordering::Relaxed) {
				return Err(Error::Startup("interrupted while syncing".to_string()));
			}
			thread::sleep(Duration::from_secs(6));
		}

		let endpoint = bs58::encode(server_config.endpoint()).into_string();
		let registered = chain
			.scheduler_set()?
			.iter()
			.any(|entry| entry.controller == chain.account());
		if registered {
			info!("scheduler already registered");
		} else {
			let tx = chain.register(&server_config.stash_acc, &endpoint)?;
			info!("scheduler registered, tx {}", tx);
		}

		let controller = chain.address();
		let dirs = DataDirs::build(&server_config.data_dir, &controller)?;
		let kv = Arc::new(KvCache::open(&dirs.cache, cache::NAMESPACE)?);
		let podr2 = Arc::new(podr2::Keys::from_seed(&chain.keys().podr2_seed()));

		let node = Arc::new(Node {
			config: server_config,
			chain,
			miners: Arc::new(MinerCache::new()),
			auth: Arc::new(AuthLedger::new()),
			kv,
			podr2,
			dirs,
			stop,
		});
		Ok(Server {
			node,
			threads: Vec::new(),
		})
	}

	/// Shared node state.
	pub fn node(&self) -> Arc<Node> {
		self.node.clone()
	}

	/// Launch the long-lived subtasks and serve the framed RPC. Blocks
	/// until the stop flag is raised.
	pub fn run(&mut self) -> Result<(), Error> {
		let node = self.node.clone();

		self.threads
			.push(Gateway::start_keepalive(node.chain.clone(), node.stop.clone()));
		self.threads.push(miners::start_refresh(node.clone()));
		self.threads.push(verify::start(node.clone()));
		self.threads.push(auth::start_sweeper(node.clone()));

		let gate = Arc::new(NodeGate(node.clone()));
		let rpc = Arc::new(RpcServer::new(gate, node.stop.clone()));
		rpc.register(RPC_SERVICE_SCHEDULER, Arc::new(WService::new(node.clone())));

		let listener = TcpListener::bind(("0.0.0.0", node.config.service_port))?;
		rpc.listen(listener)?;
		Ok(())
	}

	/// Raise the stop flag; running loops drain on their next wakeup.
	pub fn stop(&self) {
		self.node.stop.store(true, Ordering::Relaxed);
	}

	/// Wait for the background tasks to finish after `stop`.
	pub fn join(&mut self) {
		for handle in self.threads.drain(..) {
			let _ = handle.join();
		}
	}
}
