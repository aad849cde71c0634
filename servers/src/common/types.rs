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

//! Server types

use std::convert::From;
use std::fmt;
use std::io;

use cess_chain as chain;
use cess_config::SchedulerConfig;
use cess_core::{coding, encrypt, podr2};
use cess_rpc as rpc;

/// Error type wrapping underlying module errors.
#[derive(Debug)]
pub enum Error {
	/// Error originating from the chain gateway.
	Chain(chain::Error),
	/// Error originating from the framed RPC transport.
	Rpc(rpc::Error),
	/// Error originating from redundancy coding.
	Coding(coding::Error),
	/// Error originating from replica encryption.
	Encrypt(encrypt::Error),
	/// Error originating from the PoDR2 scheme.
	Podr2(podr2::Error),
	/// Error originating from the KV cache.
	Store(sled::Error),
	/// Filesystem failure underneath an engine.
	Io(io::Error),
	/// Startup precondition not met.
	Startup(String),
	/// A shard ran out of miners or retries during placement.
	Placement(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Chain(e) => write!(f, "chain: {}", e),
			Error::Rpc(e) => write!(f, "rpc: {}", e),
			Error::Coding(e) => write!(f, "coding: {}", e),
			Error::Encrypt(e) => write!(f, "encrypt: {}", e),
			Error::Podr2(e) => write!(f, "podr2: {}", e),
			Error::Store(e) => write!(f, "store: {}", e),
			Error::Io(e) => write!(f, "io: {}", e),
			Error::Startup(msg) => write!(f, "startup: {}", msg),
			Error::Placement(msg) => write!(f, "placement: {}", msg),
		}
	}
}

impl From<chain::Error> for Error {
	fn from(e: chain::Error) -> Error {
		Error::Chain(e)
	}
}

impl From<rpc::Error> for Error {
	fn from(e: rpc::Error) -> Error {
		Error::Rpc(e)
	}
}

impl From<coding::Error> for Error {
	fn from(e: coding::Error) -> Error {
		Error::Coding(e)
	}
}

impl From<encrypt::Error> for Error {
	fn from(e: encrypt::Error) -> Error {
		Error::Encrypt(e)
	}
}

impl From<podr2::Error> for Error {
	fn from(e: podr2::Error) -> Error {
		Error::Podr2(e)
	}
}

impl From<sled::Error> for Error {
	fn from(e: sled::Error) -> Error {
		Error::Store(e)
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::Io(e)
	}
}

/// Settings the node runs with, taken from the parsed configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
	/// Public IP the service advertises
	pub service_addr: String,
	/// Listening port
	pub service_port: u16,
	/// Base data directory
	pub data_dir: String,
	/// Stash account bonded to the controller
	pub stash_acc: String,
}

impl From<&SchedulerConfig> for ServerConfig {
	fn from(cfg: &SchedulerConfig) -> ServerConfig {
		ServerConfig {
			service_addr: cfg.service_addr.clone(),
			service_port: cfg.service_port,
			data_dir: cfg.data_dir.clone(),
			stash_acc: cfg.stash_acc.clone(),
		}
	}
}

impl ServerConfig {
	/// `ip:port` as advertised on chain (base58 encoded there).
	pub fn endpoint(&self) -> String {
		format!("{}:{}", self.service_addr, self.service_port)
	}
}
