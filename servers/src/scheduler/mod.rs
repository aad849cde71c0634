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

//! Scheduler server components.

pub mod auth;
pub mod cache;
pub mod filler;
pub mod handlers;
pub mod miners;
pub mod server;
pub mod upload;
pub mod verify;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cess_core::podr2::{Keys, TagInfo};

use crate::common::types::Error;

/// Run SigGen on its own named thread. The pairing-style math owns native
/// state, so it never runs on a connection or worker thread directly;
/// `deadline` bounds the wall-clock wait where the caller has one.
pub(crate) fn sig_gen_task(
	keys: Arc<Keys>,
	name: Vec<u8>,
	data: Vec<u8>,
	block_size: u64,
	scan_size: u64,
	deadline: Option<Duration>,
) -> Result<TagInfo, Error> {
	let (tx, rx) = mpsc::channel();
	let spawned = thread::Builder::new()
		.name("podr2-siggen".to_string())
		.spawn(move || {
			let result = keys.sig_gen(&name, &data, block_size, scan_size);
			let _ = tx.send(result);
		});
	if let Err(e) = spawned {
		return Err(Error::Io(e));
	}

	let received = match deadline {
		Some(limit) => rx
			.recv_timeout(limit)
			.map_err(|_| Error::Placement("tag generation deadline exceeded".to_string()))?,
		None => rx
			.recv()
			.map_err(|_| Error::Placement("tag generation thread died".to_string()))?,
	};
	received.map_err(Error::from)
}
