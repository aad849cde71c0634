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

use std::fmt;
use std::io;

/// Errors surfaced by the chain gateway.
#[derive(Debug)]
pub enum Error {
	/// Chain node unreachable, or still unreachable after retries
	Unavailable,
	/// The queried subject does not exist on chain
	NotFound,
	/// The controller account cannot cover the operation
	InsufficientBalance,
	/// The node rejected the submitted transaction
	TxRejected(String),
	/// A call exceeded its deadline
	Timeout,
	/// Any other RPC-level failure
	Rpc(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Unavailable => write!(f, "chain unavailable"),
			Error::NotFound => write!(f, "not found on chain"),
			Error::InsufficientBalance => write!(f, "insufficient balance"),
			Error::TxRejected(msg) => write!(f, "transaction rejected: {}", msg),
			Error::Timeout => write!(f, "chain call timed out"),
			Error::Rpc(msg) => write!(f, "chain rpc: {}", msg),
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut {
			Error::Timeout
		} else {
			Error::Unavailable
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Error {
		Error::Rpc(format!("bad payload: {}", e))
	}
}

impl Error {
	/// Whether a retry with backoff can reasonably help.
	pub fn is_transient(&self) -> bool {
		match self {
			Error::Unavailable | Error::Timeout => true,
			Error::Rpc(_) => true,
			Error::NotFound | Error::InsufficientBalance | Error::TxRejected(_) => false,
		}
	}
}
