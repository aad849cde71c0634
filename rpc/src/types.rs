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

/// Maximum frame body the transport accepts. A 2 MiB chunk grows by a
/// third under base64 plus its envelope, so this leaves ample headroom.
pub const MAX_FRAME_BODY: usize = 8 * 1024 * 1024;

/// Transport errors.
#[derive(Debug)]
pub enum Error {
	/// Underlying socket failure
	Connection(io::Error),
	/// Frame advertises a body beyond `MAX_FRAME_BODY`
	OversizedFrame(usize),
	/// Body failed to parse
	Serialization(serde_json::Error),
	/// Peer went away, or the connection was closed under a pending call
	ConnectionClose,
	/// A call exceeded its deadline
	Timeout,
	/// The remote answered with a non-success code
	Remote {
		/// `RespBody.code`
		code: i32,
		/// `RespBody.msg`
		msg: String,
	},
	/// No route to the requested address
	BadAddress(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::Connection(e) => write!(f, "connection: {}", e),
			Error::OversizedFrame(n) => write!(f, "oversized frame of {} bytes", n),
			Error::Serialization(e) => write!(f, "serialization: {}", e),
			Error::ConnectionClose => write!(f, "connection closed"),
			Error::Timeout => write!(f, "call timed out"),
			Error::Remote { code, msg } => write!(f, "remote error {}: {}", code, msg),
			Error::BadAddress(a) => write!(f, "bad address: {}", a),
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		match e.kind() {
			io::ErrorKind::UnexpectedEof
			| io::ErrorKind::ConnectionReset
			| io::ErrorKind::ConnectionAborted
			| io::ErrorKind::BrokenPipe => Error::ConnectionClose,
			io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
			_ => Error::Connection(e),
		}
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Error {
		Error::Serialization(e)
	}
}
