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

//! Websocket JSON-RPC session against the chain node. Requests are
//! serialized on a single in-flight call; responses are matched by id with
//! a 15 s read deadline. Anything beyond this thin session (storage
//! layout, extrinsic signing) lives behind the node's scheduler-facing RPC
//! extensions and is out of the scheduler's hands.

use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect, Message, WebSocket};

use cess_util::Mutex;

use crate::error::Error;
use crate::gateway::NodeRpc;

const READ_DEADLINE_SECS: u64 = 15;

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// One websocket JSON-RPC session, reconnecting lazily.
pub struct WsClient {
	url: String,
	socket: Mutex<Option<Socket>>,
	next_id: AtomicU64,
}

impl WsClient {
	/// Connect eagerly so misconfiguration fails at startup.
	pub fn connect_to(url: &str) -> Result<WsClient, Error> {
		let client = WsClient {
			url: url.to_string(),
			socket: Mutex::new(None),
			next_id: AtomicU64::new(1),
		};
		{
			let mut guard = client.socket.lock();
			*guard = Some(client.open()?);
		}
		Ok(client)
	}

	fn open(&self) -> Result<Socket, Error> {
		let (socket, _resp) = connect(self.url.as_str()).map_err(|e| {
			warn!("websocket connect to {} failed: {}", self.url, e);
			Error::Unavailable
		})?;
		if let MaybeTlsStream::Plain(stream) = socket.get_ref() {
			stream
				.set_read_timeout(Some(Duration::from_secs(READ_DEADLINE_SECS)))
				.map_err(Error::from)?;
		}
		Ok(socket)
	}

	fn roundtrip(&self, socket: &mut Socket, payload: String, id: u64) -> Result<Value, Error> {
		socket
			.write_message(Message::Text(payload))
			.map_err(|_| Error::Unavailable)?;
		loop {
			let msg = match socket.read_message() {
				Ok(m) => m,
				Err(tungstenite::Error::Io(e)) => return Err(Error::from(e)),
				Err(_) => return Err(Error::Unavailable),
			};
			let text = match msg {
				Message::Text(t) => t,
				// control frames and subscriptions we did not ask for
				_ => continue,
			};
			let value: Value = serde_json::from_str(&text)?;
			if value.get("id").and_then(Value::as_u64) != Some(id) {
				continue;
			}
			if let Some(err) = value.get("error") {
				let msg = err
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("unknown")
					.to_string();
				let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
				// 1010/1011 are the node's invalid-transaction family
				return if code == 1010 || code == 1011 {
					Err(Error::TxRejected(msg))
				} else {
					Err(Error::Rpc(msg))
				};
			}
			return Ok(value.get("result").cloned().unwrap_or(Value::Null));
		}
	}
}

impl NodeRpc for WsClient {
	fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let payload = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		})
		.to_string();

		let mut guard = self.socket.lock();
		if guard.is_none() {
			*guard = Some(self.open()?);
		}
		let socket = guard.as_mut().expect("socket ensured above");
		match self.roundtrip(socket, payload, id) {
			Ok(v) => Ok(v),
			Err(e) => {
				// drop the session; the next call or the keepalive redials
				*guard = None;
				Err(e)
			}
		}
	}

	fn reconnect(&self) -> Result<(), Error> {
		let mut guard = self.socket.lock();
		*guard = Some(self.open()?);
		Ok(())
	}
}
