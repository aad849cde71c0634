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

//! Dialing side of the framed RPC. One reader thread routes responses to
//! waiting calls by message id; cancelling a call abandons only that
//! call, never the connection.

use std::collections::HashMap;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use std::thread;

use cess_core::constants::RPC_POOL_BUFFER;
use cess_util::Mutex;

use crate::msg::{decode, encode, read_frame, write_frame, ReqMsg, RespBody};
use crate::pool::BufferPool;
use crate::types::Error;

/// Default deadline of one call.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(90);
/// Default dial deadline.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(6);

type Pending = Arc<Mutex<HashMap<u32, mpsc::Sender<RespBody>>>>;

/// A connection to one remote RPC endpoint.
pub struct Client {
	writer: Mutex<TcpStream>,
	pending: Pending,
	next_id: AtomicU32,
	alive: Arc<AtomicBool>,
}

impl Client {
	/// Dial `host:port` within the timeout and start the response router.
	pub fn dial(addr: &str, timeout: Duration) -> Result<Client, Error> {
		let sockaddr = addr
			.to_socket_addrs()
			.map_err(|_| Error::BadAddress(addr.to_string()))?
			.next()
			.ok_or_else(|| Error::BadAddress(addr.to_string()))?;
		let stream = TcpStream::connect_timeout(&sockaddr, timeout)?;
		let _ = stream.set_nodelay(true);

		let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
		let alive = Arc::new(AtomicBool::new(true));

		let mut reader = stream.try_clone()?;
		let route_pending = pending.clone();
		let route_alive = alive.clone();
		thread::Builder::new()
			.name(format!("rpc-client-{}", addr))
			.spawn(move || {
				let pool = Arc::new(BufferPool::new(RPC_POOL_BUFFER, 8));
				loop {
					let frame = match read_frame(&mut reader, &pool) {
						Ok(f) => f,
						Err(_) => break,
					};
					let resp: RespBody = match decode(frame.body()) {
						Ok(r) => r,
						Err(e) => {
							debug!("dropping malformed response frame: {}", e);
							continue;
						}
					};
					if let Some(tx) = route_pending.lock().remove(&frame.id) {
						// a cancelled call has already dropped its receiver
						let _ = tx.send(resp);
					}
				}
				route_alive.store(false, Ordering::Relaxed);
				// fail everything still in flight
				route_pending.lock().clear();
			})
			.map_err(|e| Error::Connection(e))?;

		Ok(Client {
			writer: Mutex::new(stream),
			pending,
			next_id: AtomicU32::new(1),
			alive,
		})
	}

	/// Whether the connection still routes responses.
	pub fn is_alive(&self) -> bool {
		self.alive.load(Ordering::Relaxed)
	}

	/// Issue one call and wait for its response within the timeout.
	pub fn call(
		&self,
		service: &str,
		method: &str,
		body: Vec<u8>,
		timeout: Duration,
	) -> Result<RespBody, Error> {
		if !self.is_alive() {
			return Err(Error::ConnectionClose);
		}
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::channel();
		self.pending.lock().insert(id, tx);

		let req = ReqMsg {
			service: service.to_string(),
			method: method.to_string(),
			body,
		};
		let bytes = match encode(&req) {
			Ok(b) => b,
			Err(e) => {
				self.pending.lock().remove(&id);
				return Err(e);
			}
		};
		if let Err(e) = write_frame(&mut self.writer.lock(), id, &bytes) {
			self.pending.lock().remove(&id);
			return Err(e);
		}

		match rx.recv_timeout(timeout) {
			Ok(resp) => Ok(resp),
			Err(mpsc::RecvTimeoutError::Timeout) => {
				self.pending.lock().remove(&id);
				Err(Error::Timeout)
			}
			Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::ConnectionClose),
		}
	}

	/// As `call`, unwrapping the success payload and turning non-success
	/// codes into errors.
	pub fn call_data(
		&self,
		service: &str,
		method: &str,
		body: Vec<u8>,
		timeout: Duration,
	) -> Result<Vec<u8>, Error> {
		let resp = self.call(service, method, body, timeout)?;
		if resp.is_ok() {
			Ok(resp.data)
		} else {
			Err(Error::Remote {
				code: resp.code,
				msg: resp.msg,
			})
		}
	}

	/// Shut the connection down; pending calls fail.
	pub fn close(&self) {
		self.alive.store(false, Ordering::Relaxed);
		let _ = self.writer.lock().shutdown(std::net::Shutdown::Both);
	}
}

impl Drop for Client {
	fn drop(&mut self) {
		self.close();
	}
}
