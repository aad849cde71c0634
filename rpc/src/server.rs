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

//! RPC server: accept loop with admission control, one reader thread per
//! connection, writes serialized per connection, named service dispatch.

use std::collections::HashMap;
use std::net::{IpAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cess_core::constants::{MAX_TCP_CONNECTION, RPC_POOL_BUFFER};
use cess_util::{Mutex, RwLock};

use crate::msg::{decode, read_frame, write_frame, ReqMsg, RespBody};
use crate::pool::BufferPool;
use crate::types::Error;

/// Pooled buffers per server; chunked uploads recycle these.
const POOL_CAPACITY: usize = 64;

/// A named service: dispatches its methods over raw bodies.
pub trait Service: Send + Sync {
	/// Handle one request body, returning the response to send back.
	fn handle(&self, method: &str, body: &[u8]) -> RespBody;
}

/// Admission policy for the accept loop. Connections are refused while
/// the chain is unreachable, and above the connection budget only known
/// miner addresses get in.
pub trait ConnectGate: Send + Sync {
	/// Whether the chain is currently reachable.
	fn chain_ok(&self) -> bool;
	/// Whether the address belongs to a known miner.
	fn known_ip(&self, ip: &IpAddr) -> bool;
}

/// Gate that admits everyone; tests and tools.
pub struct AllowAll;

impl ConnectGate for AllowAll {
	fn chain_ok(&self) -> bool {
		true
	}
	fn known_ip(&self, _ip: &IpAddr) -> bool {
		true
	}
}

/// The framed RPC server.
pub struct Server {
	services: RwLock<HashMap<String, Arc<dyn Service>>>,
	gate: Arc<dyn ConnectGate>,
	max_connections: u32,
	connections: Arc<AtomicU32>,
	pool: Arc<BufferPool>,
	stop: Arc<AtomicBool>,
}

impl Server {
	/// New server with the default connection budget.
	pub fn new(gate: Arc<dyn ConnectGate>, stop: Arc<AtomicBool>) -> Server {
		Server::with_max_connections(gate, stop, MAX_TCP_CONNECTION)
	}

	/// New server with an explicit connection budget.
	pub fn with_max_connections(
		gate: Arc<dyn ConnectGate>,
		stop: Arc<AtomicBool>,
		max_connections: u32,
	) -> Server {
		Server {
			services: RwLock::new(HashMap::new()),
			gate,
			max_connections,
			connections: Arc::new(AtomicU32::new(0)),
			pool: Arc::new(BufferPool::new(RPC_POOL_BUFFER, POOL_CAPACITY)),
			stop,
		}
	}

	/// Register a service under its name. Replaces any previous
	/// registration.
	pub fn register(&self, name: &str, service: Arc<dyn Service>) {
		self.services.write().insert(name.to_string(), service);
	}

	/// Connections currently served.
	pub fn connection_count(&self) -> u32 {
		self.connections.load(Ordering::Relaxed)
	}

	/// Accept loop; blocks until the stop flag is raised. The caller
	/// binds the listener so tests can use an ephemeral port.
	pub fn listen(self: Arc<Self>, listener: TcpListener) -> Result<(), Error> {
		listener.set_nonblocking(true)?;
		info!("rpc server listening on {:?}", listener.local_addr());
		loop {
			if self.stop.load(Ordering::Relaxed) {
				info!("rpc server stopping");
				break;
			}
			match listener.accept() {
				Ok((stream, peer)) => {
					if !self.admit(&peer.ip()) {
						debug!("refused connection from {}", peer);
						drop(stream);
						continue;
					}
					if let Err(e) = stream.set_nonblocking(false) {
						warn!("failed to configure connection from {}: {}", peer, e);
						continue;
					}
					let server = self.clone();
					self.connections.fetch_add(1, Ordering::Relaxed);
					let name = format!("rpc-conn-{}", peer);
					let spawned = thread::Builder::new().name(name).spawn(move || {
						if let Err(e) = server.serve_conn(stream) {
							match e {
								Error::ConnectionClose => {
									debug!("connection from {} closed", peer)
								}
								e => debug!("connection from {} failed: {}", peer, e),
							}
						}
						server.connections.fetch_sub(1, Ordering::Relaxed);
					});
					if spawned.is_err() {
						self.connections.fetch_sub(1, Ordering::Relaxed);
					}
				}
				Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					thread::sleep(Duration::from_millis(100));
				}
				Err(e) => {
					warn!("accept failed: {}", e);
					thread::sleep(Duration::from_millis(100));
				}
			}
		}
		Ok(())
	}

	fn admit(&self, ip: &IpAddr) -> bool {
		if !self.gate.chain_ok() {
			return false;
		}
		if self.connections.load(Ordering::Relaxed) >= self.max_connections {
			return self.gate.known_ip(ip);
		}
		true
	}

	fn serve_conn(&self, stream: TcpStream) -> Result<(), Error> {
		// wake up periodically so raising the stop flag drains the
		// connection within its read window
		stream.set_read_timeout(Some(Duration::from_secs(30)))?;
		let mut reader = stream.try_clone()?;
		let writer = Mutex::new(stream);
		loop {
			if self.stop.load(Ordering::Relaxed) {
				return Ok(());
			}
			let frame = match read_frame(&mut reader, &self.pool) {
				Ok(f) => f,
				Err(Error::Timeout) => continue,
				Err(e) => return Err(e),
			};
			let resp = self.dispatch(frame.body());
			let bytes = crate::msg::encode(&resp)?;
			write_frame(&mut writer.lock(), frame.id, &bytes)?;
		}
	}

	fn dispatch(&self, body: &[u8]) -> RespBody {
		let req: ReqMsg = match decode(body) {
			Ok(r) => r,
			Err(_) => return RespBody::err(400, "Bad Request"),
		};
		let service = match self.services.read().get(&req.service).cloned() {
			Some(s) => s,
			None => return RespBody::err(400, "Unknown service"),
		};
		// a panicking handler must not take the connection down
		match panic::catch_unwind(AssertUnwindSafe(|| {
			service.handle(&req.method, &req.body)
		})) {
			Ok(resp) => resp,
			Err(_) => {
				error!("handler for {}.{} panicked", req.service, req.method);
				RespBody::err(500, "Internal error")
			}
		}
	}
}
