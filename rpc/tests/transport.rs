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

//! End-to-end checks of the framed transport: server dispatch, client
//! correlation, admission control, panic containment.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cess_rpc::{Client, ConnectGate, Error, RespBody, Server, Service};

struct Echo;

impl Service for Echo {
	fn handle(&self, method: &str, body: &[u8]) -> RespBody {
		match method {
			"echo" => RespBody::ok(body.to_vec()),
			"reject" => RespBody::err(403, "Forbidden"),
			"explode" => panic!("handler exploded"),
			_ => RespBody::err(400, "Unknown method"),
		}
	}
}

struct FlaggedGate {
	ok: AtomicBool,
}

impl ConnectGate for FlaggedGate {
	fn chain_ok(&self) -> bool {
		self.ok.load(Ordering::Relaxed)
	}
	fn known_ip(&self, _ip: &IpAddr) -> bool {
		false
	}
}

fn start_server(gate: Arc<dyn ConnectGate>) -> (SocketAddr, Arc<AtomicBool>) {
	let stop = Arc::new(AtomicBool::new(false));
	let server = Arc::new(Server::new(gate, stop.clone()));
	server.register("test", Arc::new(Echo));
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let addr = listener.local_addr().unwrap();
	thread::spawn(move || {
		server.listen(listener).unwrap();
	});
	(addr, stop)
}

fn allow_all() -> Arc<dyn ConnectGate> {
	Arc::new(cess_rpc::server::AllowAll)
}

#[test]
fn calls_round_trip() {
	let (addr, stop) = start_server(allow_all());
	let client = Client::dial(&addr.to_string(), Duration::from_secs(6)).unwrap();

	let resp = client
		.call("test", "echo", b"payload".to_vec(), Duration::from_secs(5))
		.unwrap();
	assert_eq!(resp.code, 200);
	assert_eq!(resp.data, b"payload");

	stop.store(true, Ordering::Relaxed);
}

#[test]
fn remote_errors_surface_through_call_data() {
	let (addr, stop) = start_server(allow_all());
	let client = Client::dial(&addr.to_string(), Duration::from_secs(6)).unwrap();

	match client.call_data("test", "reject", vec![], Duration::from_secs(5)) {
		Err(Error::Remote { code, .. }) => assert_eq!(code, 403),
		other => panic!("expected remote error, got {:?}", other.map(|_| ())),
	}
	match client.call_data("test", "no-such-method", vec![], Duration::from_secs(5)) {
		Err(Error::Remote { code, .. }) => assert_eq!(code, 400),
		other => panic!("expected remote error, got {:?}", other.map(|_| ())),
	}

	stop.store(true, Ordering::Relaxed);
}

#[test]
fn unknown_service_is_a_bad_request() {
	let (addr, stop) = start_server(allow_all());
	let client = Client::dial(&addr.to_string(), Duration::from_secs(6)).unwrap();
	let resp = client
		.call("nope", "echo", vec![], Duration::from_secs(5))
		.unwrap();
	assert_eq!(resp.code, 400);
	stop.store(true, Ordering::Relaxed);
}

#[test]
fn a_panicking_handler_keeps_the_connection_alive() {
	let (addr, stop) = start_server(allow_all());
	let client = Client::dial(&addr.to_string(), Duration::from_secs(6)).unwrap();

	let resp = client
		.call("test", "explode", vec![], Duration::from_secs(5))
		.unwrap();
	assert_eq!(resp.code, 500);

	// same connection still serves
	let resp = client
		.call("test", "echo", b"still here".to_vec(), Duration::from_secs(5))
		.unwrap();
	assert_eq!(resp.data, b"still here");

	stop.store(true, Ordering::Relaxed);
}

#[test]
fn concurrent_calls_correlate_by_id() {
	let (addr, stop) = start_server(allow_all());
	let client = Arc::new(Client::dial(&addr.to_string(), Duration::from_secs(6)).unwrap());

	let mut handles = vec![];
	for i in 0..8u8 {
		let client = client.clone();
		handles.push(thread::spawn(move || {
			let payload = vec![i; 1 + i as usize];
			let resp = client
				.call("test", "echo", payload.clone(), Duration::from_secs(5))
				.unwrap();
			assert_eq!(resp.data, payload);
		}));
	}
	for h in handles {
		h.join().unwrap();
	}

	stop.store(true, Ordering::Relaxed);
}

#[test]
fn connections_are_refused_while_the_chain_is_down() {
	let gate = Arc::new(FlaggedGate {
		ok: AtomicBool::new(false),
	});
	let (addr, stop) = start_server(gate);

	// the TCP handshake may complete, but the server hangs up immediately
	if let Ok(client) = Client::dial(&addr.to_string(), Duration::from_secs(6)) {
		assert!(client
			.call("test", "echo", vec![], Duration::from_secs(2))
			.is_err());
	}

	stop.store(true, Ordering::Relaxed);
}
