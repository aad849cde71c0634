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

//! Message types that transit over the framed transport and the frame
//! read/write primitives themselves.

use std::io::{Read, Write};
use std::mem;
use std::net::TcpStream;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use cess_core::b64;
use cess_core::podr2::TagInfo;

use crate::pool::BufferPool;
use crate::types::{Error, MAX_FRAME_BODY};

/// One received frame. Small bodies borrow a pooled buffer which returns
/// to its pool when the frame is dropped.
pub struct Frame {
	/// Correlation id
	pub id: u32,
	buf: Vec<u8>,
	len: usize,
	pool: Option<Arc<BufferPool>>,
}

impl Frame {
	/// The frame body.
	pub fn body(&self) -> &[u8] {
		&self.buf[..self.len]
	}
}

impl Drop for Frame {
	fn drop(&mut self) {
		if let Some(pool) = self.pool.take() {
			pool.put(mem::replace(&mut self.buf, Vec::new()));
		}
	}
}

/// Read one length-prefixed frame: 4-byte big-endian body length, 4-byte
/// message id, body.
pub fn read_frame(stream: &mut TcpStream, pool: &Arc<BufferPool>) -> Result<Frame, Error> {
	let len = stream.read_u32::<BigEndian>()? as usize;
	if len > MAX_FRAME_BODY {
		return Err(Error::OversizedFrame(len));
	}
	let id = stream.read_u32::<BigEndian>()?;

	if len <= pool.buf_size() {
		let mut buf = pool.take();
		stream.read_exact(&mut buf[..len])?;
		Ok(Frame {
			id,
			buf,
			len,
			pool: Some(pool.clone()),
		})
	} else {
		let mut buf = vec![0u8; len];
		stream.read_exact(&mut buf)?;
		Ok(Frame {
			id,
			buf,
			len,
			pool: None,
		})
	}
}

/// Write one frame.
pub fn write_frame(stream: &mut TcpStream, id: u32, body: &[u8]) -> Result<(), Error> {
	if body.len() > MAX_FRAME_BODY {
		return Err(Error::OversizedFrame(body.len()));
	}
	stream.write_u32::<BigEndian>(body.len() as u32)?;
	stream.write_u32::<BigEndian>(id)?;
	stream.write_all(body)?;
	stream.flush()?;
	Ok(())
}

/// Serialize a body type.
pub fn encode<T: serde::Serialize>(t: &T) -> Result<Vec<u8>, Error> {
	Ok(serde_json::to_vec(t)?)
}

/// Parse a body type.
pub fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
	Ok(serde_json::from_slice(body)?)
}

/// Request envelope: which service and method, and the method's body.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ReqMsg {
	/// Registered service name
	pub service: String,
	/// Method within the service
	pub method: String,
	/// Method body
	#[serde(with = "b64::bytes")]
	pub body: Vec<u8>,
}

/// Every response carries a code, a reason and an optional payload.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct RespBody {
	/// 200/201 success family, 4xx caller fault, 5xx server fault
	pub code: i32,
	/// Human-readable reason
	pub msg: String,
	/// Method-specific payload
	#[serde(with = "b64::bytes")]
	pub data: Vec<u8>,
}

impl RespBody {
	/// 200 with payload.
	pub fn ok(data: Vec<u8>) -> RespBody {
		RespBody {
			code: 200,
			msg: "success".to_string(),
			data,
		}
	}

	/// Non-200 with reason.
	pub fn err(code: i32, msg: &str) -> RespBody {
		RespBody {
			code,
			msg: msg.to_string(),
			data: Vec::new(),
		}
	}

	/// Success family.
	pub fn is_ok(&self) -> bool {
		self.code == 200 || self.code == 201
	}
}

/// Upload authorization request.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct AuthReq {
	/// Client public key bytes
	#[serde(with = "b64::bytes")]
	pub pubkey: Vec<u8>,
	/// Message the client signed
	#[serde(with = "b64::bytes")]
	pub msg: Vec<u8>,
	/// Signature over `msg`
	#[serde(with = "b64::bytes")]
	pub sign: Vec<u8>,
	/// File to upload
	pub file_id: String,
	/// Display name
	pub file_name: String,
	/// Plaintext size
	pub file_size: u64,
	/// Number of 2 MiB chunks the client will send
	pub block_total: u32,
}

/// One chunk of an authorized upload.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FileUploadReq {
	/// Token minted by `auth`
	pub auth: String,
	/// 1-based chunk index
	pub block_index: u32,
	/// Chunk bytes
	#[serde(with = "b64::bytes")]
	pub data: Vec<u8>,
}

/// Download request, one chunk at a time.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FileDownloadReq {
	/// File to read
	pub file_id: String,
	/// Requesting wallet
	pub wallet_address: String,
	/// 1-based chunk index
	pub block_index: u32,
}

/// One chunk of a download.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FileDownloadInfo {
	/// File being read
	pub file_id: String,
	/// Number of chunks
	pub block_total: u32,
	/// Size of this chunk
	pub block_size: u32,
	/// 1-based chunk index
	pub block_index: u32,
	/// Chunk bytes
	#[serde(with = "b64::bytes")]
	pub data: Vec<u8>,
}

/// Filler request: with `file_id` empty a new filler of `size_mb` is
/// generated, otherwise chunk `block_index` of an existing one is served.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SpaceFileReq {
	/// Requesting miner
	pub miner_id: u64,
	/// Signature over the miner id bytes
	#[serde(with = "b64::bytes")]
	pub sign: Vec<u8>,
	/// Existing filler, or empty
	pub file_id: String,
	/// 0-based chunk index into an existing filler
	pub block_index: u32,
	/// Size of a new filler in MiB, (0, 32]
	pub size_mb: u32,
}

/// One filler chunk; the final chunk also carries the whole-file hash.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SpaceFileInfo {
	/// Filler id
	pub file_id: String,
	/// Hex SHA-256 of the whole file, set on the last chunk
	pub file_hash: String,
	/// Number of 512 KiB chunks
	pub block_total: u32,
	/// 0-based chunk index
	pub block_index: u32,
	/// Chunk bytes
	#[serde(with = "b64::bytes")]
	pub data: Vec<u8>,
}

/// Tag request for a generated filler.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SpaceTagReq {
	/// Requesting miner
	pub miner_id: u64,
	/// Signature over the miner id bytes
	#[serde(with = "b64::bytes")]
	pub sign: Vec<u8>,
	/// Filler to tag
	pub file_id: String,
}

/// Tag response for a filler.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SpaceTagInfo {
	/// Filler the tag belongs to
	pub file_id: String,
	/// Tag and σ-vector
	pub tag: TagInfo,
}

/// Commit request after a miner stored a filler.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FileBackReq {
	/// Requesting miner
	pub miner_id: u64,
	/// Signature over the miner id bytes
	#[serde(with = "b64::bytes")]
	pub sign: Vec<u8>,
	/// Filler to commit
	pub file_id: String,
	/// Whole-file hex SHA-256 the miner observed
	pub file_hash: String,
	/// Miner's printable account
	pub acc: String,
}

/// Tag read-back, used by the verifier against miners.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ReadTagReq {
	/// Requesting scheduler account, printable
	pub acc: String,
	/// Subject file
	pub file_id: String,
}

/// One replica chunk pushed to a miner.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PutFileToBucket {
	/// Replica id (`<fid>.dN`)
	pub file_id: String,
	/// Number of 2 MiB blocks
	pub block_total: u32,
	/// 0-based block index
	pub block_index: u32,
	/// Size of this block
	pub block_size: u32,
	/// Block bytes
	#[serde(with = "b64::bytes")]
	pub data: Vec<u8>,
}

/// The replica's tag pushed to the same miner after transfer.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PutTagToBucket {
	/// Replica id the tag covers
	pub file_id: String,
	/// Tag and σ-vector
	pub tag: TagInfo,
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::{TcpListener, TcpStream};
	use std::thread;

	#[test]
	fn frames_round_trip_over_loopback() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();

		let handle = thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			let pool = Arc::new(BufferPool::new(64, 4));
			let frame = read_frame(&mut stream, &pool).unwrap();
			write_frame(&mut stream, frame.id, frame.body()).unwrap();
		});

		let mut stream = TcpStream::connect(addr).unwrap();
		write_frame(&mut stream, 7, b"ping body").unwrap();
		let pool = Arc::new(BufferPool::new(64, 4));
		let echoed = read_frame(&mut stream, &pool).unwrap();
		assert_eq!(echoed.id, 7);
		assert_eq!(echoed.body(), b"ping body");
		handle.join().unwrap();
	}

	#[test]
	fn pooled_buffers_return_on_drop() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let writer = thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			write_frame(&mut stream, 1, &[1u8; 16]).unwrap();
			write_frame(&mut stream, 2, &[2u8; 4096]).unwrap();
		});

		let mut stream = TcpStream::connect(addr).unwrap();
		let pool = Arc::new(BufferPool::new(64, 4));
		{
			let small = read_frame(&mut stream, &pool).unwrap();
			assert_eq!(small.body().len(), 16);
			// big frame bypasses the pool entirely
			let big = read_frame(&mut stream, &pool).unwrap();
			assert_eq!(big.body().len(), 4096);
		}
		assert_eq!(pool.idle(), 1);
		writer.join().unwrap();
	}

	#[test]
	fn oversized_frames_are_refused_on_write() {
		let listener = TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let _guard = thread::spawn(move || {
			let _ = listener.accept();
		});
		let mut stream = TcpStream::connect(addr).unwrap();
		let too_big = vec![0u8; MAX_FRAME_BODY + 1];
		assert!(matches!(
			write_frame(&mut stream, 1, &too_big),
			Err(Error::OversizedFrame(_))
		));
		_guard.join().unwrap();
	}

	#[test]
	fn envelope_bodies_round_trip() {
		let req = ReqMsg {
			service: "wservice".to_string(),
			method: "writefile".to_string(),
			body: encode(&FileUploadReq {
				auth: "token12chars".to_string(),
				block_index: 3,
				data: vec![0u8, 255, 7],
			})
			.unwrap(),
		};
		let bytes = encode(&req).unwrap();
		let back: ReqMsg = decode(&bytes).unwrap();
		assert_eq!(back, req);
		let inner: FileUploadReq = decode(&back.body).unwrap();
		assert_eq!(inner.block_index, 3);
		assert_eq!(inner.data, vec![0u8, 255, 7]);
	}
}
