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

//! Filler engine scenarios: generation, chunked streaming, tagging and
//! the metadata commit.

mod common;

use std::sync::Arc;

use cess_chain::mock::MockNode;
use cess_core::hash::sha256_hex;
use cess_rpc::msg::{decode, encode, FileBackReq, SpaceFileInfo, SpaceFileReq, SpaceTagInfo, SpaceTagReq};
use cess_rpc::Service;
use cess_servers::scheduler::handlers::WService;

use common::{register_miner, test_node, MinerSim, TestKey};

const MB: u64 = 1024 * 1024;
const CHUNK: u64 = 512 * 1024;

fn space_req(miner: &TestKey, miner_id: u64, file_id: &str, block_index: u32, size_mb: u32) -> Vec<u8> {
	encode(&SpaceFileReq {
		miner_id,
		sign: miner.sign(&miner_id.to_be_bytes()),
		file_id: file_id.to_string(),
		block_index,
		size_mb,
	})
	.unwrap()
}

#[test]
fn filler_round_trip() {
	let mock = Arc::new(MockNode::new());
	let node = test_node(mock.clone());
	let service = WService::new(node.clone());

	let miner = TestKey::from_seed(51);
	let sim = MinerSim::start();
	register_miner(&mock, &node, &miner, 6, &sim.endpoint, 1 << 40);

	// new 8 MiB filler
	let resp = service.handle("spacefile", &space_req(&miner, 6, "", 0, 8));
	assert_eq!(resp.code, 200, "{}", resp.msg);
	let first: SpaceFileInfo = decode(&resp.data).unwrap();
	assert_eq!(first.block_total, 16);
	assert_eq!(first.block_index, 0);
	assert_eq!(first.data.len() as u64, CHUNK);
	let file_id = first.file_id.clone();

	// stream the remaining chunks; the last one carries the hash
	let mut content = first.data.clone();
	let mut final_hash = String::new();
	for index in 1..first.block_total {
		let resp = service.handle("spacefile", &space_req(&miner, 6, &file_id, index, 0));
		assert_eq!(resp.code, 200, "chunk {}: {}", index, resp.msg);
		let info: SpaceFileInfo = decode(&resp.data).unwrap();
		assert_eq!(info.block_index, index);
		content.extend_from_slice(&info.data);
		if index + 1 == first.block_total {
			assert!(!info.file_hash.is_empty(), "last chunk must carry the hash");
			final_hash = info.file_hash;
		} else {
			assert!(info.file_hash.is_empty());
		}
	}

	// exactly 8 MiB of newline-terminated 64 byte lines
	assert_eq!(content.len() as u64, 8 * MB);
	assert_eq!(sha256_hex(&content), final_hash);
	assert!(content[63] == b'\n' && content[127] == b'\n');
	assert_eq!(content.iter().filter(|&&b| b == b'\n').count() as u64, 8 * MB / 64);

	// tag
	let body = encode(&SpaceTagReq {
		miner_id: 6,
		sign: miner.sign(&6u64.to_be_bytes()),
		file_id: file_id.clone(),
	})
	.unwrap();
	let resp = service.handle("spacetag", &body);
	assert_eq!(resp.code, 200, "{}", resp.msg);
	let tag: SpaceTagInfo = decode(&resp.data).unwrap();
	assert_eq!(tag.file_id, file_id);
	assert_eq!(tag.tag.t.n, 1, "8 MiB filler is a single PoDR2 block");
	assert_eq!(tag.tag.sigmas.len(), 1);

	// fileback commits and deletes
	let body = encode(&FileBackReq {
		miner_id: 6,
		sign: miner.sign(&6u64.to_be_bytes()),
		file_id: file_id.clone(),
		file_hash: final_hash,
		acc: miner.account().to_string(),
	})
	.unwrap();
	let resp = service.handle("fileback", &body);
	assert_eq!(resp.code, 200, "{}", resp.msg);

	let (miner_id, fillers) = mock.with_state(|s| s.filler_metas[0].clone());
	assert_eq!(miner_id, 6);
	assert_eq!(fillers.len(), 1);
	assert_eq!(fillers[0].size, 8 * MB);
	assert_eq!(fillers[0].block_num, 1);
	assert_eq!(fillers[0].acc, miner.account());

	let path = node.dirs.filler_dir(6).join(&file_id);
	assert!(!path.exists(), "committed filler must be deleted");
}

#[test]
fn filler_size_bounds() {
	let mock = Arc::new(MockNode::new());
	let node = test_node(mock.clone());
	let service = WService::new(node.clone());

	let miner = TestKey::from_seed(52);
	let sim = MinerSim::start();
	register_miner(&mock, &node, &miner, 7, &sim.endpoint, 1 << 40);

	for bad in [0u32, 33, 65535].iter() {
		let resp = service.handle("spacefile", &space_req(&miner, 7, "", 0, *bad));
		assert_eq!(resp.code, 400, "size_mb {} must be refused", bad);
	}
	let resp = service.handle("spacefile", &space_req(&miner, 7, "", 0, 1));
	assert_eq!(resp.code, 200);
}

#[test]
fn filler_rpcs_require_a_valid_signature() {
	let mock = Arc::new(MockNode::new());
	let node = test_node(mock.clone());
	let service = WService::new(node.clone());

	let miner = TestKey::from_seed(53);
	let sim = MinerSim::start();
	register_miner(&mock, &node, &miner, 8, &sim.endpoint, 1 << 40);

	// wrong key signs
	let impostor = TestKey::from_seed(54);
	let body = encode(&SpaceFileReq {
		miner_id: 8,
		sign: impostor.sign(&8u64.to_be_bytes()),
		file_id: String::new(),
		block_index: 0,
		size_mb: 1,
	})
	.unwrap();
	assert_eq!(service.handle("spacefile", &body).code, 403);

	// unknown miner id
	let body = encode(&SpaceFileReq {
		miner_id: 99,
		sign: miner.sign(&99u64.to_be_bytes()),
		file_id: String::new(),
		block_index: 0,
		size_mb: 1,
	})
	.unwrap();
	assert_eq!(service.handle("spacefile", &body).code, 404);
}
