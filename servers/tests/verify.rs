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

//! Challenge verifier scenarios: batching, honest and dishonest provers,
//! unknown miners, unreachable tags.

mod common;

use std::sync::Arc;

use cess_chain::mock::MockNode;
use cess_core::podr2;
use cess_core::{AccountId, ChallengeInfo, ProofRecord, FILE_TYPE_USER};
use cess_servers::scheduler::verify;

use common::{register_miner, test_node, MinerSim, TestKey};

fn proof_for(
	miner: AccountId,
	file_id: &str,
	block_list: Vec<u32>,
	random: Vec<Vec<u8>>,
	mu: Vec<Vec<u8>>,
	sigma: Vec<u8>,
	file_size: u64,
) -> ProofRecord {
	ProofRecord {
		miner,
		challenge: ChallengeInfo {
			file_size,
			file_type: FILE_TYPE_USER,
			block_list,
			file_id: file_id.to_string(),
			random,
		},
		mu,
		sigma,
	}
}

#[test]
fn forty_one_proofs_make_two_batches() {
	let mock = Arc::new(MockNode::new());
	let node = test_node(mock.clone());

	// unknown miners fail fast, no tag fetch involved
	for i in 0..41u8 {
		mock.push_proof(proof_for(
			AccountId([i; 32]),
			&format!("file{}", i),
			vec![1],
			vec![vec![1]],
			vec![vec![0]],
			vec![0],
			1024,
		));
	}

	let batches = verify::run_cycle(&node).unwrap();
	assert_eq!(batches, 2);
	mock.with_state(|s| {
		assert_eq!(s.proof_result_batches.len(), 2);
		assert_eq!(s.proof_result_batches[0].len(), 40);
		assert_eq!(s.proof_result_batches[1].len(), 1);
		assert!(s
			.proof_result_batches
			.iter()
			.flatten()
			.all(|r| !r.result));
		// verified proofs leave the queue
		assert!(s.proofs.is_empty());
	});
}

#[test]
fn honest_and_tampered_proofs_verify_accordingly() {
	let mock = Arc::new(MockNode::new());
	let node = test_node(mock.clone());

	let miner = TestKey::from_seed(61);
	let sim = MinerSim::start();
	register_miner(&mock, &node, &miner, 3, &sim.endpoint, 1 << 40);

	// the scheduler tagged this data at placement time
	let data: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
	let file_id = "0004deadbeef.d0";
	let (block, scan) = podr2::block_size_for(data.len() as u64);
	let tag = node
		.podr2
		.sig_gen(file_id.as_bytes(), &data, block, scan)
		.unwrap();
	sim.store
		.lock()
		.tags
		.insert(file_id.to_string(), serde_json::to_vec(&tag).unwrap());

	// chain-issued challenge over three blocks
	let block_list: Vec<u32> = vec![1, 2, 3];
	let random: Vec<Vec<u8>> = vec![vec![5u8; 8], vec![9u8; 8], vec![13u8; 8]];
	let q = podr2::challenge_from_chain(&block_list, &random).unwrap();

	// honest prover
	let (mu, sigma) = podr2::gen_proof(&data, block, scan, &tag.sigmas, &q).unwrap();
	mock.push_proof(proof_for(
		miner.account(),
		file_id,
		block_list.clone(),
		random.clone(),
		mu,
		sigma,
		data.len() as u64,
	));

	// dishonest prover answers from tampered data
	let mut bad_data = data.clone();
	bad_data[0] ^= 0x55;
	let (bad_mu, bad_sigma) = podr2::gen_proof(&bad_data, block, scan, &tag.sigmas, &q).unwrap();
	mock.push_proof(proof_for(
		miner.account(),
		file_id,
		block_list,
		random,
		bad_mu,
		bad_sigma,
		data.len() as u64,
	));

	let batches = verify::run_cycle(&node).unwrap();
	assert_eq!(batches, 1);
	mock.with_state(|s| {
		let results = &s.proof_result_batches[0];
		assert_eq!(results.len(), 2);
		assert!(results[0].result, "honest proof must verify");
		assert!(!results[1].result, "tampered proof must fail");
	});
}

#[test]
fn unreachable_tag_passes_the_miner() {
	let mock = Arc::new(MockNode::new());
	let node = test_node(mock.clone());

	// miner is cached but its tag store has nothing for this file
	let miner = TestKey::from_seed(62);
	let sim = MinerSim::start();
	register_miner(&mock, &node, &miner, 4, &sim.endpoint, 1 << 40);

	mock.push_proof(proof_for(
		miner.account(),
		"unknown-file",
		vec![1],
		vec![vec![1]],
		vec![vec![0]],
		vec![0],
		1024,
	));

	verify::run_cycle(&node).unwrap();
	mock.with_state(|s| {
		assert_eq!(s.proof_result_batches.len(), 1);
		assert!(
			s.proof_result_batches[0][0].result,
			"a failed tag fetch gives the miner the benefit of the doubt"
		);
	});
}
