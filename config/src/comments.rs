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

//! Comments for configuration + injection into output .toml
use std::collections::HashMap;

/// maps entries to Comments that should precede them
fn comments() -> HashMap<String, String> {
	let mut retval = HashMap::new();
	retval.insert(
		"RpcAddr".to_string(),
		"
# Generated configuration file for the cess-scheduler service.
# Every key below must be filled in before `cess-scheduler run`.

# Websocket address of the CESS chain node RPC, e.g. ws://127.0.0.1:9948
"
		.to_string(),
	);

	retval.insert(
		"CtrlPrk".to_string(),
		"
# Mnemonic phrase of the controller account used to sign transactions
"
		.to_string(),
	);

	retval.insert(
		"StashAcc".to_string(),
		"
# Address of the stash account bonded to the controller
"
		.to_string(),
	);

	retval.insert(
		"ServiceAddr".to_string(),
		"
# Public IP address the scheduling service is reachable at
"
		.to_string(),
	);

	retval.insert(
		"ServicePort".to_string(),
		"
# Listening port of the scheduling service, 1024..=65535
"
		.to_string(),
	);

	retval.insert(
		"DataDir".to_string(),
		"
# Base directory where logs, caches and file staging data are kept
"
		.to_string(),
	);

	retval.insert(
		"[logging]".to_string(),
		"
#########################################
### LOGGING CONFIGURATION             ###
#########################################
"
		.to_string(),
	);

	retval
}

fn insert_comments(orig: String) -> String {
	let comments = comments();
	let lines: Vec<&str> = orig.split('\n').collect();
	let mut out_lines = vec![];
	for l in lines {
		let key = l.split('=').next().unwrap_or("").trim();
		if let Some(prefix) = comments.get(key) {
			out_lines.push(prefix.clone());
		} else if let Some(prefix) = comments.get(l.trim()) {
			out_lines.push(prefix.clone());
		}
		out_lines.push(format!("{}\n", l));
	}
	let mut ret_val = String::from("");
	for l in out_lines {
		ret_val.push_str(&l);
	}
	ret_val
}

/// Insert the section comments into a serialized config file
pub fn insert_config_comments(orig: String) -> String {
	insert_comments(orig)
}
