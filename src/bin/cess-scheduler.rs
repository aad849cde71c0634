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

//! Main entry point of the scheduler service.

#[macro_use]
extern crate log;

use std::path::Path;
use std::process::exit;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, SubCommand};

use cess_chain::client::WsClient;
use cess_chain::{ControllerKeys, Gateway};
use cess_config::{initial_setup, write_template, GlobalConfig, DEFAULT_CONFIG_FILE_NAME};
use cess_servers::Server;
use cess_util::init_logger;
use cess_util::LoggingConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
	let matches = App::new("cess-scheduler")
		.about("Scheduling service of the CESS storage network")
		.arg(
			Arg::with_name("config")
				.short("c")
				.long("config")
				.takes_value(true)
				.global(true)
				.help("Custom configuration file path"),
		)
		.subcommand(SubCommand::with_name("version").about("Print version information"))
		.subcommand(SubCommand::with_name("default").about("Generate a configuration template"))
		.subcommand(
			SubCommand::with_name("register")
				.about("Register scheduler information on the chain"),
		)
		.subcommand(
			SubCommand::with_name("update")
				.about("Update the scheduling service ip and port")
				.arg(Arg::with_name("ip").required(true))
				.arg(Arg::with_name("port").required(true)),
		)
		.subcommand(SubCommand::with_name("run").about("Run the scheduling service"))
		.get_matches();

	match matches.subcommand() {
		("version", _) => {
			println!("cess-scheduler v{}", VERSION);
		}
		("default", Some(args)) => cmd_default(args),
		("register", Some(args)) => cmd_register(args),
		("update", Some(args)) => cmd_update(args),
		("run", Some(args)) => cmd_run(args),
		_ => {
			eprintln!("usage: cess-scheduler [version|default|register|update|run]");
			exit(1);
		}
	}
}

fn load_config(args: &ArgMatches<'_>) -> GlobalConfig {
	match initial_setup(args.value_of("config")) {
		Ok(cfg) => cfg,
		Err(e) => {
			eprintln!("[err] {}", e);
			exit(1);
		}
	}
}

fn connect_gateway(config: &GlobalConfig) -> Arc<Gateway> {
	let keys = match ControllerKeys::from_mnemonic(&config.scheduler.ctrl_prk) {
		Ok(keys) => keys,
		Err(e) => {
			eprintln!("[err] {}", e);
			exit(1);
		}
	};
	let client = match WsClient::connect_to(&config.scheduler.rpc_addr) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			eprintln!("[err] cannot reach the chain node: {}", e);
			exit(1);
		}
	};
	Arc::new(Gateway::new(client, keys))
}

fn cmd_default(args: &ArgMatches<'_>) {
	let path = args
		.value_of("config")
		.unwrap_or(DEFAULT_CONFIG_FILE_NAME)
		.to_string();
	if let Err(e) = write_template(Path::new(&path)) {
		eprintln!("[err] {}", e);
		exit(1);
	}
	println!("[ok] {}", path);
}

fn cmd_register(args: &ArgMatches<'_>) {
	let config = load_config(args);
	let gateway = connect_gateway(&config);

	let registered = match gateway.scheduler_set() {
		Ok(set) => set.iter().any(|s| s.controller == gateway.account()),
		Err(e) => {
			eprintln!("[err] {}", e);
			exit(1);
		}
	};
	if registered {
		println!("[ok] The account is already registered");
		return;
	}

	let endpoint = bs58::encode(format!(
		"{}:{}",
		config.scheduler.service_addr, config.scheduler.service_port
	))
	.into_string();
	match gateway.register(&config.scheduler.stash_acc, &endpoint) {
		Ok(tx) => println!("[ok] Registration success: {}", tx),
		Err(e) => {
			eprintln!("[err] {}", e);
			exit(1);
		}
	}
}

fn cmd_update(args: &ArgMatches<'_>) {
	let config = load_config(args);
	let ip = args.value_of("ip").unwrap_or_default();
	let port: u16 = match args.value_of("port").unwrap_or_default().parse() {
		Ok(p) if p >= 1024 => p,
		_ => {
			eprintln!("[err] Please fill in a correct port number");
			exit(1);
		}
	};

	let gateway = connect_gateway(&config);
	let endpoint = bs58::encode(format!("{}:{}", ip, port)).into_string();
	match gateway.update_endpoint(&endpoint) {
		Ok(tx) => println!("[ok] success: {}", tx),
		Err(e) => {
			eprintln!("[err] {}", e);
			exit(1);
		}
	}
}

fn cmd_run(args: &ArgMatches<'_>) {
	let config = load_config(args);

	let client = match WsClient::connect_to(&config.scheduler.rpc_addr) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			eprintln!("[err] cannot reach the chain node: {}", e);
			exit(1);
		}
	};

	let mut server = match Server::build(&config, client) {
		Ok(server) => server,
		Err(e) => {
			eprintln!("[err] {}", e);
			exit(1);
		}
	};

	// the log directory only exists once the node is built
	let node = server.node();
	let mut logging = config.logging.clone().unwrap_or_else(LoggingConfig::default);
	logging.log_file_path = node
		.dirs
		.log
		.join("cess-scheduler.log")
		.to_string_lossy()
		.into_owned();
	init_logger(Some(logging));
	info!("cess-scheduler v{} starting", VERSION);

	let stop = node.stop.clone();
	if let Err(e) = ctrlc::set_handler(move || {
		stop.store(true, Ordering::Relaxed);
	}) {
		eprintln!("[err] cannot install the shutdown handler: {}", e);
		exit(1);
	}

	if let Err(e) = server.run() {
		error!("server exited with an error: {}", e);
		exit(1);
	}
	server.stop();
	server.join();
	info!("cess-scheduler stopped");
}
