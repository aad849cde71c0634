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

//! Public types for config modules

use std::fmt;
use std::io;
use std::path::PathBuf;

use cess_util::LoggingConfig;

/// Error type wrapping config errors.
#[derive(Debug)]
pub enum ConfigError {
	/// Error with parsing of config file
	ParseError(String, String),

	/// Error with fileIO while reading config file
	FileIOError(String, String),

	/// No file found
	FileNotFoundError(String),

	/// Error serializing config values
	SerializationError(String),

	/// A required key is missing or empty, or holds a value out of range
	ValueError(String, String),
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			ConfigError::ParseError(ref file_name, ref message) => write!(
				f,
				"Error parsing configuration file at {} - {}",
				file_name, message
			),
			ConfigError::FileIOError(ref file_name, ref message) => {
				write!(f, "{} {}", message, file_name)
			}
			ConfigError::FileNotFoundError(ref file_name) => {
				write!(f, "Configuration file not found: {}", file_name)
			}
			ConfigError::SerializationError(ref message) => {
				write!(f, "Error serializing configuration: {}", message)
			}
			ConfigError::ValueError(ref key, ref message) => {
				write!(f, "Invalid configuration value for {}: {}", key, message)
			}
		}
	}
}

impl From<io::Error> for ConfigError {
	fn from(error: io::Error) -> ConfigError {
		ConfigError::FileIOError(
			String::from(""),
			format!("Error loading config file: {}", error),
		)
	}
}

/// Scheduler node settings, one key per line in the `conf.toml` the
/// operator fills in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SchedulerConfig {
	/// Websocket address of the chain node RPC
	pub rpc_addr: String,
	/// Mnemonic of the controller account signing operational transactions
	pub ctrl_prk: String,
	/// Address of the stash account holding the funds
	pub stash_acc: String,
	/// Public IP the service is reachable at
	pub service_addr: String,
	/// Port the service listens on, 1024..=65535
	pub service_port: u16,
	/// Base directory for all node data
	pub data_dir: String,
}

impl Default for SchedulerConfig {
	fn default() -> SchedulerConfig {
		SchedulerConfig {
			rpc_addr: String::new(),
			ctrl_prk: String::new(),
			stash_acc: String::new(),
			service_addr: String::new(),
			service_port: 15001,
			data_dir: String::from("/"),
		}
	}
}

/// Top level of the parsed configuration file, scheduler settings plus the
/// optional logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
	/// Keep track of the file we've read
	#[serde(skip)]
	pub config_file_path: Option<PathBuf>,
	/// Scheduler member config, flattened so the operator-facing keys stay
	/// top level in the file
	#[serde(flatten)]
	pub scheduler: SchedulerConfig,
	/// Logging config
	pub logging: Option<LoggingConfig>,
}

impl Default for GlobalConfig {
	fn default() -> GlobalConfig {
		GlobalConfig {
			config_file_path: None,
			scheduler: SchedulerConfig::default(),
			logging: Some(LoggingConfig::default()),
		}
	}
}
