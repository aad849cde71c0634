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

//! Configuration file management

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use toml;

use crate::comments::insert_config_comments;
use crate::types::{ConfigError, GlobalConfig};

/// The configuration file the scheduler looks for when `-c` is not given.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "conf.toml";

/// Reads and validates the configuration, the path defaulting to
/// `./conf.toml` in the working directory.
pub fn initial_setup(config_path: Option<&str>) -> Result<GlobalConfig, ConfigError> {
	let path = match config_path {
		Some(p) => PathBuf::from(p),
		None => PathBuf::from(DEFAULT_CONFIG_FILE_NAME),
	};
	GlobalConfig::new(&path)
}

/// Writes the commented template to the given path, refusing to overwrite
/// an existing file.
pub fn write_template(path: &Path) -> Result<(), ConfigError> {
	if path.exists() {
		return Err(ConfigError::FileIOError(
			path.display().to_string(),
			"Not overwriting existing file".to_string(),
		));
	}
	GlobalConfig::default().write_to_file(path)
}

impl GlobalConfig {
	/// Requires the configuration file to exist at the given path and to
	/// pass validation.
	pub fn new(path: &Path) -> Result<GlobalConfig, ConfigError> {
		if !path.is_file() {
			return Err(ConfigError::FileNotFoundError(path.display().to_string()));
		}

		let mut file = File::open(path)?;
		let mut contents = String::new();
		file.read_to_string(&mut contents)?;

		let mut cfg: GlobalConfig = toml::from_str(&contents).map_err(|e| {
			ConfigError::ParseError(path.display().to_string(), format!("{}", e))
		})?;
		cfg.config_file_path = Some(path.to_path_buf());
		cfg.validate()?;
		Ok(cfg)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		let s = &self.scheduler;
		let required = [
			("RpcAddr", &s.rpc_addr),
			("CtrlPrk", &s.ctrl_prk),
			("StashAcc", &s.stash_acc),
			("ServiceAddr", &s.service_addr),
			("DataDir", &s.data_dir),
		];
		for (key, value) in required.iter() {
			if value.trim().is_empty() {
				return Err(ConfigError::ValueError(
					key.to_string(),
					"must not be empty".to_string(),
				));
			}
		}
		// Ports below 1024 are reserved; values above 65535 already fail
		// the integer parse.
		if s.service_port < 1024 {
			return Err(ConfigError::ValueError(
				"ServicePort".to_string(),
				format!("{} is a system reserved port", s.service_port),
			));
		}
		Ok(())
	}

	/// Serializes the config with the template comments re-inserted.
	pub fn ser_config(&self) -> Result<String, ConfigError> {
		let encoded =
			toml::to_string(self).map_err(|e| ConfigError::SerializationError(format!("{}", e)))?;
		Ok(insert_config_comments(encoded))
	}

	fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
		let conf_out = self.ser_config()?;
		let mut file = File::create(path)?;
		file.write_all(conf_out.as_bytes())?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(port: &str) -> String {
		format!(
			r#"
RpcAddr = "ws://127.0.0.1:9948"
CtrlPrk = "bottom drive obey lake curtain smoke basket hold race lonely fit walk"
StashAcc = "cXfyomKDABfehLkvARFE854wgDJFMbsxwAJEHezBb6mhV8u7C"
ServiceAddr = "127.0.0.1"
ServicePort = {}
DataDir = "/data"
"#,
			port
		)
	}

	#[test]
	fn parses_flat_keys() {
		let cfg: GlobalConfig = toml::from_str(&sample("15001")).unwrap();
		cfg.validate().unwrap();
		assert_eq!(cfg.scheduler.service_port, 15001);
		assert_eq!(cfg.scheduler.service_addr, "127.0.0.1");
	}

	#[test]
	fn rejects_reserved_port() {
		let cfg: GlobalConfig = toml::from_str(&sample("1023")).unwrap();
		assert!(cfg.validate().is_err());
		let cfg: GlobalConfig = toml::from_str(&sample("0")).unwrap();
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn rejects_port_out_of_range() {
		assert!(toml::from_str::<GlobalConfig>(&sample("65536")).is_err());
	}

	#[test]
	fn rejects_empty_required_key() {
		let broken = sample("15001").replace(
			"ServiceAddr = \"127.0.0.1\"",
			"ServiceAddr = \"\"",
		);
		let cfg: GlobalConfig = toml::from_str(&broken).unwrap();
		assert!(cfg.validate().is_err());
	}

	#[test]
	fn template_round_trips() {
		let out = GlobalConfig::default().ser_config().unwrap();
		let reparsed: GlobalConfig = toml::from_str(&out).unwrap();
		assert_eq!(reparsed.scheduler, GlobalConfig::default().scheduler);
	}
}
