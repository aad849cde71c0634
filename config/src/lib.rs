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

//! Crate wrapping the scheduler's TOML configuration file: parsing,
//! validation and generation of the commented template.

#[macro_use]
extern crate serde_derive;

mod comments;
pub mod config;
pub mod types;

pub use crate::config::{initial_setup, write_template, DEFAULT_CONFIG_FILE_NAME};
pub use crate::types::{ConfigError, GlobalConfig, SchedulerConfig};
