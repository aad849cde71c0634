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

//! Logging, as well as various low-level utilities that factor Rust
//! patterns that are frequent within the scheduler codebase.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate serde_derive;

// Re-export so only has to be included once
pub use parking_lot::{Mutex, RwLock};

// Logging related
pub mod logger;
pub use crate::logger::{init_logger, init_test_logger};

pub mod types;
pub use crate::types::{LogLevel, LoggingConfig};

pub mod file;

mod hex;
pub use crate::hex::*;

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Random printable code of the given length, used for upload tokens and
/// replica keys.
pub fn random_code(len: usize) -> String {
	thread_rng().sample_iter(&Alphanumeric).take(len).collect()
}

/// Uniform pick in [low, high), with jitter-friendly semantics for backoff
/// sleeps. Panics if the range is empty.
pub fn random_in_range(low: usize, high: usize) -> usize {
	thread_rng().gen_range(low, high)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	#[test]
	fn random_code_is_printable_and_sized() {
		let code = random_code(12);
		assert_eq!(code.len(), 12);
		assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
	}

	#[test]
	fn random_codes_do_not_trivially_collide() {
		let mut seen = HashSet::new();
		for _ in 0..64 {
			assert!(seen.insert(random_code(12)));
		}
	}
}
