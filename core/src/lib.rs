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

//! Core types and storage primitives of the scheduler: the on-chain data
//! model, the chunked file digest, redundancy coding of replicas, AES-CTR
//! replica encryption and the PoDR2 tag/challenge/verify scheme.

#[macro_use]
extern crate serde_derive;

pub mod b64;
pub mod coding;
pub mod constants;
pub mod encrypt;
pub mod hash;
pub mod podr2;
pub mod types;

pub use crate::types::*;
