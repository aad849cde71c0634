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

//! The scheduler node implementation: glues the chain gateway, the framed
//! RPC and the storage engines together and acts as a facade.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod common;
pub mod scheduler;

pub use crate::common::types::{Error, ServerConfig};
pub use crate::scheduler::server::{Node, Server};
