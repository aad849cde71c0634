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

//! The chain interaction layer. `Gateway` is the typed facade the rest of
//! the scheduler talks to; it sits on the `NodeRpc` black box, which the
//! shipped `client` module implements as a JSON-RPC websocket session
//! against the chain node's scheduler-facing RPC extensions. `mock`
//! provides the in-memory node used throughout the tests.

#[macro_use]
extern crate log;

pub mod client;
mod error;
pub mod gateway;
pub mod keys;
pub mod mock;

pub use crate::error::Error;
pub use crate::gateway::{Gateway, NodeRpc};
pub use crate::keys::ControllerKeys;
