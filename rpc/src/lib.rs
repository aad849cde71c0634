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

//! The framed binary RPC the scheduler serves to clients and miners, and
//! dials miners with. Every frame is a 4-byte big-endian body length, a
//! 4-byte message id for correlation, and a JSON body; raw byte fields in
//! bodies travel base64-encoded.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod client;
pub mod msg;
pub mod pool;
pub mod server;
mod types;

pub use crate::client::Client;
pub use crate::msg::{read_frame, write_frame, Frame, ReqMsg, RespBody};
pub use crate::pool::BufferPool;
pub use crate::server::{ConnectGate, Server, Service};
pub use crate::types::Error;
