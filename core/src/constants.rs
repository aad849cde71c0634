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

//! Sizes and limits shared across the workspace.

/// 1 KiB
pub const SIZE_1KIB: u64 = 1024;
/// 1 MiB
pub const SIZE_1MIB: u64 = 1024 * 1024;
/// 1 GiB
pub const SIZE_1GIB: u64 = 1024 * 1024 * 1024;

/// Transfer block for user file chunks on the framed RPC.
pub const RPC_FILE_BUFFER: u64 = 2 * SIZE_1MIB;
/// Transfer block for filler file chunks on the framed RPC.
pub const RPC_SPACE_BUFFER: u64 = 512 * 1024;
/// Pooled buffer size for non-file frames.
pub const RPC_POOL_BUFFER: usize = 40 * 1024;

/// Nominal shard unit for the redundancy coding size table.
pub const SHARD_SIZE: u64 = 5 * SIZE_1MIB;
/// Cap on data shards per file.
pub const MAX_DATA_SHARDS: u64 = 12;

/// PoDR2 block for filler files.
pub const FILLER_BLOCK_SIZE: u64 = 8 * SIZE_1MIB;
/// PoDR2 scan (sector) size for filler files.
pub const FILLER_SCAN_SIZE: u64 = SIZE_1MIB;
/// Width of one random ASCII line in a filler file, newline included.
pub const FILLER_LINE_WIDTH: usize = 64;
/// Upper bound on a filler request, in MiB.
pub const FILLER_MAX_MB: u32 = 32;

/// Length of an upload authorization token.
pub const TOKEN_LEN: usize = 12;
/// Lifetime of an upload authorization.
pub const AUTH_EXPIRY_SECS: i64 = 600;

/// Proof results per submission transaction.
pub const MAX_PROOF_BATCH: usize = 40;

/// Minimum controller balance to operate, in pico.
pub const MINIMUM_BALANCE: u128 = 1_000_000_000_000;

/// Accepted connections above this count are only admitted for known miner
/// addresses.
pub const MAX_TCP_CONNECTION: u32 = 30;

/// Assembly file suffix of an uploading user file.
pub const ASSEMBLY_SUFFIX: &str = ".cess";
/// Serving-cache suffix of a decrypted user file.
pub const SERVING_SUFFIX: &str = ".u";

/// Services exposed over the framed RPC.
pub const RPC_SERVICE_SCHEDULER: &str = "wservice";
/// Service the storage miners expose.
pub const RPC_SERVICE_MINER: &str = "mservice";
/// Miner method receiving replica chunks.
pub const RPC_METHOD_MINER_WRITEFILE: &str = "writefile";
/// Miner method receiving the replica tag.
pub const RPC_METHOD_MINER_WRITETAG: &str = "writefiletag";
/// Miner method serving replica chunks back.
pub const RPC_METHOD_MINER_READFILE: &str = "readfile";
/// Miner method serving a stored tag.
pub const RPC_METHOD_MINER_READTAG: &str = "readfiletag";
