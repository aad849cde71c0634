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

//! Filesystem helpers for the node's data layout.

use std::fs;
use std::io;
use std::path::Path;

/// Delete a directory or file, tolerating an already-absent target.
pub fn delete<P: AsRef<Path>>(path: P) -> io::Result<()> {
	let path = path.as_ref();
	if path.is_dir() {
		fs::remove_dir_all(path)
	} else if path.is_file() {
		fs::remove_file(path)
	} else {
		Ok(())
	}
}

/// Create the directory (and parents) when it does not exist yet.
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> io::Result<()> {
	let path = path.as_ref();
	if !path.is_dir() {
		fs::create_dir_all(path)?;
	}
	Ok(())
}

/// Wipe and recreate the directory. Used for the stale cache/file/filler/tag
/// trees at startup.
pub fn recreate_dir<P: AsRef<Path>>(path: P) -> io::Result<()> {
	delete(path.as_ref())?;
	fs::create_dir_all(path.as_ref())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recreate_wipes_content() {
		let dir = std::env::temp_dir().join("cess_util_recreate_test");
		ensure_dir(&dir).unwrap();
		let stale = dir.join("stale");
		fs::write(&stale, b"x").unwrap();
		recreate_dir(&dir).unwrap();
		assert!(dir.is_dir());
		assert!(!stale.exists());
		delete(&dir).unwrap();
	}
}
