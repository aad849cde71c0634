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

//! Embedded KV cache under `cache/`, keys namespaced so other node
//! components can share the store.

use std::path::Path;

use crate::common::types::Error;

/// Namespace the scheduler's records live under.
pub const NAMESPACE: &str = "scheduler";

/// A namespaced view over the embedded store.
pub struct KvCache {
	db: sled::Db,
	namespace: String,
}

impl KvCache {
	/// Open (or create) the store at `dir`.
	pub fn open<P: AsRef<Path>>(dir: P, namespace: &str) -> Result<KvCache, Error> {
		let db = sled::open(dir)?;
		Ok(KvCache {
			db,
			namespace: namespace.to_string(),
		})
	}

	fn key(&self, k: &str) -> Vec<u8> {
		let mut key = Vec::with_capacity(self.namespace.len() + 1 + k.len());
		key.extend_from_slice(self.namespace.as_bytes());
		key.push(b'/');
		key.extend_from_slice(k.as_bytes());
		key
	}

	/// Store a value.
	pub fn put(&self, k: &str, v: &[u8]) -> Result<(), Error> {
		self.db.insert(self.key(k), v)?;
		self.db.flush()?;
		Ok(())
	}

	/// Fetch a value.
	pub fn get(&self, k: &str) -> Result<Option<Vec<u8>>, Error> {
		Ok(self.db.get(self.key(k))?.map(|v| v.to_vec()))
	}

	/// Whether the key exists.
	pub fn has(&self, k: &str) -> Result<bool, Error> {
		Ok(self.db.contains_key(self.key(k))?)
	}

	/// Drop a key.
	pub fn delete(&self, k: &str) -> Result<(), Error> {
		self.db.remove(self.key(k))?;
		self.db.flush()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn temp_cache() -> KvCache {
		let dir = std::env::temp_dir().join(format!(
			"cess_kv_test_{}",
			cess_util::random_code(8)
		));
		KvCache::open(&dir, NAMESPACE).unwrap()
	}

	#[test]
	fn put_get_delete() {
		let kv = temp_cache();
		kv.put("miner/abc", b"entry").unwrap();
		assert!(kv.has("miner/abc").unwrap());
		assert_eq!(kv.get("miner/abc").unwrap().unwrap(), b"entry");
		kv.delete("miner/abc").unwrap();
		assert!(!kv.has("miner/abc").unwrap());
	}

	#[test]
	fn namespaces_do_not_collide() {
		let dir = std::env::temp_dir().join(format!(
			"cess_kv_ns_test_{}",
			cess_util::random_code(8)
		));
		let a = KvCache::open(&dir, "a").unwrap();
		a.put("k", b"va").unwrap();
		// same underlying tree, different namespace
		let b = KvCache {
			db: a.db.clone(),
			namespace: "b".to_string(),
		};
		assert!(b.get("k").unwrap().is_none());
	}
}
