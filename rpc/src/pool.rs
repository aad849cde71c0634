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

//! Byte-slab pool for frame bodies. Every connection reads small frames
//! into recycled 40 KiB buffers; a frame returns its buffer on drop.
//! Oversized frames fall back to one-off allocations.

use cess_util::Mutex;

/// A bounded pool of equally sized byte buffers.
pub struct BufferPool {
	bufs: Mutex<Vec<Vec<u8>>>,
	buf_size: usize,
	capacity: usize,
}

impl BufferPool {
	/// Pool of up to `capacity` buffers of `buf_size` bytes each.
	pub fn new(buf_size: usize, capacity: usize) -> BufferPool {
		BufferPool {
			bufs: Mutex::new(Vec::with_capacity(capacity)),
			buf_size,
			capacity,
		}
	}

	/// Size of the buffers this pool hands out.
	pub fn buf_size(&self) -> usize {
		self.buf_size
	}

	/// Take a zeroed-capacity buffer, recycling when one is available.
	pub fn take(&self) -> Vec<u8> {
		if let Some(buf) = self.bufs.lock().pop() {
			return buf;
		}
		vec![0u8; self.buf_size]
	}

	/// Return a buffer; dropped on the floor when the pool is full or the
	/// buffer was not one of ours.
	pub fn put(&self, mut buf: Vec<u8>) {
		if buf.capacity() < self.buf_size {
			return;
		}
		buf.resize(self.buf_size, 0);
		let mut bufs = self.bufs.lock();
		if bufs.len() < self.capacity {
			bufs.push(buf);
		}
	}

	/// Buffers currently idle in the pool.
	pub fn idle(&self) -> usize {
		self.bufs.lock().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn buffers_recycle() {
		let pool = BufferPool::new(64, 2);
		let a = pool.take();
		assert_eq!(a.len(), 64);
		pool.put(a);
		assert_eq!(pool.idle(), 1);
		let _ = pool.take();
		assert_eq!(pool.idle(), 0);
	}

	#[test]
	fn pool_is_bounded() {
		let pool = BufferPool::new(8, 1);
		pool.put(vec![0u8; 8]);
		pool.put(vec![0u8; 8]);
		assert_eq!(pool.idle(), 1);
	}

	#[test]
	fn undersized_returns_are_discarded() {
		let pool = BufferPool::new(64, 4);
		pool.put(vec![0u8; 8]);
		assert_eq!(pool.idle(), 0);
	}
}
