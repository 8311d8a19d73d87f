// Copyright 2025 eraflo
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

//! 64-bit FNV-1a hashing.
//!
//! Used for shader source keys, batch key fingerprints, vertex layout
//! fingerprints and the GPU fingerprint stored in the shader cache header.

/// FNV-1a 64-bit offset basis.
pub const FNV_OFFSET_BASIS: u64 = 14_695_981_039_346_656_037;

/// FNV-1a 64-bit prime.
pub const FNV_PRIME: u64 = 1_099_511_628_211;

/// Hashes a byte slice with 64-bit FNV-1a.
#[inline]
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Hashes a string with 64-bit FNV-1a.
#[inline]
pub fn hash_str(s: &str) -> u64 {
    fnv1a_64(s.as_bytes())
}

/// Derives a program key from its vertex and fragment sources.
///
/// The combination is order sensitive: swapping the two sources yields a
/// different key.
pub fn program_key(vertex_source: &str, fragment_source: &str) -> u64 {
    hash_str(vertex_source) ^ hash_str(fragment_source).wrapping_mul(31)
}

/// An incremental FNV-1a hasher.
///
/// Feeding fields one at a time produces the same value as hashing their
/// concatenated little-endian bytes.
#[derive(Debug, Clone, Copy)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    /// Creates a hasher seeded with the FNV offset basis.
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET_BASIS,
        }
    }

    /// Feeds raw bytes into the hash.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.state ^= u64::from(b);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    /// Feeds a `u32` as little-endian bytes.
    pub fn write_u32(&mut self, value: u32) {
        self.write(&value.to_le_bytes());
    }

    /// Feeds a `u64` as little-endian bytes.
    pub fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }

    /// Returns the current hash value.
    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}
