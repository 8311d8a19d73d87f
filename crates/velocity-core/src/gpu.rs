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

//! Capability facts reported by the driver and the fingerprint derived from them.

use crate::hash::hash_str;
use serde::{Deserialize, Serialize};

/// What the active driver can do, as reported by the capability query.
///
/// Produced once at start-up by whoever owns the GPU context and handed to
/// the subsystems that need to branch on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCapabilities {
    /// Human-readable renderer string (e.g. "Adreno (TM) 640").
    pub renderer: String,
    /// Driver version string.
    pub version: String,
    /// Whether buffers can be persistently and coherently mapped.
    pub persistent_mapping: bool,
    /// Whether linked programs can be extracted and reloaded as binaries.
    pub program_binary: bool,
    /// Largest single buffer the driver will create, in bytes.
    pub max_buffer_size: u64,
    /// Largest texture/render target dimension, in pixels.
    pub max_texture_size: u32,
}

impl GpuCapabilities {
    /// Derives the fingerprint used to invalidate persisted shader binaries.
    pub fn fingerprint(&self) -> GpuFingerprint {
        GpuFingerprint::from_strings(&self.renderer, &self.version)
    }
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self {
            renderer: String::from("unknown"),
            version: String::from("unknown"),
            persistent_mapping: false,
            program_binary: false,
            max_buffer_size: 256 * 1024 * 1024,
            max_texture_size: 4096,
        }
    }
}

/// Identifies a GPU vendor and driver build.
///
/// Shader binaries are only valid for the exact driver that produced them,
/// so a persisted cache is refused when either hash differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GpuFingerprint {
    /// Truncated FNV-1a hash of the renderer string.
    pub vendor_hash: u32,
    /// Truncated FNV-1a hash of the driver version string.
    pub driver_hash: u32,
}

impl GpuFingerprint {
    /// Hashes the renderer and version strings.
    pub fn from_strings(renderer: &str, version: &str) -> Self {
        Self {
            vendor_hash: hash_str(renderer) as u32,
            driver_hash: hash_str(version) as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_driver_version() {
        let mut caps = GpuCapabilities {
            renderer: "Mali-G78".into(),
            version: "OpenGL ES 3.2 v1.r32p1".into(),
            ..Default::default()
        };
        let before = caps.fingerprint();
        caps.version = "OpenGL ES 3.2 v1.r38p0".into();
        let after = caps.fingerprint();

        assert_eq!(before.vendor_hash, after.vendor_hash);
        assert_ne!(before.driver_hash, after.driver_hash);
    }
}
