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

//! Linked shader program binaries, keyed by their sources.
//!
//! Compiling and linking GLSL is one of the slowest things a mobile driver
//! does. Once a program has been linked, its driver binary is kept here and
//! later lookups for the same sources reload the binary instead.
//!
//! The in-memory cache is bounded both in bytes and in entries and evicts in
//! least-recently-used order. The whole cache can be saved to and reloaded
//! from disk; a file written for another GPU or driver is ignored.

pub mod format;

pub use self::format::{CacheFileError, CachedBinary, CACHE_FILE_NAME};

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use velocity_core::hash::program_key;
use velocity_core::renderer::{ProgramBinaryDevice, ProgramId, ResourceError};
use velocity_core::{GpuCapabilities, GpuFingerprint, VelocityConfig};

/// Slot capacity of the cache.
pub const MAX_CACHED_PROGRAMS: usize = 256;

/// Default byte budget of the cache.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Construction parameters for [`ShaderBinaryCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderCacheSettings {
    /// Byte budget across all binaries.
    pub max_bytes: u64,
    /// Maximum number of cached programs.
    pub max_entries: usize,
    /// Directory holding [`CACHE_FILE_NAME`]; `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
}

impl ShaderCacheSettings {
    /// Derives the settings from the runtime configuration.
    pub fn from_config(config: &VelocityConfig) -> Self {
        Self {
            max_bytes: config.shader_cache_max_size_bytes,
            cache_dir: config.shader_cache_path.clone(),
            ..Self::default()
        }
    }
}

impl Default for ShaderCacheSettings {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_entries: MAX_CACHED_PROGRAMS,
            cache_dir: None,
        }
    }
}

/// Counters reported by [`ShaderBinaryCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShaderCacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that fell through to compilation.
    pub misses: u64,
    /// Programs currently cached.
    pub entry_count: usize,
    /// Bytes of binaries currently cached.
    pub total_bytes: u64,
}

impl ShaderCacheStats {
    /// Fraction of lookups that hit, in `[0, 1]`.
    pub fn hit_rate(&self) -> f32 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f32 / total as f32
        }
    }
}

#[derive(Debug)]
struct ShaderCacheEntry {
    binary: CachedBinary,
    hit_count: u64,
    last_used: u64,
}

impl ShaderCacheEntry {
    fn size(&self) -> u64 {
        self.binary.binary.len() as u64
    }

    fn matches(&self, vertex_len: u32, fragment_len: u32) -> bool {
        self.binary.vertex_len == vertex_len && self.binary.fragment_len == fragment_len
    }
}

#[derive(Debug, Default)]
struct CacheState {
    slots: Vec<Option<ShaderCacheEntry>>,
    index: HashMap<u64, usize>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    clock: u64,
}

impl CacheState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&self, key: u64) -> Option<(usize, &ShaderCacheEntry)> {
        let slot = *self.index.get(&key)?;
        Some((slot, self.slots.get(slot)?.as_ref()?))
    }

    fn remove(&mut self, slot: usize) -> Option<ShaderCacheEntry> {
        let entry = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&entry.binary.source_hash);
        self.total_bytes -= entry.size();
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|e| (slot, e.last_used)))
            .min_by_key(|&(_, last_used)| last_used)
            .map(|(slot, _)| slot);
        match victim.and_then(|slot| self.remove(slot)) {
            Some(entry) => {
                log::debug!(
                    "Evicted shader {:016x} ({} bytes, {} hits)",
                    entry.binary.source_hash,
                    entry.size(),
                    entry.hit_count
                );
                true
            }
            None => false,
        }
    }

    /// Evicts until `size` more bytes and one more entry fit.
    fn make_room(&mut self, size: u64, settings: &ShaderCacheSettings) {
        while self.total_bytes + size > settings.max_bytes
            || self.index.len() >= settings.max_entries
        {
            if !self.evict_lru() {
                break;
            }
        }
    }

    fn insert(&mut self, binary: CachedBinary, settings: &ShaderCacheSettings) -> bool {
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None if self.slots.len() < settings.max_entries => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return false,
        };
        let now = self.tick();
        let entry = ShaderCacheEntry {
            binary,
            hit_count: 0,
            last_used: now,
        };
        self.total_bytes += entry.size();
        self.index.insert(entry.binary.source_hash, slot);
        self.slots[slot] = Some(entry);
        true
    }
}

/// Bounded LRU cache of linked program binaries.
///
/// Safe to share between a loading thread that stores programs and the
/// render thread that looks them up.
#[derive(Debug)]
pub struct ShaderBinaryCache {
    device: Arc<dyn ProgramBinaryDevice>,
    settings: ShaderCacheSettings,
    fingerprint: GpuFingerprint,
    enabled: bool,
    state: Mutex<CacheState>,
}

fn source_len(source: &str) -> u32 {
    u32::try_from(source.len()).unwrap_or(u32::MAX)
}

impl ShaderBinaryCache {
    /// Creates an empty cache.
    ///
    /// When the driver cannot export program binaries the cache stays
    /// disabled: lookups miss and stores are ignored.
    pub fn new(
        device: Arc<dyn ProgramBinaryDevice>,
        caps: &GpuCapabilities,
        settings: ShaderCacheSettings,
    ) -> Self {
        let enabled = caps.program_binary && settings.max_bytes > 0 && settings.max_entries > 0;
        if enabled {
            log::info!(
                "Shader cache initialized: {} KB budget, {} slots",
                settings.max_bytes / 1024,
                settings.max_entries
            );
        } else {
            log::info!("Program binaries unavailable, shader cache disabled");
        }
        Self {
            device,
            fingerprint: caps.fingerprint(),
            settings,
            enabled,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the cache stores anything at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The settings the cache was created with.
    pub fn settings(&self) -> &ShaderCacheSettings {
        &self.settings
    }

    /// The fingerprint persisted files are checked against.
    pub fn fingerprint(&self) -> GpuFingerprint {
        self.fingerprint
    }

    /// Full path of the cache file, if persistence is configured.
    pub fn cache_file_path(&self) -> Option<PathBuf> {
        self.settings
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(CACHE_FILE_NAME))
    }

    /// Whether a binary for these sources is cached.
    pub fn contains(&self, vertex_source: &str, fragment_source: &str) -> bool {
        let key = program_key(vertex_source, fragment_source);
        self.state().lookup(key).is_some_and(|(_, entry)| {
            entry.matches(source_len(vertex_source), source_len(fragment_source))
        })
    }

    /// Looks up the program linked from these sources.
    ///
    /// On a hit the cached binary is reloaded into a fresh program. If the
    /// driver rejects the binary, the entry is purged and the lookup counts
    /// as a miss.
    pub fn get(&self, vertex_source: &str, fragment_source: &str) -> Option<ProgramId> {
        let key = program_key(vertex_source, fragment_source);
        let (vertex_len, fragment_len) = (source_len(vertex_source), source_len(fragment_source));

        let mut state = self.state();
        if !self.enabled {
            state.misses += 1;
            return None;
        }

        let found = state
            .lookup(key)
            .map(|(slot, entry)| (slot, entry.matches(vertex_len, fragment_len)));
        let slot = match found {
            Some((slot, true)) => slot,
            Some((_, false)) => {
                log::debug!("Shader hash {key:016x} collides with a different program");
                state.misses += 1;
                return None;
            }
            None => {
                state.misses += 1;
                return None;
            }
        };

        let loaded = match state.slots[slot].as_ref() {
            Some(entry) => self.device.program_from_binary(&entry.binary.binary),
            None => Err(ResourceError::NotFound),
        };

        match loaded {
            Ok(program) => {
                let now = state.tick();
                if let Some(entry) = state.slots[slot].as_mut() {
                    entry.hit_count += 1;
                    entry.last_used = now;
                }
                state.hits += 1;
                log::trace!("Shader cache hit for {key:016x}");
                Some(program)
            }
            Err(e) => {
                log::warn!("Cached shader binary {key:016x} invalid, removing: {e}");
                state.remove(slot);
                state.misses += 1;
                None
            }
        }
    }

    /// Caches the binary of `program`, linked from these sources.
    ///
    /// Returns `Ok(false)` when nothing was stored: the cache is disabled,
    /// the sources are already cached, or the binary alone exceeds the byte
    /// budget. Least recently used entries are evicted to make room.
    /// ## Errors
    /// * `ResourceError` - If the driver cannot export the program binary.
    pub fn store(
        &self,
        vertex_source: &str,
        fragment_source: &str,
        program: ProgramId,
    ) -> Result<bool, ResourceError> {
        if !self.enabled {
            return Ok(false);
        }
        let key = program_key(vertex_source, fragment_source);
        let (vertex_len, fragment_len) = (source_len(vertex_source), source_len(fragment_source));

        let cached = |state: &CacheState| {
            state
                .lookup(key)
                .is_some_and(|(_, entry)| entry.matches(vertex_len, fragment_len))
        };
        if cached(&*self.state()) {
            return Ok(false);
        }

        let binary = self.device.get_program_binary(program)?;
        let size = binary.len() as u64;
        if binary.is_empty() {
            return Ok(false);
        }
        if size > self.settings.max_bytes {
            log::warn!(
                "Shader binary of {} bytes exceeds the {} byte cache budget, not cached",
                size,
                self.settings.max_bytes
            );
            return Ok(false);
        }

        let mut state = self.state();
        // Another thread may have stored the same sources in the meantime.
        if cached(&*state) {
            return Ok(false);
        }
        if let Some((slot, _)) = state.lookup(key) {
            state.remove(slot);
        }
        state.make_room(size, &self.settings);
        let stored = state.insert(
            CachedBinary {
                source_hash: key,
                vertex_len,
                fragment_len,
                binary,
            },
            &self.settings,
        );
        if stored {
            log::debug!("Cached shader {key:016x} ({size} bytes)");
        }
        Ok(stored)
    }

    /// Drops every entry and resets the statistics.
    pub fn clear(&self) {
        *self.state() = CacheState::default();
        log::info!("Shader cache cleared");
    }

    /// Current statistics.
    pub fn stats(&self) -> ShaderCacheStats {
        let state = self.state();
        ShaderCacheStats {
            hits: state.hits,
            misses: state.misses,
            entry_count: state.index.len(),
            total_bytes: state.total_bytes,
        }
    }

    /// Zeroes the hit and miss counters.
    pub fn reset_stats(&self) {
        let mut state = self.state();
        state.hits = 0;
        state.misses = 0;
    }

    /// Saves to the configured cache directory, if any.
    ///
    /// Returns the number of programs written.
    pub fn save_to_disk(&self) -> Result<usize, CacheFileError> {
        match self.cache_file_path() {
            Some(path) if self.enabled => self.save_to(path),
            _ => Ok(0),
        }
    }

    /// Persists pending entries. Same as [`Self::save_to_disk`].
    pub fn flush(&self) -> Result<usize, CacheFileError> {
        self.save_to_disk()
    }

    /// Loads from the configured cache directory, if any.
    ///
    /// Never fails: a missing, foreign or corrupt file leaves the cache cold.
    pub fn load_from_disk(&self) -> usize {
        match self.cache_file_path() {
            Some(path) if self.enabled => self.load_from(path).unwrap_or(0),
            _ => 0,
        }
    }

    /// Writes every cached binary to `path`.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so a crash mid-save never leaves a torn cache behind.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<usize, CacheFileError> {
        let path = path.as_ref();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let (bytes, count) = {
            let state = self.state();
            let entries: Vec<&CachedBinary> = state
                .slots
                .iter()
                .flatten()
                .map(|entry| &entry.binary)
                .collect();
            (
                format::encode(self.fingerprint, timestamp, &entries)?,
                entries.len(),
            )
        };

        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, path)?;

        log::info!("Saved {} shaders to disk cache {}", count, path.display());
        Ok(count)
    }

    /// Loads binaries from `path` into the cache.
    ///
    /// The file is refused wholesale when its header does not match this
    /// GPU and driver. Entries already in memory are kept and never evicted
    /// by the load; entries that do not fit the remaining budget are skipped.
    pub fn load_from(&self, path: impl AsRef<Path>) -> Result<usize, CacheFileError> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No shader cache at {}", path.display());
                return Ok(0);
            }
            Err(e) => {
                log::warn!("Failed to read shader cache {}: {e}", path.display());
                return Err(e.into());
            }
        };

        let file = format::decode(&bytes)
            .and_then(|file| file.header.validate(self.fingerprint).map(|()| file))
            .map_err(|e| {
                match &e {
                    CacheFileError::FingerprintMismatch { .. } | CacheFileError::Version(_) => {
                        log::info!("Shader cache invalidated (GPU or driver changed): {e}")
                    }
                    _ => log::warn!("Ignoring corrupt shader cache {}: {e}", path.display()),
                }
                e
            })?;

        let mut state = self.state();
        let mut loaded = 0;
        for entry in file.entries {
            let size = entry.binary.len() as u64;
            let full = state.total_bytes + size > self.settings.max_bytes
                || state.index.len() >= self.settings.max_entries;
            if full || entry.binary.is_empty() || state.lookup(entry.source_hash).is_some() {
                continue;
            }
            if state.insert(entry, &self.settings) {
                loaded += 1;
            }
        }

        log::info!("Loaded {} cached shaders from disk", loaded);
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use velocity_core::renderer::ProgramBinary;

    #[derive(Debug, Default)]
    struct MockProgramDevice {
        next: AtomicU32,
        binaries: Mutex<Map<u32, ProgramBinary>>,
        reject_binaries: AtomicBool,
    }

    impl MockProgramDevice {
        fn link(&self, size: usize) -> ProgramId {
            let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            let binary = ProgramBinary {
                format: 0x8740,
                data: vec![id as u8; size],
            };
            self.binaries.lock().unwrap().insert(id, binary);
            ProgramId(id)
        }
    }

    impl ProgramBinaryDevice for MockProgramDevice {
        fn get_program_binary(&self, program: ProgramId) -> Result<ProgramBinary, ResourceError> {
            self.binaries
                .lock()
                .unwrap()
                .get(&program.0)
                .cloned()
                .ok_or(ResourceError::InvalidHandle)
        }

        fn program_from_binary(&self, binary: &ProgramBinary) -> Result<ProgramId, ResourceError> {
            if self.reject_binaries.load(Ordering::Relaxed) {
                return Err(ResourceError::LinkFailed("driver updated".into()));
            }
            let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
            self.binaries.lock().unwrap().insert(id, binary.clone());
            Ok(ProgramId(id))
        }
    }

    fn caps() -> GpuCapabilities {
        GpuCapabilities {
            program_binary: true,
            ..Default::default()
        }
    }

    fn cache_with(settings: ShaderCacheSettings) -> (ShaderBinaryCache, Arc<MockProgramDevice>) {
        let device = Arc::new(MockProgramDevice::default());
        let cache = ShaderBinaryCache::new(device.clone(), &caps(), settings);
        (cache, device)
    }

    fn slots(max_entries: usize) -> ShaderCacheSettings {
        ShaderCacheSettings {
            max_entries,
            ..Default::default()
        }
    }

    const VS: [&str; 3] = ["vs_a", "vs_b", "vs_c"];
    const FS: &str = "void main() { gl_FragColor = vec4(1.0); }";

    #[test]
    fn test_store_then_get_hits() {
        let (cache, device) = cache_with(ShaderCacheSettings::default());
        assert!(cache.get(VS[0], FS).is_none());

        let program = device.link(128);
        assert!(cache.store(VS[0], FS, program).unwrap());
        assert!(!cache.store(VS[0], FS, program).unwrap());

        assert!(cache.get(VS[0], FS).is_some());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 128);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_get_refreshes_lru_position() {
        let (cache, device) = cache_with(slots(2));

        cache.store(VS[0], FS, device.link(16)).unwrap();
        cache.store(VS[1], FS, device.link(16)).unwrap();
        assert!(cache.get(VS[0], FS).is_some());
        cache.store(VS[2], FS, device.link(16)).unwrap();

        assert!(cache.contains(VS[0], FS));
        assert!(!cache.contains(VS[1], FS));
        assert!(cache.contains(VS[2], FS));
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let (cache, device) = cache_with(slots(2));
        for vs in VS {
            cache.store(vs, FS, device.link(16)).unwrap();
        }
        assert!(!cache.contains(VS[0], FS));
        assert_eq!(cache.stats().entry_count, 2);
    }

    #[test]
    fn test_byte_budget_is_never_exceeded() {
        let (cache, device) = cache_with(ShaderCacheSettings {
            max_bytes: 1000,
            ..Default::default()
        });

        for i in 0..20 {
            let vs = format!("vs_{i}");
            cache.store(&vs, FS, device.link(100 + i * 37)).unwrap();
            assert!(cache.stats().total_bytes <= 1000);
        }

        // A binary larger than the whole budget is refused outright.
        assert!(!cache.store("huge", FS, device.link(1001)).unwrap());
        assert!(cache.stats().entry_count > 0);
    }

    #[test]
    fn test_rejected_binary_is_purged() {
        let (cache, device) = cache_with(ShaderCacheSettings::default());
        cache.store(VS[0], FS, device.link(64)).unwrap();

        device.reject_binaries.store(true, Ordering::Relaxed);
        assert!(cache.get(VS[0], FS).is_none());
        assert!(!cache.contains(VS[0], FS));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entry_count), (0, 1, 0));
        assert_eq!(stats.total_bytes, 0);
    }

    #[test]
    fn test_length_mismatch_is_treated_as_collision() {
        let (cache, device) = cache_with(ShaderCacheSettings::default());
        cache.store(VS[0], FS, device.link(64)).unwrap();

        // Forge an entry under the same key but different lengths.
        {
            let mut state = cache.state();
            let (slot, _) = state.lookup(program_key(VS[0], FS)).unwrap();
            if let Some(entry) = state.slots[slot].as_mut() {
                entry.binary.vertex_len += 1;
            }
        }
        assert!(cache.get(VS[0], FS).is_none());
        assert!(cache.store(VS[0], FS, device.link(64)).unwrap());
        assert!(cache.get(VS[0], FS).is_some());
        assert_eq!(cache.stats().entry_count, 1);
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let device = Arc::new(MockProgramDevice::default());
        let cache = ShaderBinaryCache::new(
            device.clone(),
            &GpuCapabilities::default(),
            ShaderCacheSettings::default(),
        );

        assert!(!cache.is_enabled());
        assert!(!cache.store(VS[0], FS, device.link(8)).unwrap());
        assert!(cache.get(VS[0], FS).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_clear_resets_entries_and_counters() {
        let (cache, device) = cache_with(ShaderCacheSettings::default());
        cache.store(VS[0], FS, device.link(8)).unwrap();
        cache.get(VS[0], FS);
        cache.get(VS[1], FS);

        cache.clear();
        assert_eq!(cache.stats(), ShaderCacheStats::default());
    }

    #[test]
    fn test_concurrent_store_and_get() {
        let (cache, device) = cache_with(slots(64));
        let cache = Arc::new(cache);

        let programs: Vec<_> = (0..32).map(|_| device.link(32)).collect();
        let writer = {
            let cache = Arc::clone(&cache);
            let programs = programs.clone();
            std::thread::spawn(move || {
                for (i, program) in programs.into_iter().enumerate() {
                    cache.store(&format!("vs_{i}"), FS, program).unwrap();
                }
            })
        };
        for i in 0..32 {
            let _ = cache.get(&format!("vs_{i}"), FS);
        }
        writer.join().unwrap();

        assert_eq!(cache.stats().entry_count, 32);
        for i in 0..32 {
            assert!(cache.get(&format!("vs_{i}"), FS).is_some());
        }
    }
}
