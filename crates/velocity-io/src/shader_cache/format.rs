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

//! The on-disk cache file.
//!
//! Layout, all little-endian:
//!
//! | section | size |
//! |---------|------|
//! | header  | 32 bytes |
//! | records | 32 bytes × entry count |
//! | payload | concatenated binaries, located by each record's offset |

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;
use velocity_core::renderer::ProgramBinary;
use velocity_core::GpuFingerprint;

/// File name inside the cache directory.
pub const CACHE_FILE_NAME: &str = "shader_cache.bin";
/// "VELS".
pub const CACHE_MAGIC: u32 = 0x5645_4C53;
/// Bumped whenever the layout changes.
pub const CACHE_VERSION: u32 = 2;
/// Size of the header, in bytes.
pub const HEADER_SIZE: usize = 32;
/// Size of one entry record, in bytes.
pub const RECORD_SIZE: usize = 32;

const STAGES_VERTEX_FRAGMENT: u32 = 0x03;

/// Errors raised while reading, writing or validating a cache file.
#[derive(Debug, Error)]
pub enum CacheFileError {
    /// The file could not be read or written.
    #[error("cache file I/O error: {0}")]
    Io(#[from] io::Error),
    /// The file does not start with the cache magic.
    #[error("bad cache magic 0x{0:08x}")]
    BadMagic(u32),
    /// The file was written by an incompatible version.
    #[error("unsupported cache version {0}")]
    Version(u32),
    /// The file was written for another GPU or driver build.
    #[error("cache built for GPU {found:?}, current GPU is {expected:?}")]
    FingerprintMismatch {
        /// The fingerprint of the running driver.
        expected: GpuFingerprint,
        /// The fingerprint stored in the file.
        found: GpuFingerprint,
    },
    /// A record points outside the file.
    #[error("entry {index} payload {offset}+{size} lies outside the {file_len} byte file")]
    Corrupt {
        /// Position of the bad record.
        index: usize,
        /// Payload offset claimed by the record.
        offset: u32,
        /// Payload size claimed by the record.
        size: u32,
        /// Actual file length.
        file_len: usize,
    },
    /// The payload would not be addressable with 32-bit offsets.
    #[error("cache contents exceed the 4 GiB file format limit")]
    TooLarge,
}

/// The fixed-size file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheFileHeader {
    /// Must equal [`CACHE_MAGIC`].
    pub magic: u32,
    /// Must equal [`CACHE_VERSION`].
    pub version: u32,
    /// GPU and driver the binaries were produced by.
    pub fingerprint: GpuFingerprint,
    /// Unix time of the save, in seconds.
    pub timestamp: u64,
    /// Number of records following the header.
    pub entry_count: u32,
}

impl CacheFileHeader {
    /// Checks magic, version and fingerprint against the running driver.
    pub fn validate(&self, expected: GpuFingerprint) -> Result<(), CacheFileError> {
        if self.magic != CACHE_MAGIC {
            return Err(CacheFileError::BadMagic(self.magic));
        }
        if self.version != CACHE_VERSION {
            return Err(CacheFileError::Version(self.version));
        }
        if self.fingerprint != expected {
            return Err(CacheFileError::FingerprintMismatch {
                expected,
                found: self.fingerprint,
            });
        }
        Ok(())
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.magic)?;
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.fingerprint.vendor_hash)?;
        w.write_u32::<LittleEndian>(self.fingerprint.driver_hash)?;
        w.write_u64::<LittleEndian>(self.timestamp)?;
        w.write_u32::<LittleEndian>(self.entry_count)?;
        w.write_u32::<LittleEndian>(0) // reserved
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let magic = r.read_u32::<LittleEndian>()?;
        let version = r.read_u32::<LittleEndian>()?;
        let vendor_hash = r.read_u32::<LittleEndian>()?;
        let driver_hash = r.read_u32::<LittleEndian>()?;
        let timestamp = r.read_u64::<LittleEndian>()?;
        let entry_count = r.read_u32::<LittleEndian>()?;
        let _reserved = r.read_u32::<LittleEndian>()?;
        Ok(Self {
            magic,
            version,
            fingerprint: GpuFingerprint {
                vendor_hash,
                driver_hash,
            },
            timestamp,
            entry_count,
        })
    }
}

/// One cached program binary together with what identifies its sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBinary {
    /// Program key derived from the vertex and fragment sources.
    pub source_hash: u64,
    /// Vertex source length, used to reject hash collisions.
    pub vertex_len: u32,
    /// Fragment source length, used to reject hash collisions.
    pub fragment_len: u32,
    /// The driver binary.
    pub binary: ProgramBinary,
}

/// A decoded cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFile {
    /// The file header.
    pub header: CacheFileHeader,
    /// Entries in file order.
    pub entries: Vec<CachedBinary>,
}

/// Serializes `entries` into the cache file layout.
pub fn encode(
    fingerprint: GpuFingerprint,
    timestamp: u64,
    entries: &[&CachedBinary],
) -> Result<Vec<u8>, CacheFileError> {
    let entry_count = u32::try_from(entries.len()).map_err(|_| CacheFileError::TooLarge)?;
    let payload_len: usize = entries.iter().map(|e| e.binary.len()).sum();
    let table_end = HEADER_SIZE + RECORD_SIZE * entries.len();

    let mut out = Vec::with_capacity(table_end + payload_len);
    CacheFileHeader {
        magic: CACHE_MAGIC,
        version: CACHE_VERSION,
        fingerprint,
        timestamp,
        entry_count,
    }
    .write_to(&mut out)?;

    let mut data_offset = table_end;
    for entry in entries {
        let offset = u32::try_from(data_offset).map_err(|_| CacheFileError::TooLarge)?;
        let size = u32::try_from(entry.binary.len()).map_err(|_| CacheFileError::TooLarge)?;
        out.write_u64::<LittleEndian>(entry.source_hash)?;
        out.write_u32::<LittleEndian>(entry.binary.format)?;
        out.write_u32::<LittleEndian>(size)?;
        out.write_u32::<LittleEndian>(offset)?;
        out.write_u32::<LittleEndian>(entry.vertex_len)?;
        out.write_u32::<LittleEndian>(entry.fragment_len)?;
        out.write_u32::<LittleEndian>(STAGES_VERTEX_FRAGMENT)?;
        data_offset += entry.binary.len();
    }
    if u32::try_from(data_offset).is_err() {
        return Err(CacheFileError::TooLarge);
    }

    for entry in entries {
        out.write_all(&entry.binary.data)?;
    }
    Ok(out)
}

/// Reads only the header, without checking it.
pub fn decode_header(bytes: &[u8]) -> Result<CacheFileHeader, CacheFileError> {
    Ok(CacheFileHeader::read_from(&mut Cursor::new(bytes))?)
}

/// Parses a whole cache file.
///
/// Only the structure is checked here; call [`CacheFileHeader::validate`]
/// to compare the fingerprint.
pub fn decode(bytes: &[u8]) -> Result<CacheFile, CacheFileError> {
    let mut cursor = Cursor::new(bytes);
    let header = CacheFileHeader::read_from(&mut cursor)?;
    if header.magic != CACHE_MAGIC {
        return Err(CacheFileError::BadMagic(header.magic));
    }
    if header.version != CACHE_VERSION {
        return Err(CacheFileError::Version(header.version));
    }

    let count = header.entry_count as usize;
    if count.saturating_mul(RECORD_SIZE) > bytes.len() - HEADER_SIZE {
        return Err(CacheFileError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("record table for {count} entries is truncated"),
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let source_hash = cursor.read_u64::<LittleEndian>()?;
        let format = cursor.read_u32::<LittleEndian>()?;
        let size = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u32::<LittleEndian>()?;
        let vertex_len = cursor.read_u32::<LittleEndian>()?;
        let fragment_len = cursor.read_u32::<LittleEndian>()?;
        let _stages = cursor.read_u32::<LittleEndian>()?;

        let start = offset as usize;
        let data = start
            .checked_add(size as usize)
            .and_then(|end| bytes.get(start..end))
            .filter(|_| start >= HEADER_SIZE + RECORD_SIZE * count)
            .ok_or(CacheFileError::Corrupt {
                index,
                offset,
                size,
                file_len: bytes.len(),
            })?;

        entries.push(CachedBinary {
            source_hash,
            vertex_len,
            fragment_len,
            binary: ProgramBinary {
                format,
                data: data.to_vec(),
            },
        });
    }

    Ok(CacheFile { header, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64, bytes: &[u8]) -> CachedBinary {
        CachedBinary {
            source_hash: hash,
            vertex_len: 10,
            fragment_len: 20,
            binary: ProgramBinary {
                format: 0x8740,
                data: bytes.to_vec(),
            },
        }
    }

    const FP: GpuFingerprint = GpuFingerprint {
        vendor_hash: 0xdead_beef,
        driver_hash: 0x0bad_f00d,
    };

    #[test]
    fn test_layout_matches_documented_offsets() {
        let a = entry(1, b"abc");
        let b = entry(2, b"defgh");
        let bytes = encode(FP, 1_700_000_000, &[&a, &b]).unwrap();

        assert_eq!(bytes.len(), HEADER_SIZE + 2 * RECORD_SIZE + 8);
        assert_eq!(&bytes[0..4], &CACHE_MAGIC.to_le_bytes());
        assert_eq!(&bytes[0..4], b"SLEV");
        // Second record's data offset points just past the first payload.
        let second_offset = &bytes[HEADER_SIZE + RECORD_SIZE + 16..HEADER_SIZE + RECORD_SIZE + 20];
        assert_eq!(second_offset, &((HEADER_SIZE + 2 * RECORD_SIZE + 3) as u32).to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 5..], b"defgh");

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.header.entry_count, 2);
        assert_eq!(decoded.header.timestamp, 1_700_000_000);
        assert_eq!(decoded.entries, vec![a, b]);
    }

    #[test]
    fn test_validate_rejects_foreign_fingerprint() {
        let bytes = encode(FP, 0, &[]).unwrap();
        let header = decode_header(&bytes).unwrap();
        assert!(header.validate(FP).is_ok());

        let other = GpuFingerprint {
            driver_hash: 1,
            ..FP
        };
        assert!(matches!(
            header.validate(other),
            Err(CacheFileError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_magic_and_truncation() {
        let a = entry(1, b"payload");
        let mut bytes = encode(FP, 0, &[&a]).unwrap();

        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            decode(truncated),
            Err(CacheFileError::Corrupt { index: 0, .. })
        ));
        assert!(matches!(
            decode(&bytes[..HEADER_SIZE + 4]),
            Err(CacheFileError::Io(_))
        ));

        bytes[0] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(CacheFileError::BadMagic(_))));
    }
}
