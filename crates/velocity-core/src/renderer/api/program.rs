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

/// A driver-specific program binary, as returned by the program-binary query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramBinary {
    /// Driver-defined binary format tag.
    pub format: u32,
    /// The opaque binary blob.
    pub data: Vec<u8>,
}

impl ProgramBinary {
    /// Size of the blob, in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
