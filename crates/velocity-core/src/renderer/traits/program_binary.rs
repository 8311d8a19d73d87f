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

use crate::renderer::api::{ProgramBinary, ProgramId};
use crate::renderer::error::ResourceError;
use std::fmt::Debug;

/// Extraction and reloading of linked program binaries.
pub trait ProgramBinaryDevice: Send + Sync + Debug + 'static {
    /// Retrieves the driver binary of a linked program.
    /// ## Errors
    /// * `ResourceError::InvalidHandle` - If the program is unknown or not linked.
    /// * `ResourceError::Unsupported` - If the driver exposes no binary formats.
    fn get_program_binary(&self, program: ProgramId) -> Result<ProgramBinary, ResourceError>;

    /// Creates a program from a previously extracted binary.
    /// ## Errors
    /// * `ResourceError::LinkFailed` - If the driver rejects the binary
    ///   (typically after a driver update).
    fn program_from_binary(&self, binary: &ProgramBinary) -> Result<ProgramId, ResourceError>;
}
