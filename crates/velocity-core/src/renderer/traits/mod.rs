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

//! The narrow driver contracts consumed by the optimization subsystems.

mod buffer_device;
mod command_submitter;
mod fence_sync;
mod program_binary;
mod render_target;

pub use self::buffer_device::*;
pub use self::command_submitter::*;
pub use self::fence_sync::*;
pub use self::program_binary::*;
pub use self::render_target::*;
