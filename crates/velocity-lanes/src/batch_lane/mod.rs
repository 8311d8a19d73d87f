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

//! Draw call batching.
//!
//! Commands are buffered for the frame, sorted so that commands sharing the
//! same [`BatchKey`] become adjacent, and each run of compatible commands is
//! submitted after binding its state once.

mod batcher;
mod command;
mod key;

pub use batcher::*;
pub use command::*;
pub use key::*;
