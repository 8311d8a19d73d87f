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

//! Hot-path lanes of the Velocity layer.
//!
//! A lane runs once or more per frame on the render thread and turns a
//! stream of small requests into fewer, larger driver submissions.

#![warn(missing_docs)]

pub mod batch_lane;

pub use batch_lane::*;
