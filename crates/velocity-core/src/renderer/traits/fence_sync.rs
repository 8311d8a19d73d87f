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

use crate::renderer::api::{FenceId, FenceStatus};
use crate::renderer::error::ResourceError;
use std::fmt::Debug;
use std::time::Duration;

/// CPU/GPU timeline synchronization.
pub trait FenceSync: Send + Sync + Debug + 'static {
    /// Inserts a fence after every command submitted so far.
    fn insert_fence(&self) -> Result<FenceId, ResourceError>;

    /// Blocks until the fence is signaled or `timeout` elapses.
    fn client_wait(&self, fence: FenceId, timeout: Duration) -> FenceStatus;

    /// Releases a fence. Unknown fences are ignored.
    fn delete_fence(&self, fence: FenceId);
}
