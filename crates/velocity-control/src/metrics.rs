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

//! Fixed-size sample history.

/// A fixed-capacity ring of the most recent `N` samples.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const N: usize> {
    data: [T; N],
    index: usize,
    count: usize,
}

impl<T: Default + Copy, const N: usize> RingBuffer<T, N> {
    /// Creates a new, empty ring buffer.
    pub fn new() -> Self {
        Self {
            data: [T::default(); N],
            index: 0,
            count: 0,
        }
    }

    /// Pushes a new value, overwriting the oldest if full.
    pub fn push(&mut self, value: T) {
        self.data[self.index] = value;
        self.index = (self.index + 1) % N;
        if self.count < N {
            self.count += 1;
        }
    }

    /// Number of recorded samples, at most `N`.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Forgets every sample.
    pub fn clear(&mut self) {
        self.index = 0;
        self.count = 0;
    }

    /// The most recent sample.
    pub fn latest(&self) -> Option<T> {
        (self.count > 0).then(|| self.data[(self.index + N - 1) % N])
    }

    /// Values in chronological order (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        // Until the ring wraps, the oldest value sits at slot 0.
        let start = if self.count < N { 0 } else { self.index };
        let (left, right) = self.data.split_at(start);
        right.iter().chain(left.iter()).take(self.count)
    }
}

impl<T: Default + Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<f32, N> {
    /// Mean of the recorded samples, 0 when empty.
    ///
    /// Only recorded samples count; unused slots never drag the mean down.
    pub fn average(&self) -> f32 {
        if self.count == 0 {
            return 0.0;
        }
        self.iter().sum::<f32>() / self.count as f32
    }

    /// Population variance of the recorded samples.
    pub fn variance(&self) -> f32 {
        if self.count < 2 {
            return 0.0;
        }
        let avg = self.average();
        let sum_sq: f32 = self.iter().map(|v| (v - avg) * (v - avg)).sum();
        sum_sq / self.count as f32
    }

    /// Smallest recorded sample, 0 when empty.
    pub fn min(&self) -> f32 {
        self.iter().copied().reduce(f32::min).unwrap_or(0.0)
    }

    /// Largest recorded sample, 0 when empty.
    pub fn max(&self) -> f32 {
        self.iter().copied().reduce(f32::max).unwrap_or(0.0)
    }
}
