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

//! Periodic frame time summaries.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Frame statistics over one update interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameWindow {
    /// Frames recorded in the window.
    pub frames: u32,
    /// Mean frame time, in milliseconds.
    pub average_ms: f32,
    /// Longest frame, in milliseconds.
    pub worst_ms: f32,
    /// Frame rate implied by `average_ms`.
    pub fps: f32,
}

/// Accumulates frame times and emits a [`FrameWindow`] once per interval.
#[derive(Debug)]
pub struct TelemetryService {
    last_update: Instant,
    update_interval: Duration,
    frames: u32,
    total_ms: f64,
    worst_ms: f32,
    windows: u64,
    last_window: Option<FrameWindow>,
}

impl TelemetryService {
    /// Creates a new telemetry service with the given update interval.
    pub fn new(update_interval: Duration) -> Self {
        Self {
            last_update: Instant::now(),
            update_interval,
            frames: 0,
            total_ms: 0.0,
            worst_ms: 0.0,
            windows: 0,
            last_window: None,
        }
    }

    /// Adds one frame to the current window.
    pub fn record_frame(&mut self, frame_time_ms: f32) {
        if !frame_time_ms.is_finite() || frame_time_ms < 0.0 {
            return;
        }
        self.frames += 1;
        self.total_ms += f64::from(frame_time_ms);
        self.worst_ms = self.worst_ms.max(frame_time_ms);
    }

    /// Should be called once per frame.
    ///
    /// Closes the window and logs its summary when the interval has
    /// passed and at least one frame was recorded.
    pub fn tick(&mut self) -> Option<FrameWindow> {
        if self.frames == 0 || self.last_update.elapsed() < self.update_interval {
            return None;
        }
        let average_ms = (self.total_ms / f64::from(self.frames)) as f32;
        let window = FrameWindow {
            frames: self.frames,
            average_ms,
            worst_ms: self.worst_ms,
            fps: if average_ms > 0.0 { 1000.0 / average_ms } else { 0.0 },
        };
        log::info!(
            "Frames: {} | avg {:.2} ms ({:.1} fps) | worst {:.2} ms",
            window.frames,
            window.average_ms,
            window.fps,
            window.worst_ms
        );

        self.frames = 0;
        self.total_ms = 0.0;
        self.worst_ms = 0.0;
        self.windows += 1;
        self.last_window = Some(window);
        self.last_update = Instant::now();
        Some(window)
    }

    /// Windows closed so far.
    pub fn windows(&self) -> u64 {
        self.windows
    }

    /// The most recently closed window.
    pub fn last_window(&self) -> Option<FrameWindow> {
        self.last_window
    }

    /// The configured interval.
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }
}

impl Default for TelemetryService {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_summarises_window() {
        let mut service = TelemetryService::new(Duration::ZERO);
        assert_eq!(service.tick(), None);

        service.record_frame(10.0);
        service.record_frame(30.0);
        let window = service.tick().expect("interval elapsed");
        assert_eq!(window.frames, 2);
        assert_eq!(window.average_ms, 20.0);
        assert_eq!(window.worst_ms, 30.0);
        assert_eq!(window.fps, 50.0);
        assert_eq!(service.windows(), 1);

        // The window restarts empty.
        assert_eq!(service.tick(), None);
    }

    #[test]
    fn test_tick_waits_for_interval() {
        let mut service = TelemetryService::new(Duration::from_secs(3600));
        service.record_frame(16.0);
        assert_eq!(service.tick(), None);
        assert_eq!(service.last_window(), None);
    }

    #[test]
    fn test_invalid_samples_are_dropped() {
        let mut service = TelemetryService::new(Duration::ZERO);
        service.record_frame(f32::NAN);
        service.record_frame(-1.0);
        assert_eq!(service.tick(), None);
    }

    #[test]
    fn test_window_serializes() {
        let window = FrameWindow {
            frames: 60,
            average_ms: 16.5,
            worst_ms: 20.0,
            fps: 60.6,
        };
        let json = serde_json::to_value(window).unwrap();
        assert_eq!(json["frames"], 60);
    }
}
