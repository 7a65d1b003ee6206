//! Boundary to the hand-tracking stream.
//!
//! The tracking service reports frames on its own clock while the engine
//! ticks on a fixed timeline. This context keeps a bounded frame history and
//! answers "which frame belongs to this fixed-timeline instant" by
//! timestamp-nearest search, using a smoothed estimate of the offset between
//! the two clocks.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::components::Frame;

/// Tracking context settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Bound on the frame history searched for fixed-timeline lookups
    pub history_depth: usize,
    /// Smoothing delay for the service-to-fixed-timeline offset, in seconds
    pub offset_smoothing_delay: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        TrackingConfig {
            history_depth: 60,
            offset_smoothing_delay: 0.1,
        }
    }
}

/// Exponentially smoothed scalar, used for the clock offset.
#[derive(Debug, Clone, Copy, Default)]
struct SmoothedFloat {
    value: f64,
    initialized: bool,
}

impl SmoothedFloat {
    fn update(&mut self, target: f64, dt: f32, delay: f32) {
        if !self.initialized {
            self.value = target;
            self.initialized = true;
            return;
        }
        let alpha = dt as f64 / (delay as f64 + dt as f64);
        self.value += (target - self.value) * alpha;
    }
}

/// Bounded history of tracking frames with fixed-timeline lookup.
#[derive(Debug, Default)]
pub struct TrackingContext {
    config: TrackingConfig,
    /// Newest frame at the back.
    history: VecDeque<Frame>,
    offset: SmoothedFloat,
}

impl TrackingContext {
    /// Create a tracking context with the given settings
    pub fn new(config: TrackingConfig) -> TrackingContext {
        TrackingContext {
            config,
            history: VecDeque::with_capacity(config.history_depth),
            offset: SmoothedFloat::default(),
        }
    }

    /// Record a frame arriving from the tracking service. The oldest frame
    /// falls out once the history is full.
    pub fn push_frame(&mut self, frame: Frame) {
        while self.history.len() >= self.config.history_depth.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(frame);
    }

    /// The most recent frame, if any
    pub fn current_frame(&self) -> Option<&Frame> {
        self.history.back()
    }

    /// Observe the offset between the service clock and the fixed timeline.
    /// Call once per render frame with the frame delta.
    pub fn record_offset(&mut self, service_time: f64, fixed_time: f64, dt: f32) {
        self.offset.update(
            service_time - fixed_time,
            dt,
            self.config.offset_smoothing_delay,
        );
    }

    /// The frame whose timestamp is nearest the given fixed-timeline instant.
    ///
    /// Searches newest to oldest and terminates as soon as the distance stops
    /// improving: frames arrive in order, so nothing older can be closer.
    pub fn fixed_frame(&self, fixed_time: f64) -> Option<&Frame> {
        let corrected = fixed_time + self.offset.value;

        let mut best: Option<&Frame> = None;
        for frame in self.history.iter().rev() {
            match best {
                None => best = Some(frame),
                Some(closest) => {
                    if (frame.timestamp - corrected).abs()
                        < (closest.timestamp - corrected).abs()
                    {
                        best = Some(frame);
                    } else {
                        break;
                    }
                }
            }
        }
        best
    }
}
