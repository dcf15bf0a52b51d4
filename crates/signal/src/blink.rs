// Blink detection from eye-region brightness.
//
// A closed lid reflects light differently from an open eye, so a blink shows
// up as a brightness spike against the viewer's own recent baseline. The
// baseline is a rolling mean over the last `window_size` frames; a frame is a
// raw blink when it is brighter than `baseline * threshold_multiplier`.
// Accepted state changes are debounced so single noisy frames don't flicker.

use abyss_core::BlinkConfig;
use image::RgbaImage;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// RGBA pixels of one eye region at provider-native resolution.
pub type EyePatch = RgbaImage;

/// Both eye regions for a single frame. A side is `None` when the provider
/// could not locate it.
#[derive(Debug, Clone, Default)]
pub struct EyePatches {
    pub left: Option<EyePatch>,
    pub right: Option<EyePatch>,
}

impl EyePatches {
    pub fn new(left: EyePatch, right: EyePatch) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
        }
    }
}

/// Mean grayscale `(R + G + B) / 3` over every `stride`-th pixel.
/// `None` for an empty patch.
pub fn patch_brightness(patch: &EyePatch, stride: usize) -> Option<f64> {
    let (total, sampled) = patch
        .pixels()
        .step_by(stride.max(1))
        .fold((0.0_f64, 0_usize), |(total, sampled), pixel| {
            let [r, g, b, _] = pixel.0;
            (
                total + (f64::from(r) + f64::from(g) + f64::from(b)) / 3.0,
                sampled + 1,
            )
        });

    if sampled == 0 {
        None
    } else {
        Some(total / sampled as f64)
    }
}

/// Bounded FIFO of recent per-frame brightness values.
#[derive(Debug, Clone)]
pub struct BrightnessWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl BrightnessWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Clone)]
pub struct BlinkDetector {
    window: BrightnessWindow,
    threshold_multiplier: f64,
    debounce: Duration,
    sample_stride: usize,
    blinking: bool,
    last_change: Option<Instant>,
}

impl BlinkDetector {
    pub fn new(config: &BlinkConfig) -> Self {
        Self {
            window: BrightnessWindow::new(config.window_size),
            threshold_multiplier: config.threshold_multiplier,
            debounce: Duration::from_millis(config.debounce_ms),
            sample_stride: config.sample_stride,
            blinking: false,
            last_change: None,
        }
    }

    /// Currently reported state
    pub fn is_blinking(&self) -> bool {
        self.blinking
    }

    pub fn window(&self) -> &BrightnessWindow {
        &self.window
    }

    /// Feed one frame. Returns `None` and keeps the previous state when either
    /// eye is missing; a missing eye is not evidence of a blink.
    pub fn process(&mut self, patches: &EyePatches, now: Instant) -> Option<bool> {
        let left = patches
            .left
            .as_ref()
            .and_then(|p| patch_brightness(p, self.sample_stride));
        let right = patches
            .right
            .as_ref()
            .and_then(|p| patch_brightness(p, self.sample_stride));

        match (left, right) {
            (Some(left), Some(right)) => Some(self.observe((left + right) / 2.0, now)),
            _ => {
                tracing::trace!("Eye patch missing, keeping blink state {}", self.blinking);
                None
            }
        }
    }

    /// Feed one averaged brightness value and return the debounced state.
    pub fn observe(&mut self, brightness: f64, now: Instant) -> bool {
        self.window.push(brightness);
        let baseline = self.window.mean().unwrap_or(brightness);
        let raw_blink = brightness > baseline * self.threshold_multiplier;

        if raw_blink != self.blinking {
            let settled = self
                .last_change
                .map_or(true, |at| now.saturating_duration_since(at) >= self.debounce);
            if settled {
                self.blinking = raw_blink;
                self.last_change = Some(now);
            }
        }

        self.blinking
    }

    /// Forget the baseline and the reported state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.blinking = false;
        self.last_change = None;
    }
}
