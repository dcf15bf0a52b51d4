// Abyss Signal Processing
//
// Frame-level signal shaping: blink detection from eye-patch brightness and
// leading-edge rate limiting for outbound telemetry.

pub mod blink;
pub mod throttle;

pub use blink::{patch_brightness, BlinkDetector, BrightnessWindow, EyePatch, EyePatches};
pub use throttle::{limit, RateLimiter, Throttled};
