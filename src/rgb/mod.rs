//! LED lighting: colours, per-mode generators, frames and the producer task.

pub mod color;
pub mod effects;
pub mod engine;
pub mod frame;

pub use color::Rgb;
pub use engine::{ExternalFrames, RgbServiceProvider, RgbSetup};
pub use frame::LedFrame;
