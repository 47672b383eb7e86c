//! Sign language recognition from hand keypoint sequences.
//!
//! # Pipeline
//!
//! A hand landmark detector turns every camera frame into up to two [`hand::Hand`]s. The
//! [`keypoints`] module flattens them into a fixed-size [`FrameVector`], and [`sequence`] fits a
//! recording (or the rolling [`window::Window`] of a live session) to exactly [`SEQ_LEN`] frames
//! before [`normalize`] rescales every hand to its own bounding box. The resulting
//! [`sequence::Sequence`] is what the [`classifier`] consumes.
//!
//! Dataset preparation, offline evaluation and the HTTP server all go through
//! [`sequence::prepare`], so the classifier sees identical preprocessing no matter where a sequence
//! came from. Whenever that routine changes, [`PREPROCESSING_VERSION`] has to be bumped.
//!
//! # Environment Variables
//!
//! * `RUST_LOG`: overrides the log filter set up by [`init_logger!`].
//! * `PORT`, `HANDSIGN_MODEL`, `HANDSIGN_CLASSES`, `HANDSIGN_HAND_MODEL`: override the
//!   corresponding [`config::Config`] fields.

use log::LevelFilter;

pub mod classifier;
pub mod config;
pub mod dataset;
pub mod hand;
pub mod image;
pub mod keypoints;
pub mod labels;
pub mod nn;
pub mod normalize;
pub mod recognizer;
pub mod sequence;
pub mod server;
pub mod timer;
pub mod window;

#[cfg(test)]
mod test;

pub use keypoints::FrameVector;

/// Number of landmarks the hand landmark detector reports per hand.
pub const NUM_LANDMARKS: usize = 21;

/// Number of hand slots in a [`FrameVector`].
pub const NUM_HANDS: usize = 2;

/// Number of `f32`s describing one hand (21 `(x, y, z)` triples).
pub const HAND_LEN: usize = NUM_LANDMARKS * 3;

/// Number of `f32`s in a [`FrameVector`].
pub const FRAME_LEN: usize = HAND_LEN * NUM_HANDS;

/// Number of frames in a [`sequence::Sequence`].
pub const SEQ_LEN: usize = 40;

/// Default number of buffered frames required before a live session is classified.
pub const WARMUP_FRAMES: usize = 20;

/// Version of the shared preprocessing routine ([`sequence::prepare`]).
pub const PREPROCESSING_VERSION: u32 = 1;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and this library will log at *trace*
/// level. Otherwise, they will log at *debug* level. Everything else logs at *info*, and tract at
/// *warn*. `RUST_LOG` takes precedence over all of these.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
