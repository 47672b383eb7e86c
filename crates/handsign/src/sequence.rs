//! Fixed-length keypoint sequences and the shared preprocessing routine.
//!
//! Recordings and live windows rarely contain exactly [`SEQ_LEN`] frames. [`fit`] brings them to
//! that length according to an explicit [`SequenceFit`] policy, and [`prepare`] additionally
//! applies the bounding box normalization. Everything that feeds the classifier goes through
//! [`prepare`].

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::keypoints::FrameVector;
use crate::nn::tensor::Tensor;
use crate::normalize::normalize_sequence;
use crate::{FRAME_LEN, SEQ_LEN};

/// Exactly [`SEQ_LEN`] frame vectors.
#[derive(Clone, PartialEq)]
pub struct Sequence {
    frames: Box<[FrameVector]>,
}

impl Sequence {
    /// A sequence in which no hand is ever visible.
    pub fn empty() -> Self {
        Self {
            frames: vec![FrameVector::EMPTY; SEQ_LEN].into_boxed_slice(),
        }
    }

    /// Creates a sequence from exactly [`SEQ_LEN`] frames.
    pub fn from_frames(frames: Vec<FrameVector>) -> anyhow::Result<Self> {
        if frames.len() != SEQ_LEN {
            anyhow::bail!(
                "sequence must have {SEQ_LEN} frames, got {} (use `fit` to pad or truncate)",
                frames.len()
            );
        }
        Ok(Self {
            frames: frames.into_boxed_slice(),
        })
    }

    pub fn frames(&self) -> &[FrameVector] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [FrameVector] {
        &mut self.frames
    }

    /// Returns whether a hand is visible in any frame.
    pub fn has_hands(&self) -> bool {
        self.frames.iter().any(FrameVector::has_hands)
    }

    /// Converts the sequence to the classifier input tensor of shape `[1, SEQ_LEN, FRAME_LEN]`.
    pub fn to_tensor(&self) -> Tensor {
        let data = self
            .frames
            .iter()
            .flat_map(|frame| frame.as_slice().iter().copied())
            .collect();
        Tensor::from_shape_vec(&[1, SEQ_LEN, FRAME_LEN], data)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let with_hands = self.frames.iter().filter(|f| f.has_hands()).count();
        f.debug_struct("Sequence")
            .field("frames", &self.frames.len())
            .field("with_hands", &with_hands)
            .finish()
    }
}

/// Converts a `(frames, FRAME_LEN)` array into frame vectors.
pub fn frames_from_array(array: &Array2<f32>) -> anyhow::Result<Vec<FrameVector>> {
    if array.ncols() != FRAME_LEN {
        anyhow::bail!(
            "expected {FRAME_LEN} values per frame, got array of shape {:?}",
            array.shape()
        );
    }
    array
        .rows()
        .into_iter()
        .map(|row| FrameVector::from_slice(&row.to_vec()))
        .collect()
}

/// Converts frame vectors into a `(frames, FRAME_LEN)` array.
pub fn frames_to_array(frames: &[FrameVector]) -> Array2<f32> {
    Array2::from_shape_fn((frames.len(), FRAME_LEN), |(t, i)| frames[t].as_slice()[i])
}

/// How a recording of arbitrary length is brought to [`SEQ_LEN`] frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceFit {
    /// Keep the first frames; pad short recordings with trailing empty frames.
    KeepFirst,
    /// Keep the most recent frames; pad short recordings with trailing empty frames.
    KeepLast,
    /// Linearly interpolate over time to exactly [`SEQ_LEN`] frames.
    Resample,
}

impl SequenceFit {
    /// Policy for recorded dataset samples, which start when the sign starts.
    pub const DATASET: Self = Self::KeepFirst;

    /// Policy for the rolling window of a live session.
    pub const LIVE: Self = Self::KeepLast;
}

impl fmt::Display for SequenceFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepFirst => f.write_str("keep-first"),
            Self::KeepLast => f.write_str("keep-last"),
            Self::Resample => f.write_str("resample"),
        }
    }
}

/// Brings `frames` to exactly [`SEQ_LEN`] frames.
pub fn fit(frames: &[FrameVector], policy: SequenceFit) -> Sequence {
    let mut out = match policy {
        SequenceFit::KeepFirst => frames.iter().take(SEQ_LEN).copied().collect::<Vec<_>>(),
        SequenceFit::KeepLast => frames[frames.len().saturating_sub(SEQ_LEN)..].to_vec(),
        SequenceFit::Resample => resample(frames),
    };
    out.resize(SEQ_LEN, FrameVector::EMPTY);

    Sequence {
        frames: out.into_boxed_slice(),
    }
}

/// Fits `frames` to [`SEQ_LEN`] and normalizes the result.
///
/// This is the one preprocessing routine shared by dataset tools, offline evaluation and the
/// server. Changing it requires bumping [`crate::PREPROCESSING_VERSION`].
pub fn prepare(frames: &[FrameVector], policy: SequenceFit) -> Sequence {
    let mut sequence = fit(frames, policy);
    normalize_sequence(&mut sequence);
    sequence
}

fn resample(frames: &[FrameVector]) -> Vec<FrameVector> {
    match frames.len() {
        0 => return Vec::new(),
        n if n == SEQ_LEN => return frames.to_vec(),
        _ => {}
    }

    let last = (frames.len() - 1) as f32;
    (0..SEQ_LEN)
        .map(|t| {
            let pos = last * t as f32 / (SEQ_LEN - 1) as f32;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(frames.len() - 1);
            let frac = pos - lo as f32;

            let (a, b) = (frames[lo].as_slice(), frames[hi].as_slice());
            let mut values = [0.0; FRAME_LEN];
            for (out, (a, b)) in values.iter_mut().zip(a.iter().zip(b)) {
                *out = a + (b - a) * frac;
            }
            FrameVector::from(values)
        })
        .collect()
}
