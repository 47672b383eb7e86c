//! Per-hand bounding box normalization.
//!
//! Every hand in every frame is rescaled on its own: the x and y coordinates of its 21 landmarks
//! are mapped into `0.0..=1.0` relative to the hand's bounding box in that frame. This removes the
//! hand's position and size in the camera image, but keeps its orientation and articulation. The
//! z coordinates are left alone.
//!
//! There is no state across frames or hands, and applying the normalization twice yields the same
//! result as applying it once.

use crate::keypoints::{is_absent, FrameVector};
use crate::sequence::Sequence;
use crate::{HAND_LEN, NUM_HANDS};

/// Normalizes one hand block in place.
///
/// Absent hands (all zeroes) are left untouched. An axis along which all landmarks share the same
/// coordinate is left untouched as well.
pub fn normalize_hand(hand: &mut [f32; HAND_LEN]) {
    if is_absent(hand) {
        return;
    }

    for axis in 0..2 {
        let (min, max) = hand
            .iter()
            .skip(axis)
            .step_by(3)
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), &v| {
                (min.min(v), max.max(v))
            });

        let range = max - min;
        if range > 0.0 {
            for v in hand.iter_mut().skip(axis).step_by(3) {
                *v = (*v - min) / range;
            }
        }
    }
}

/// Normalizes both hand slots of a frame in place.
pub fn normalize_frame(frame: &mut FrameVector) {
    for slot in 0..NUM_HANDS {
        normalize_hand(frame.hand_mut(slot));
    }
}

/// Normalizes every frame of a sequence in place.
pub fn normalize_sequence(sequence: &mut Sequence) {
    for frame in sequence.frames_mut() {
        normalize_frame(frame);
    }
}

/// Returns a normalized copy of `sequence`.
pub fn normalized(sequence: &Sequence) -> Sequence {
    let mut sequence = sequence.clone();
    normalize_sequence(&mut sequence);
    sequence
}
