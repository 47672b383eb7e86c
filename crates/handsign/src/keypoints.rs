//! Conversion of detected hands into fixed-size frame vectors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hand::{Hand, Handedness};
use crate::{FRAME_LEN, HAND_LEN, NUM_HANDS};

/// The keypoints of one frame: two hand slots of 21 `(x, y, z)` triples each.
///
/// A slot that holds only zeroes means "no hand". A hand that happens to sit exactly at the
/// origin with all its landmarks is indistinguishable from that; the classifier input has no room
/// for a separate validity flag.
#[derive(Clone, Copy, PartialEq)]
pub struct FrameVector([f32; FRAME_LEN]);

impl FrameVector {
    /// A frame without any hands.
    pub const EMPTY: Self = Self([0.0; FRAME_LEN]);

    /// Flattens the detector output for one frame.
    ///
    /// The first two hands (after applying `order`) fill slots 0 and 1; any further hands are
    /// dropped, and missing hands leave their slot zeroed.
    pub fn from_hands(hands: &[Hand], order: SlotOrder) -> Self {
        let mut frame = Self::EMPTY;
        for (slot, hand) in order.assign(hands).into_iter().enumerate() {
            let Some(hand) = hand else { continue };
            for (out, landmark) in frame
                .hand_mut(slot)
                .chunks_exact_mut(3)
                .zip(hand.landmarks())
            {
                out.copy_from_slice(landmark);
            }
        }
        frame
    }

    /// Creates a frame vector from raw values.
    ///
    /// Returns an error if `values` does not contain exactly [`FRAME_LEN`] elements.
    pub fn from_slice(values: &[f32]) -> anyhow::Result<Self> {
        let values: [f32; FRAME_LEN] = values.try_into().map_err(|_| {
            anyhow::anyhow!(
                "frame vector must have {FRAME_LEN} values, got {}",
                values.len()
            )
        })?;
        Ok(Self(values))
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32; FRAME_LEN] {
        &self.0
    }

    /// Returns the 63 values of hand slot `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not 0 or 1.
    #[inline]
    pub fn hand(&self, slot: usize) -> &[f32; HAND_LEN] {
        assert!(slot < NUM_HANDS, "invalid hand slot {slot}");
        (&self.0[slot * HAND_LEN..][..HAND_LEN]).try_into().unwrap()
    }

    /// Returns the 63 values of hand slot `slot` for modification.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is not 0 or 1.
    #[inline]
    pub fn hand_mut(&mut self, slot: usize) -> &mut [f32; HAND_LEN] {
        assert!(slot < NUM_HANDS, "invalid hand slot {slot}");
        (&mut self.0[slot * HAND_LEN..][..HAND_LEN])
            .try_into()
            .unwrap()
    }

    /// Returns whether any hand slot holds a non-zero value.
    pub fn has_hands(&self) -> bool {
        (0..NUM_HANDS).any(|slot| !is_absent(self.hand(slot)))
    }
}

impl From<[f32; FRAME_LEN]> for FrameVector {
    fn from(values: [f32; FRAME_LEN]) -> Self {
        Self(values)
    }
}

impl Default for FrameVector {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for FrameVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = (0..NUM_HANDS)
            .map(|slot| !is_absent(self.hand(slot)))
            .collect::<Vec<_>>();
        f.debug_struct("FrameVector")
            .field("hands", &present)
            .finish_non_exhaustive()
    }
}

/// Returns whether a hand block encodes "no hand" (the sum of its absolute values is zero).
pub fn is_absent(hand: &[f32; HAND_LEN]) -> bool {
    hand.iter().map(|v| v.abs()).sum::<f32>() == 0.0
}

/// How detected hands are assigned to the two slots of a [`FrameVector`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SlotOrder {
    /// Keep the order the detector returned the hands in.
    ///
    /// The detector gives no guarantee that this is stable across frames, so the same physical
    /// hand may switch slots. Models trained on detector-ordered data expect this.
    #[default]
    Detector,
    /// Put left hands in slot 0 and right hands in slot 1.
    ///
    /// Hands without a handedness label (or a second hand with the same label) fill the remaining
    /// free slots in detector order.
    Handedness,
}

impl SlotOrder {
    fn assign<'a>(self, hands: &'a [Hand]) -> [Option<&'a Hand>; NUM_HANDS] {
        let mut slots = [None; NUM_HANDS];
        match self {
            SlotOrder::Detector => {
                for (slot, hand) in slots.iter_mut().zip(hands) {
                    *slot = Some(hand);
                }
            }
            SlotOrder::Handedness => {
                let mut rest = Vec::new();
                for hand in hands {
                    let slot = match hand.handedness() {
                        Some(Handedness::Left) => 0,
                        Some(Handedness::Right) => 1,
                        None => {
                            rest.push(hand);
                            continue;
                        }
                    };
                    if slots[slot].is_none() {
                        slots[slot] = Some(hand);
                    } else {
                        rest.push(hand);
                    }
                }
                let mut rest = rest.into_iter();
                for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                    *slot = rest.next();
                }
            }
        }
        slots
    }
}

impl fmt::Display for SlotOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detector => f.write_str("detector"),
            Self::Handedness => f.write_str("handedness"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::hand_at;

    #[test]
    fn no_hands() {
        let frame = FrameVector::from_hands(&[], SlotOrder::Detector);
        assert_eq!(frame, FrameVector::EMPTY);
        assert!(!frame.has_hands());
    }

    #[test]
    fn one_hand_fills_slot_zero() {
        let hand = hand_at(0.1, 0.2, 0.3);
        let frame = FrameVector::from_hands(&[hand.clone()], SlotOrder::Detector);

        assert_eq!(&frame.as_slice()[..3], &hand.landmarks()[0]);
        assert_eq!(&frame.as_slice()[60..63], &hand.landmarks()[20]);
        assert!(is_absent(frame.hand(1)));
        assert!(frame.has_hands());
    }

    #[test]
    fn detector_order_is_preserved() {
        let a = hand_at(0.7, 0.5, 0.0).with_handedness(Handedness::Right);
        let b = hand_at(0.2, 0.5, 0.0).with_handedness(Handedness::Left);
        let c = hand_at(0.9, 0.9, 0.0);

        let frame = FrameVector::from_hands(&[a.clone(), b.clone(), c], SlotOrder::Detector);
        assert_eq!(frame.hand(0)[0], a.landmarks()[0][0]);
        assert_eq!(frame.hand(1)[0], b.landmarks()[0][0]);
    }

    #[test]
    fn handedness_order() {
        let right = hand_at(0.7, 0.5, 0.0).with_handedness(Handedness::Right);
        let left = hand_at(0.2, 0.5, 0.0).with_handedness(Handedness::Left);

        let frame =
            FrameVector::from_hands(&[right.clone(), left.clone()], SlotOrder::Handedness);
        assert_eq!(frame.hand(0)[0], left.landmarks()[0][0]);
        assert_eq!(frame.hand(1)[0], right.landmarks()[0][0]);

        // A lone right hand still goes to slot 1.
        let frame = FrameVector::from_hands(&[right.clone()], SlotOrder::Handedness);
        assert!(is_absent(frame.hand(0)));
        assert_eq!(frame.hand(1)[0], right.landmarks()[0][0]);
    }

    #[test]
    fn handedness_order_falls_back() {
        let unlabeled = hand_at(0.4, 0.4, 0.0);
        let right1 = hand_at(0.6, 0.4, 0.0).with_handedness(Handedness::Right);
        let right2 = hand_at(0.8, 0.4, 0.0).with_handedness(Handedness::Right);

        let frame = FrameVector::from_hands(&[unlabeled.clone()], SlotOrder::Handedness);
        assert_eq!(frame.hand(0)[0], unlabeled.landmarks()[0][0]);

        let frame =
            FrameVector::from_hands(&[right1.clone(), right2.clone()], SlotOrder::Handedness);
        assert_eq!(frame.hand(0)[0], right2.landmarks()[0][0]);
        assert_eq!(frame.hand(1)[0], right1.landmarks()[0][0]);
    }

    #[test]
    fn from_slice_checks_length() {
        assert!(FrameVector::from_slice(&[0.0; FRAME_LEN]).is_ok());
        assert!(FrameVector::from_slice(&[0.0; 225]).is_err());
    }

    #[test]
    fn from_array() {
        let mut values = [0.0; FRAME_LEN];
        values[HAND_LEN] = 0.75;
        let frame = FrameVector::from(values);
        assert_eq!(frame.as_slice(), &values[..]);
        assert!(frame.has_hands());
        assert!(is_absent(frame.hand(0)));
    }
}
