//! Hand landmark detection.
//!
//! The recognizer only needs the detector's output: zero or more [`Hand`]s, each carrying 21
//! landmarks in normalized image coordinates. [`HandDetector`] is the seam between the two, and
//! [`LandmarkNetwork`] adapts a MediaPipe-style hand landmark ONNX model to it.

use std::path::Path;

use itertools::Itertools;

use crate::image::{self, ColorMapper, RgbImage};
use crate::nn::{NeuralNetwork, Outputs};
use crate::timer::Timer;
use crate::NUM_LANDMARKS;

/// A landmark position: `(x, y, z)` with x and y in normalized image coordinates (`0.0..=1.0`
/// inside the frame, Y pointing down) and z the relative depth.
pub type Landmark = [f32; 3];

/// One detected hand.
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    landmarks: [Landmark; NUM_LANDMARKS],
    handedness: Option<Handedness>,
    confidence: f32,
}

impl Hand {
    /// Creates a hand from its landmarks in [`LandmarkIdx`] order.
    pub fn new(landmarks: [Landmark; NUM_LANDMARKS]) -> Self {
        Self {
            landmarks,
            handedness: None,
            confidence: 1.0,
        }
    }

    pub fn with_handedness(self, handedness: Handedness) -> Self {
        Self {
            handedness: Some(handedness),
            ..self
        }
    }

    pub fn with_confidence(self, confidence: f32) -> Self {
        Self { confidence, ..self }
    }

    #[inline]
    pub fn landmarks(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.landmarks
    }

    #[inline]
    pub fn landmark(&self, index: LandmarkIdx) -> Landmark {
        self.landmarks[index as usize]
    }

    /// Returns the handedness reported by the detector, if it reports one.
    #[inline]
    pub fn handedness(&self) -> Option<Handedness> {
        self.handedness
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    Left,
    Right,
}

/// Names for the hand landmarks, in the order the detector reports them.
///
/// # Terminology
///
/// - **CMC**: Carpometacarpal joint, the lowest joint of the thumb, located near the wrist.
/// - **MCP**: Metacarpophalangeal joint, the lower joint forming the knuckles near the palm.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: placed on the tip of the finger, above the DIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Something that finds hands in a camera frame.
pub trait HandDetector: Send + Sync {
    /// Detects hands in `image`.
    ///
    /// Finding no hands is not an error. Hands are returned in whatever order the detector
    /// produces them.
    fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<Hand>>;

    /// Returns profiling timers of the detector.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// Hand landmark network following the MediaPipe `hand_landmark` model layout.
///
/// The network takes an `[1, 3, H, W]` RGB image in `0.0..=1.0` and returns screen landmarks
/// (`[1, 63]`, in input pixels), a hand presence flag (`[1, 1]`) and the handedness (`[1, 1]`,
/// above 0.5 meaning a right hand).
///
/// The network is run on the whole frame, so it finds at most one hand. Locating several hands
/// requires a palm detector that crops each hand before running this network; such a pipeline can
/// implement [`HandDetector`] on its own.
pub struct LandmarkNetwork {
    nn: NeuralNetwork,
    input_width: u32,
    input_height: u32,
    color_mapper: ColorMapper,
    min_confidence: f32,
    t_resize: Timer,
    t_infer: Timer,
}

impl LandmarkNetwork {
    /// Loads the landmark network from an ONNX file.
    pub fn load<P: AsRef<Path>>(path: P, min_confidence: f32) -> anyhow::Result<Self> {
        let nn = NeuralNetwork::from_path(path)?.load()?;
        Self::new(nn, min_confidence)
    }

    pub fn new(nn: NeuralNetwork, min_confidence: f32) -> anyhow::Result<Self> {
        if nn.num_inputs() != 1 {
            anyhow::bail!(
                "hand landmark network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }
        if nn.num_outputs() < 3 {
            anyhow::bail!(
                "hand landmark network has to produce at least 3 outputs, this one produces {}",
                nn.num_outputs(),
            );
        }

        let (w, h) = match nn.input_shape(0)?.as_slice() {
            &[1, 3, h, w] => (w, h),
            shape => anyhow::bail!("invalid hand landmark network input shape: {:?}", shape),
        };

        Ok(Self {
            nn,
            input_width: w.try_into()?,
            input_height: h.try_into()?,
            color_mapper: ColorMapper::linear(0.0..=1.0),
            min_confidence,
            t_resize: Timer::new("resize"),
            t_infer: Timer::new("hand landmarks"),
        })
    }

    fn extract(&self, outputs: &Outputs) -> anyhow::Result<Option<Hand>> {
        let screen_landmarks = &outputs[0];
        let presence = &outputs[1];
        let handedness = &outputs[2];

        if screen_landmarks.as_slice().len() != NUM_LANDMARKS * 3 {
            anyhow::bail!(
                "unexpected hand landmark output shape {:?}",
                screen_landmarks.shape()
            );
        }

        let presence = presence.as_singular();
        if presence < self.min_confidence {
            log::trace!("hand presence {presence:.2} below threshold");
            return Ok(None);
        }

        let (w, h) = (self.input_width as f32, self.input_height as f32);
        let mut landmarks = [[0.0; 3]; NUM_LANDMARKS];
        for (out, xyz) in landmarks
            .iter_mut()
            .zip_eq(screen_landmarks.as_slice().chunks_exact(3))
        {
            *out = [xyz[0] / w, xyz[1] / h, xyz[2] / w];
        }

        let handedness = if handedness.as_singular() > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        };

        Ok(Some(
            Hand::new(landmarks)
                .with_handedness(handedness)
                .with_confidence(presence),
        ))
    }
}

impl HandDetector for LandmarkNetwork {
    fn detect(&self, image: &RgbImage) -> anyhow::Result<Vec<Hand>> {
        let tensor = self.t_resize.time(|| {
            image::to_nchw_tensor(
                image,
                self.input_width,
                self.input_height,
                &self.color_mapper,
            )
        });
        let outputs = self.t_infer.time(|| self.nn.estimate(&tensor.into()))?;

        Ok(self.extract(&outputs)?.into_iter().collect())
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_resize, &self.t_infer]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landmark_access() {
        let mut landmarks = [[0.0; 3]; NUM_LANDMARKS];
        landmarks[LandmarkIdx::PinkyTip as usize] = [0.5, 0.25, -0.1];
        let hand = Hand::new(landmarks).with_handedness(Handedness::Left);

        assert_eq!(hand.landmark(LandmarkIdx::PinkyTip), [0.5, 0.25, -0.1]);
        assert_eq!(hand.landmark(LandmarkIdx::Wrist), [0.0; 3]);
        assert_eq!(hand.handedness(), Some(Handedness::Left));
        assert_eq!(hand.confidence(), 1.0);
        assert_eq!(LandmarkIdx::PinkyTip as usize, NUM_LANDMARKS - 1);
    }
}
