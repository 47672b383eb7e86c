//! Sequence classification.

use std::cmp::Ordering;
use std::path::Path;

use serde::Serialize;

use crate::nn::NeuralNetwork;
use crate::sequence::Sequence;
use crate::timer::Timer;
use crate::{FRAME_LEN, SEQ_LEN};

/// Name of the [`OnnxClassifier`] inference timer in the periodic timing log.
pub const TIMER_NAME: &str = "classifier";

/// Maps a normalized [`Sequence`] to one score per class.
pub trait Classifier: Send + Sync {
    /// Computes the unnormalized class scores for `sequence`.
    ///
    /// The returned vector always has [`Classifier::num_classes`] elements.
    fn logits(&self, sequence: &Sequence) -> anyhow::Result<Vec<f32>>;

    fn num_classes(&self) -> usize;

    /// Returns profiling timers of the classifier.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

/// A sequence classifier exported to ONNX.
///
/// The network takes a single `[1, SEQ_LEN, FRAME_LEN]` input and produces one `[1, C]` (or
/// `[C]`) output of logits.
pub struct OnnxClassifier {
    nn: NeuralNetwork,
    num_classes: usize,
    t_infer: Timer,
}

impl OnnxClassifier {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let nn = NeuralNetwork::from_path(path)?
            .with_input_shape([1, SEQ_LEN, FRAME_LEN])
            .load()?;
        Self::new(nn)
    }

    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        if nn.num_inputs() != 1 {
            anyhow::bail!(
                "classifier has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }
        if nn.num_outputs() != 1 {
            anyhow::bail!(
                "classifier has to produce exactly 1 output, this one produces {}",
                nn.num_outputs(),
            );
        }

        let input = nn.input_shape(0)?;
        if input != [1, SEQ_LEN, FRAME_LEN] {
            anyhow::bail!(
                "classifier input shape must be [1, {SEQ_LEN}, {FRAME_LEN}], got {:?}",
                input
            );
        }
        let num_classes = match nn.output_shape(0)?.as_slice() {
            &[1, n] | &[n] if n > 0 => n,
            shape => anyhow::bail!("invalid classifier output shape: {:?}", shape),
        };

        Ok(Self {
            nn,
            num_classes,
            t_infer: Timer::new(TIMER_NAME),
        })
    }
}

impl Classifier for OnnxClassifier {
    fn logits(&self, sequence: &Sequence) -> anyhow::Result<Vec<f32>> {
        let outputs = self
            .t_infer
            .time(|| self.nn.estimate(&sequence.to_tensor().into()))?;
        let logits = outputs[0].as_slice();
        if logits.len() != self.num_classes {
            anyhow::bail!(
                "classifier returned {} scores, expected {}",
                logits.len(),
                self.num_classes
            );
        }
        Ok(logits.to_vec())
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn timers(&self) -> Vec<&Timer> {
        vec![&self.t_infer]
    }
}

/// Converts logits into probabilities.
///
/// The maximum is subtracted before exponentiation, so large logits do not overflow.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.iter().map(|&l| (l - max).exp()).collect::<Vec<_>>();
    let sum = exp.iter().sum::<f32>();
    exp.into_iter().map(|e| e / sum).collect()
}

/// A class index together with its probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ranked {
    pub index: usize,
    pub confidence: f32,
}

/// Returns the `k` most probable classes, most probable first.
///
/// Classes with equal probability are ordered by index. `k` is clamped to the number of classes.
pub fn top_k(probs: &[f32], k: usize) -> Vec<Ranked> {
    let mut ranked = probs
        .iter()
        .enumerate()
        .map(|(index, &confidence)| Ranked { index, confidence })
        .collect::<Vec<_>>();
    // `sort_by` is stable, so equal probabilities keep their index order.
    ranked.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        assert_relative_eq!(probs.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
        assert_relative_eq!(probs[2], 0.66524096, epsilon = 1e-6);
    }

    #[test]
    fn softmax_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert_relative_eq!(probs[0], 0.5);
        assert_relative_eq!(probs[1], 0.5);
    }

    #[test]
    fn top_k_order() {
        let ranked = top_k(&[0.1, 0.5, 0.1, 0.3], 3);
        let indices = ranked.iter().map(|r| r.index).collect::<Vec<_>>();
        assert_eq!(indices, [1, 3, 0]);
        assert_eq!(ranked[0].confidence, 0.5);
    }

    #[test]
    fn top_k_clamps() {
        assert_eq!(top_k(&[0.6, 0.4], 3).len(), 2);
        assert!(top_k(&[0.6, 0.4], 0).is_empty());
    }
}
