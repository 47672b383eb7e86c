//! Live recognition: frames in, predictions out.
//!
//! A [`Recognizer`] ties the hand detector, the keypoint extractor, the per-session windows and
//! the classifier together. Each frame yields an [`Outcome`]:
//!
//! - frames without hands are dropped without touching the session's window,
//! - until the window holds the warm-up number of frames, the recognizer reports progress,
//! - afterwards every frame produces a prediction for the current window.

use serde::Serialize;

use crate::classifier::{self, Classifier};
use crate::hand::{Hand, HandDetector};
use crate::image::RgbImage;
use crate::keypoints::{FrameVector, SlotOrder};
use crate::labels::ClassNames;
use crate::sequence::Sequence;
use crate::timer::Timer;
use crate::window::SessionStore;
use crate::{SEQ_LEN, WARMUP_FRAMES};

/// Tunables of a [`Recognizer`].
#[derive(Debug, Clone)]
pub struct Options {
    pub slot_order: SlotOrder,
    /// Number of ranked classes reported with each prediction.
    pub top_k: usize,
    /// Number of buffered frames needed before a session is classified.
    pub warmup: usize,
    pub max_sessions: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            slot_order: SlotOrder::default(),
            top_k: 3,
            warmup: WARMUP_FRAMES,
            max_sessions: 64,
        }
    }
}

/// A class label with its probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Labeled {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
}

/// The classification result of one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// The most probable class.
    pub label: String,
    pub confidence: f32,
    /// The most probable classes, most probable first. Starts with `label`.
    pub top: Vec<Labeled>,
}

/// What processing one frame resulted in.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The frame contains no hands and was not buffered.
    NoHands,
    /// The frame was buffered, but the session has not reached its warm-up threshold.
    Collecting { buffered: usize, needed: usize },
    /// The frame was buffered and the session's window was classified.
    Predicted {
        prediction: Prediction,
        buffered: usize,
    },
}

/// Fails unless `classes` names every output of `classifier`.
pub fn check_classes(classifier: &dyn Classifier, classes: &ClassNames) -> anyhow::Result<()> {
    if classifier.num_classes() != classes.len() {
        anyhow::bail!(
            "class list has {} entries, but the classifier produces {} scores",
            classes.len(),
            classifier.num_classes()
        );
    }
    Ok(())
}

/// Classifies a prepared sequence and attaches labels to the `top_k` most probable classes.
///
/// `top_k` is raised to at least 1.
pub fn predict(
    classifier: &dyn Classifier,
    classes: &ClassNames,
    sequence: &Sequence,
    top_k: usize,
) -> anyhow::Result<Prediction> {
    let logits = classifier.logits(sequence)?;
    let probs = classifier::softmax(&logits);
    let top = classifier::top_k(&probs, top_k.max(1))
        .into_iter()
        .map(|ranked| {
            let label = classes.get(ranked.index).ok_or_else(|| {
                anyhow::anyhow!("classifier returned unknown class {}", ranked.index)
            })?;
            Ok(Labeled {
                label: label.to_string(),
                confidence: ranked.confidence,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let Some(best) = top.first() else {
        anyhow::bail!("classifier returned no scores");
    };
    Ok(Prediction {
        label: best.label.clone(),
        confidence: best.confidence,
        top,
    })
}

pub struct Recognizer {
    detector: Box<dyn HandDetector>,
    classifier: Box<dyn Classifier>,
    classes: ClassNames,
    options: Options,
    sessions: SessionStore,
    t_detect: Timer,
    t_classify: Timer,
}

impl Recognizer {
    /// Creates a recognizer.
    ///
    /// Returns an error if the class list does not match the classifier's output.
    pub fn new(
        detector: Box<dyn HandDetector>,
        classifier: Box<dyn Classifier>,
        classes: ClassNames,
        options: Options,
    ) -> anyhow::Result<Self> {
        check_classes(&*classifier, &classes)?;
        let sessions = SessionStore::new(options.max_sessions, options.warmup);
        Ok(Self {
            detector,
            classifier,
            classes,
            options,
            sessions,
            t_detect: Timer::new("detect"),
            t_classify: Timer::new("classify"),
        })
    }

    pub fn classes(&self) -> &ClassNames {
        &self.classes
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Detects hands in `image` and feeds them to session `session`.
    pub fn process_image(&self, session: &str, image: &RgbImage) -> anyhow::Result<Outcome> {
        let hands = self.t_detect.time(|| self.detector.detect(image))?;
        log::trace!("{} hand(s) detected", hands.len());
        self.process_hands(session, &hands)
    }

    /// Feeds the hands detected in one frame to session `session`.
    pub fn process_hands(&self, session: &str, hands: &[Hand]) -> anyhow::Result<Outcome> {
        let frame = FrameVector::from_hands(hands, self.options.slot_order);
        self.process_frame(session, frame)
    }

    /// Feeds one frame vector to session `session`.
    pub fn process_frame(&self, session: &str, frame: FrameVector) -> anyhow::Result<Outcome> {
        if !frame.has_hands() {
            return Ok(Outcome::NoHands);
        }

        let (buffered, needed, sequence) = self.sessions.with_window(session, |window| {
            window.push(frame);
            let sequence = window.is_ready().then(|| window.prepare());
            (window.len(), window.warmup(), sequence)
        });

        let Some(sequence) = sequence else {
            return Ok(Outcome::Collecting { buffered, needed });
        };

        let prediction = self.t_classify.time(|| {
            predict(
                &*self.classifier,
                &self.classes,
                &sequence,
                self.options.top_k,
            )
        })?;
        log::debug!(
            "session `{session}`: {} ({:.3}) from {buffered}/{SEQ_LEN} frames",
            prediction.label,
            prediction.confidence,
        );
        Ok(Outcome::Predicted {
            prediction,
            buffered,
        })
    }

    /// Clears the window of session `session`.
    pub fn reset(&self, session: &str) {
        if self.sessions.reset(session) {
            log::debug!("session `{session}` reset");
        }
    }

    /// Returns the recognizer's own timers followed by those of the detector and classifier.
    pub fn timers(&self) -> Vec<&Timer> {
        let mut timers = vec![&self.t_detect, &self.t_classify];
        timers.extend(self.detector.timers());
        timers.extend(self.classifier.timers());
        timers
    }
}
