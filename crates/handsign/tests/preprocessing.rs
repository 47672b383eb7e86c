//! The dataset tools and the live server must hand identical sequences to the classifier.

use handsign::hand::Hand;
use handsign::keypoints::{FrameVector, SlotOrder};
use handsign::sequence::{self, SequenceFit};
use handsign::window::Window;
use handsign::{NUM_LANDMARKS, SEQ_LEN, WARMUP_FRAMES};

fn recording(len: usize) -> Vec<FrameVector> {
    (0..len)
        .map(|t| {
            let t = t as f32 / len as f32;
            let mut landmarks = [[0.0; 3]; NUM_LANDMARKS];
            for (i, lm) in landmarks.iter_mut().enumerate() {
                let i = i as f32;
                *lm = [0.2 + t * 0.3 + i * 0.012, 0.6 - t * 0.2 + i * 0.007, -0.01 * i];
            }
            let right = Hand::new(landmarks);
            FrameVector::from_hands(&[right], SlotOrder::Detector)
        })
        .collect()
}

#[test]
fn live_window_matches_dataset_preparation() {
    for len in [WARMUP_FRAMES, 33, SEQ_LEN] {
        let frames = recording(len);
        let mut window = Window::default();
        for frame in &frames {
            window.push(*frame);
        }

        let offline = sequence::prepare(&frames, SequenceFit::DATASET);
        assert_eq!(window.prepare(), offline, "recording of {len} frames");
    }
}

#[test]
fn long_recordings_diverge_only_in_which_frames_are_kept() {
    let frames = recording(SEQ_LEN + 10);
    let mut window = Window::default();
    for frame in &frames {
        window.push(*frame);
    }

    assert_eq!(
        window.prepare(),
        sequence::prepare(&frames[10..], SequenceFit::DATASET)
    );
    assert_eq!(
        window.prepare(),
        sequence::prepare(&frames, SequenceFit::LIVE)
    );
}
