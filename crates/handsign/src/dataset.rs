//! Dataset preparation and offline evaluation.
//!
//! Datasets are directory trees of the form `<root>/<split>/<class>/<sample>`. Recordings are
//! split into `train` and `test` as-is; keypoint extraction then turns every recording (a
//! directory of frame images) into a `<sample>.npy` file holding a `(SEQ_LEN, FRAME_LEN)` `f32`
//! array of raw, unnormalized frame vectors.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use itertools::Itertools;
use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};

use crate::classifier::Classifier;
use crate::hand::HandDetector;
use crate::image;
use crate::keypoints::{FrameVector, SlotOrder};
use crate::labels::ClassNames;
use crate::recognizer;
use crate::sequence::{self, frames_from_array, frames_to_array, SequenceFit};
use crate::{FRAME_LEN, PREPROCESSING_VERSION, SEQ_LEN};

pub const TRAIN: &str = "train";
pub const TEST: &str = "test";

const NPY_EXTENSION: &str = "npy";

/// Returns the entries of `dir` sorted by file name.
fn sorted_entries(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries.into_iter().sorted().collect())
}

fn subdirectories(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect())
}

fn file_name(path: &Path) -> anyhow::Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name {}", path.display()))
}

/// Number of recordings copied into each split.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SplitSummary {
    pub train: usize,
    pub test: usize,
}

/// Copies the recordings of every class directory in `source` into `<dest>/train/<class>` and
/// `<dest>/test/<class>`.
///
/// The recordings of each class are shuffled with `rng`, and the first
/// `floor(count * train_ratio)` of them go to the training split.
pub fn split(
    source: &Path,
    dest: &Path,
    train_ratio: f32,
    rng: &mut fastrand::Rng,
) -> anyhow::Result<SplitSummary> {
    if !(0.0..=1.0).contains(&train_ratio) {
        anyhow::bail!("train ratio must be between 0 and 1, got {train_ratio}");
    }

    let mut summary = SplitSummary::default();
    for class_dir in subdirectories(source)? {
        let class = file_name(&class_dir)?;
        let mut recordings = sorted_entries(&class_dir)?;
        rng.shuffle(&mut recordings);

        let num_train = (recordings.len() as f32 * train_ratio) as usize;
        let (train, test) = recordings.split_at(num_train);
        for (split, recordings) in [(TRAIN, train), (TEST, test)] {
            let out_dir = dest.join(split).join(class);
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;
            for recording in recordings {
                copy_recursive(recording, &out_dir.join(file_name(recording)?))?;
            }
        }
        log::info!("{class}: {} train, {} test", train.len(), test.len());

        summary.train += train.len();
        summary.test += test.len();
    }
    Ok(summary)
}

fn copy_recursive(from: &Path, to: &Path) -> anyhow::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in sorted_entries(from)? {
            copy_recursive(&entry, &to.join(file_name(&entry)?))?;
        }
    } else {
        fs::copy(from, to)
            .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    }
    Ok(())
}

/// Loads a keypoint sequence from a `.npy` file.
///
/// The file must hold a 2-dimensional array with [`FRAME_LEN`] columns; both `f32` and `f64`
/// arrays are accepted. The sequence is returned as stored, without fitting or normalization.
pub fn load_sequence<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<FrameVector>> {
    let path = path.as_ref();
    let array: Array2<f32> = match read_npy(path) {
        Ok(array) => array,
        Err(f32_err) => match read_npy::<_, Array2<f64>>(path) {
            Ok(array) => array.mapv(|v| v as f32),
            Err(_) => {
                return Err(f32_err)
                    .with_context(|| format!("failed to read sequence {}", path.display()))
            }
        },
    };
    frames_from_array(&array).with_context(|| format!("invalid sequence {}", path.display()))
}

/// Writes frame vectors to a `.npy` file as a `(frames, FRAME_LEN)` `f32` array.
pub fn save_sequence<P: AsRef<Path>>(path: P, frames: &[FrameVector]) -> anyhow::Result<()> {
    let path = path.as_ref();
    write_npy(path, &frames_to_array(frames))
        .with_context(|| format!("failed to write sequence {}", path.display()))
}

/// Runs the hand detector over the frame images of one recording.
///
/// Frames are read in file name order; only the first [`SEQ_LEN`] are used, and shorter
/// recordings are padded with empty frames. The frames are not normalized.
pub fn extract_sample(
    detector: &dyn HandDetector,
    sample_dir: &Path,
    order: SlotOrder,
) -> anyhow::Result<Vec<FrameVector>> {
    let images = sorted_entries(sample_dir)?
        .into_iter()
        .filter(|p| image::is_image_path(p))
        .take(SEQ_LEN)
        .collect::<Vec<_>>();
    if images.is_empty() {
        anyhow::bail!("no frame images in {}", sample_dir.display());
    }

    let frames = images
        .iter()
        .map(|path| {
            let image = image::load(path)?;
            let hands = detector
                .detect(&image)
                .with_context(|| format!("hand detection failed on {}", path.display()))?;
            Ok(FrameVector::from_hands(&hands, order))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let sequence = sequence::fit(&frames, SequenceFit::DATASET);
    Ok(sequence.frames().to_vec())
}

/// Extracts keypoints for every `<split>/<class>/<sample>` directory below `source`, writing
/// `<dest>/<split>/<class>/<sample>.npy`.
///
/// Returns the number of sequences written.
pub fn extract(
    detector: &dyn HandDetector,
    source: &Path,
    dest: &Path,
    order: SlotOrder,
) -> anyhow::Result<usize> {
    let mut written = 0;
    for split_dir in subdirectories(source)? {
        let split = file_name(&split_dir)?;
        for class_dir in subdirectories(&split_dir)? {
            let class = file_name(&class_dir)?;
            let out_dir = dest.join(split).join(class);
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("failed to create {}", out_dir.display()))?;

            for sample_dir in sorted_entries(&class_dir)? {
                if !sample_dir.is_dir() {
                    log::warn!(
                        "skipping {}: expected a directory of frame images",
                        sample_dir.display()
                    );
                    continue;
                }
                let name = file_name(&sample_dir)?;
                let frames = extract_sample(detector, &sample_dir, order)?;
                let with_hands = frames.iter().filter(|f| f.has_hands()).count();
                log::debug!("{split}/{class}/{name}: hands in {with_hands}/{SEQ_LEN} frames");
                save_sequence(out_dir.join(name).with_extension(NPY_EXTENSION), &frames)?;
                written += 1;
            }
            log::info!("processed {split}/{class}");
        }
    }
    Ok(written)
}

/// A keypoint sequence file and the class it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub class: String,
}

/// Lists all `.npy` files below the class directories of `split_dir`, sorted by class and name.
pub fn samples(split_dir: &Path) -> anyhow::Result<Vec<Sample>> {
    let mut samples = Vec::new();
    for class_dir in subdirectories(split_dir)? {
        let class = file_name(&class_dir)?.to_string();
        for path in sorted_entries(&class_dir)? {
            if path.extension().map_or(false, |ext| ext == NPY_EXTENSION) {
                samples.push(Sample {
                    path,
                    class: class.clone(),
                });
            }
        }
    }
    Ok(samples)
}

/// Overview of an extracted dataset.
#[derive(Debug)]
pub struct Inspection {
    /// Number of sequences per split and class.
    pub counts: BTreeMap<String, BTreeMap<String, usize>>,
    /// One sequence file and its array shape.
    pub example: Option<(PathBuf, Vec<usize>)>,
}

/// Counts the sequences of every split below `root` and reads the shape of one of them.
pub fn inspect(root: &Path) -> anyhow::Result<Inspection> {
    let mut counts = BTreeMap::new();
    let mut example = None;
    for split_dir in subdirectories(root)? {
        let samples = samples(&split_dir)?;
        if example.is_none() {
            if let Some(sample) = samples.first() {
                let frames = load_sequence(&sample.path)?;
                example = Some((sample.path.clone(), vec![frames.len(), FRAME_LEN]));
            }
        }
        let per_class = samples.iter().map(|s| s.class.clone()).counts();
        counts.insert(
            file_name(&split_dir)?.to_string(),
            per_class.into_iter().collect(),
        );
    }
    Ok(Inspection { counts, example })
}

impl fmt::Display for Inspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "preprocessing version: {PREPROCESSING_VERSION}")?;
        for (split, classes) in &self.counts {
            let total = classes.values().sum::<usize>();
            writeln!(f, "{split}: {total} files")?;
            for (class, count) in classes {
                writeln!(f, "  {class}: {count}")?;
            }
        }
        match &self.example {
            Some((path, shape)) => write!(f, "example: {} {:?}", path.display(), shape),
            None => write!(f, "example: none"),
        }
    }
}

/// Accuracy of a classifier on a dataset split.
#[derive(Debug, Default)]
pub struct Evaluation {
    /// `(correct, total)` per class.
    pub per_class: BTreeMap<String, (usize, usize)>,
}

impl Evaluation {
    pub fn total(&self) -> usize {
        self.per_class.values().map(|&(_, total)| total).sum()
    }

    pub fn correct(&self) -> usize {
        self.per_class.values().map(|&(correct, _)| correct).sum()
    }

    /// Fraction of correctly classified samples, 0 for an empty split.
    pub fn accuracy(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f32 / total as f32,
        }
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy: {:.2}% ({}/{})",
            self.accuracy() * 100.0,
            self.correct(),
            self.total()
        )?;
        for (class, &(correct, total)) in &self.per_class {
            let pct = if total == 0 {
                0.0
            } else {
                correct as f32 / total as f32 * 100.0
            };
            write!(f, "\n  {class}: {pct:.2}% ({correct}/{total})")?;
        }
        Ok(())
    }
}

/// Classifies every sample of `split_dir`.
///
/// The class directories of the split must match `classes` exactly, including their order, since
/// a mismatch would silently attach the wrong labels to the classifier output.
pub fn evaluate(
    classifier: &dyn Classifier,
    classes: &ClassNames,
    split_dir: &Path,
    policy: SequenceFit,
) -> anyhow::Result<Evaluation> {
    recognizer::check_classes(classifier, classes)?;
    let dataset_classes = ClassNames::from_dataset(split_dir)?;
    if &dataset_classes != classes {
        anyhow::bail!(
            "dataset classes {:?} do not match the class list {:?}",
            dataset_classes.names(),
            classes.names()
        );
    }

    let mut evaluation = Evaluation::default();
    for class in classes.iter() {
        evaluation.per_class.insert(class.to_string(), (0, 0));
    }
    for sample in samples(split_dir)? {
        let frames = load_sequence(&sample.path)?;
        let prepared = sequence::prepare(&frames, policy);
        let prediction = recognizer::predict(classifier, classes, &prepared, 1)?;
        log::trace!("{}: {}", sample.path.display(), prediction.label);

        let entry = evaluation.per_class.entry(sample.class.clone()).or_default();
        entry.1 += 1;
        if prediction.label == sample.class {
            entry.0 += 1;
        }
    }
    Ok(evaluation)
}
