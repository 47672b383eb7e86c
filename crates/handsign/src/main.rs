use std::path::PathBuf;

use clap::{Parser, Subcommand};

use handsign::classifier::OnnxClassifier;
use handsign::config::Config;
use handsign::dataset;
use handsign::hand::LandmarkNetwork;
use handsign::keypoints::SlotOrder;
use handsign::labels::ClassNames;
use handsign::recognizer::{self, Recognizer};
use handsign::sequence::{self, SequenceFit};
use handsign::server::Server;

#[derive(Parser, Debug)]
#[command(version, about = "Sign language recognition from hand keypoint sequences")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP inference server.
    Serve(ServeArgs),
    /// Shuffle the recordings of every class into `train` and `test` splits.
    Split {
        /// Directory with one subdirectory of recordings per class.
        source: PathBuf,
        /// Output directory; `train/` and `test/` are created below it.
        dest: PathBuf,
        /// Fraction of each class that goes to the training split.
        #[arg(long, default_value_t = 0.8)]
        ratio: f32,
        /// Seed for a reproducible split.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Extract keypoint sequences from `<split>/<class>/<recording>` frame directories.
    Extract {
        source: PathBuf,
        dest: PathBuf,
        #[arg(long, default_value = "models/hand_landmark.onnx")]
        hand_model: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        min_confidence: f32,
        #[arg(long, value_enum, default_value_t = SlotOrder::Detector)]
        slot_order: SlotOrder,
    },
    /// Write the class list of a dataset split.
    Classes {
        /// Split directory with one subdirectory per class.
        split: PathBuf,
        output: PathBuf,
    },
    /// Count the sequences of an extracted dataset.
    Inspect { root: PathBuf },
    /// Measure the accuracy of a classifier on a dataset split.
    Evaluate {
        split: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
    },
    /// Classify a single `.npy` keypoint sequence.
    Predict {
        file: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
}

#[derive(clap::Args, Debug)]
struct ModelArgs {
    #[arg(long, default_value = "models/classifier.onnx")]
    model: PathBuf,
    #[arg(long, default_value = "models/class_names.json")]
    classes: PathBuf,
    /// How sequences are brought to the classifier's length.
    #[arg(long, value_enum, default_value_t = SequenceFit::DATASET)]
    fit: SequenceFit,
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    listen: Option<String>,
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long)]
    classes: Option<PathBuf>,
    #[arg(long)]
    hand_model: Option<PathBuf>,
    #[arg(long)]
    warmup: Option<usize>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long, value_enum)]
    slot_order: Option<SlotOrder>,
}

impl ServeArgs {
    fn config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        config.apply_env()?;

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(classes) = self.classes {
            config.classes = classes;
        }
        if let Some(hand_model) = self.hand_model {
            config.hand_model = hand_model;
        }
        if let Some(warmup) = self.warmup {
            config.warmup = warmup;
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(slot_order) = self.slot_order {
            config.slot_order = slot_order;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    handsign::init_logger!();

    match Args::parse().command {
        Command::Serve(args) => serve(args.config()?),
        Command::Split {
            source,
            dest,
            ratio,
            seed,
        } => {
            let mut rng = match seed {
                Some(seed) => fastrand::Rng::with_seed(seed),
                None => fastrand::Rng::new(),
            };
            let summary = dataset::split(&source, &dest, ratio, &mut rng)?;
            log::info!(
                "split complete: {} train, {} test",
                summary.train,
                summary.test
            );
            Ok(())
        }
        Command::Extract {
            source,
            dest,
            hand_model,
            min_confidence,
            slot_order,
        } => {
            let detector = LandmarkNetwork::load(&hand_model, min_confidence)?;
            let written = dataset::extract(&detector, &source, &dest, slot_order)?;
            log::info!("extracted {written} sequences to {}", dest.display());
            Ok(())
        }
        Command::Classes { split, output } => {
            let classes = ClassNames::from_dataset(&split)?;
            classes.save(&output)?;
            log::info!("wrote {} classes to {}", classes.len(), output.display());
            Ok(())
        }
        Command::Inspect { root } => {
            println!("{}", dataset::inspect(&root)?);
            Ok(())
        }
        Command::Evaluate { split, model } => {
            let (classifier, classes) = model.load()?;
            let evaluation = dataset::evaluate(&classifier, &classes, &split, model.fit)?;
            println!("{evaluation}");
            Ok(())
        }
        Command::Predict { file, model, top_k } => {
            let (classifier, classes) = model.load()?;
            let frames = dataset::load_sequence(&file)?;
            let prepared = sequence::prepare(&frames, model.fit);
            let prediction = recognizer::predict(&classifier, &classes, &prepared, top_k)?;
            println!("{}: {}", file.display(), prediction.label);
            for labeled in &prediction.top {
                println!("  {}: {:.4}", labeled.label, labeled.confidence);
            }
            Ok(())
        }
    }
}

impl ModelArgs {
    fn load(&self) -> anyhow::Result<(OnnxClassifier, ClassNames)> {
        let classifier = OnnxClassifier::load(&self.model)?;
        let classes = ClassNames::load(&self.classes)?;
        recognizer::check_classes(&classifier, &classes)?;
        Ok((classifier, classes))
    }
}

fn serve(config: Config) -> anyhow::Result<()> {
    log::info!("loading classifier from {}", config.model.display());
    let classifier = OnnxClassifier::load(&config.model)?;
    let classes = ClassNames::load(&config.classes)?;
    log::info!("loading hand landmark network from {}", config.hand_model.display());
    let detector = LandmarkNetwork::load(&config.hand_model, config.min_confidence)?;

    let recognizer = Recognizer::new(
        Box::new(detector),
        Box::new(classifier),
        classes,
        config.recognizer_options(),
    )?;
    log::info!(
        "{} classes, slot order {}, warm-up {} frames",
        recognizer.classes().len(),
        config.slot_order,
        config.warmup
    );

    Server::bind(config.listen.as_str(), recognizer, config.max_body_bytes)?
        .with_max_connections(config.max_connections)
        .run()
}
