//! Server configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then environment
//! variables, then command line flags (applied by the binary).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::keypoints::SlotOrder;
use crate::recognizer::Options;
use crate::{SEQ_LEN, WARMUP_FRAMES};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Address the HTTP server listens on.
    pub listen: String,
    /// Sequence classifier (ONNX).
    pub model: PathBuf,
    /// JSON class list belonging to `model`.
    pub classes: PathBuf,
    /// Hand landmark network (ONNX).
    pub hand_model: PathBuf,
    /// Minimum hand presence score for a detection to count.
    pub min_confidence: f32,
    pub warmup: usize,
    pub top_k: usize,
    pub slot_order: SlotOrder,
    pub max_sessions: usize,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
    /// Connections served at once; further connections are answered with 503.
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".into(),
            model: "models/classifier.onnx".into(),
            classes: "models/class_names.json".into(),
            hand_model: "models/hand_landmark.onnx".into(),
            min_confidence: 0.5,
            warmup: WARMUP_FRAMES,
            top_k: 3,
            slot_order: SlotOrder::Detector,
            max_sessions: 64,
            max_body_bytes: 16 * 1024 * 1024,
            max_connections: 32,
        }
    }
}

impl Config {
    /// Reads a TOML configuration file. Missing fields take their default values.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies the `PORT`, `HANDSIGN_MODEL`, `HANDSIGN_CLASSES` and `HANDSIGN_HAND_MODEL`
    /// environment variables.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(port) = var("PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .with_context(|| format!("invalid PORT `{port}`"))?;
            self.set_port(port);
        }
        if let Some(model) = var("HANDSIGN_MODEL") {
            self.model = model.into();
        }
        if let Some(classes) = var("HANDSIGN_CLASSES") {
            self.classes = classes.into();
        }
        if let Some(hand_model) = var("HANDSIGN_HAND_MODEL") {
            self.hand_model = hand_model.into();
        }
        Ok(())
    }

    /// Replaces the port of [`Config::listen`], keeping its host.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.listen.rsplit_once(':') {
            Some((host, _)) => host,
            None => &self.listen,
        };
        let listen = format!("{host}:{port}");
        self.listen = listen;
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!(
                "`min_confidence` must be between 0 and 1, got {}",
                self.min_confidence
            );
        }
        if !(1..=SEQ_LEN).contains(&self.warmup) {
            anyhow::bail!(
                "`warmup` must be between 1 and {SEQ_LEN} frames, got {}",
                self.warmup
            );
        }
        if self.top_k == 0 {
            anyhow::bail!("`top_k` must be at least 1");
        }
        if self.max_sessions == 0 {
            anyhow::bail!("`max_sessions` must be at least 1");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("`max_body_bytes` must be at least 1");
        }
        if self.max_connections == 0 {
            anyhow::bail!("`max_connections` must be at least 1");
        }
        Ok(())
    }

    pub fn recognizer_options(&self) -> Options {
        Options {
            slot_order: self.slot_order,
            top_k: self.top_k,
            warmup: self.warmup,
            max_sessions: self.max_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listen, "0.0.0.0:5000");
        assert_eq!(config.warmup, 20);
        assert_eq!(config.top_k, 3);
    }

    #[test]
    fn parse_config() {
        let config = Config::from_toml(
            r#"
            listen = "127.0.0.1:8080"
            model = "/srv/lstm.onnx"
            warmup = 10
            slot_order = "handedness"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080");
        assert_eq!(config.model, PathBuf::from("/srv/lstm.onnx"));
        assert_eq!(config.warmup, 10);
        assert_eq!(config.slot_order, SlotOrder::Handedness);
        assert_eq!(config.classes, Config::default().classes);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Config::from_toml("listne = \"x\"").is_err());
        assert!(Config::from_toml("min_confidence = 1.5").is_err());
        assert!(Config::from_toml("top_k = 0").is_err());
        assert!(Config::from_toml("slot_order = \"sorted\"").is_err());
        assert!(Config::from_toml("max_connections = 0").is_err());
    }

    #[test]
    fn warmup_must_fit_the_window() {
        assert!(Config::from_toml("warmup = 0").is_err());
        assert!(Config::from_toml("warmup = 100").is_err());
        assert_eq!(Config::from_toml("warmup = 40").unwrap().warmup, SEQ_LEN);
        assert_eq!(Config::from_toml("warmup = 1").unwrap().warmup, 1);
    }

    #[test]
    fn environment_overrides() {
        let mut config = Config::default();
        config
            .apply_vars(|name| match name {
                "PORT" => Some("8000".into()),
                "HANDSIGN_CLASSES" => Some("labels.json".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.listen, "0.0.0.0:8000");
        assert_eq!(config.classes, PathBuf::from("labels.json"));
        assert_eq!(config.model, Config::default().model);

        assert!(config
            .apply_vars(|name| (name == "PORT").then(|| "http".to_string()))
            .is_err());
    }
}
