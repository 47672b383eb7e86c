//! The ordered list of class labels belonging to a classifier.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Class labels, where label `i` names logit `i` of the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    /// Creates a class list.
    ///
    /// Returns an error if `names` is empty or contains a label twice.
    pub fn new(names: Vec<String>) -> anyhow::Result<Self> {
        if names.is_empty() {
            anyhow::bail!("class list is empty");
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                anyhow::bail!("class list contains `{name}` more than once");
            }
        }
        Ok(Self { names })
    }

    /// Loads a class list from a JSON array of strings.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read class list {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid class list {}", path.display()))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Writes the class list as a JSON array.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.names)?;
        fs::write(path, json + "\n")
            .with_context(|| format!("failed to write class list {}", path.display()))
    }

    /// Collects the names of all subdirectories of `dir`, sorted.
    ///
    /// Dataset splits store one directory per class, so this yields the class list a model
    /// trained on the split was built with.
    pub fn from_dataset<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("failed to read dataset directory {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => anyhow::bail!("class directory name {name:?} is not valid UTF-8"),
            }
        }
        names.sort();
        Self::new(names).with_context(|| format!("no classes found in {}", dir.display()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always `false`; a class list cannot be empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the label of class `index`.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Returns the index of the class called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}
