//! Hierarchical, read-only configuration views backed by YAML.
//!
//! A [View] wraps a YAML node together with the path that led to it. Keys are
//! dotted paths (`fun.units.0.name`): mapping segments select by name and
//! numeric segments index into sequences. Typed lookups deserialize through
//! `serde`.

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur when reading a configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to parse configuration: {0}")]
    Parse(#[source] serde_yaml::Error),
    #[error("unable to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing key: {0}")]
    Missing(String),
    #[error("invalid value at {path}: {source}")]
    Invalid {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("cannot descend into {0}: not a mapping or sequence")]
    NotANode(String),
    #[error("expected a sequence at {0}")]
    NotASequence(String),
}

/// A read-only window onto part of a configuration tree.
#[derive(Clone, Debug)]
pub struct View {
    path: String,
    value: Value,
}

impl View {
    /// Wrap an already parsed YAML value.
    pub fn new(value: Value) -> Self {
        Self {
            path: String::new(),
            value,
        }
    }

    /// An empty mapping, for components configured entirely by defaults.
    pub fn empty() -> Self {
        Self::new(Value::Mapping(Default::default()))
    }

    /// Parse a YAML document.
    pub fn parse(yaml: &str) -> Result<Self, Error> {
        let value = serde_yaml::from_str(yaml).map_err(Error::Parse)?;
        Ok(Self::new(value))
    }

    /// Read and parse a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let yaml = std::fs::read_to_string(path)?;
        Self::parse(&yaml)
    }

    /// Path of this view from the root (empty for the root itself).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns whether `key` resolves to a value.
    pub fn knows(&self, key: &str) -> bool {
        matches!(self.lookup(key), Ok(Some(_)))
    }

    /// Deserialize the value at `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        let path = self.join(key);
        let value = self.lookup(key)?.ok_or_else(|| Error::Missing(path.clone()))?;
        serde_yaml::from_value(value.clone()).map_err(|source| Error::Invalid { path, source })
    }

    /// Deserialize the value at `key`, falling back to `default` when absent.
    ///
    /// A present but malformed value is still an error.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, Error> {
        if !self.knows(key) {
            return Ok(default);
        }
        self.get(key)
    }

    /// Deserialize the whole view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_yaml::from_value(self.value.clone()).map_err(|source| Error::Invalid {
            path: self.path.clone(),
            source,
        })
    }

    /// Descend into the node at `key`.
    pub fn view(&self, key: &str) -> Result<View, Error> {
        let path = self.join(key);
        let value = self.lookup(key)?.ok_or_else(|| Error::Missing(path.clone()))?;
        Ok(View {
            path,
            value: value.clone(),
        })
    }

    /// Descend into each element of the sequence at `key`.
    pub fn views(&self, key: &str) -> Result<Vec<View>, Error> {
        let path = self.join(key);
        let value = self.lookup(key)?.ok_or_else(|| Error::Missing(path.clone()))?;
        let Value::Sequence(items) = value else {
            return Err(Error::NotASequence(path));
        };
        Ok(items
            .iter()
            .enumerate()
            .map(|(index, value)| View {
                path: format!("{path}.{index}"),
                value: value.clone(),
            })
            .collect())
    }

    fn join(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<&Value>, Error> {
        let mut current = &self.value;
        let mut walked = self.path.clone();
        for segment in key.split('.') {
            let next = match current {
                Value::Mapping(mapping) => mapping.get(segment),
                Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => return Err(Error::NotANode(walked)),
            };
            let Some(next) = next else {
                return Ok(None);
            };
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);
            current = next;
        }
        Ok(Some(current))
    }
}
