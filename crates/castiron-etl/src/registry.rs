//! Registered processor configs.
//!
//! Entries are keyed by the config object's key. A second index maps each
//! resolved inbox directory back to the owning config, so at most one
//! config can claim a given inbox and data-file resolution never depends on
//! map iteration order.

use std::collections::HashMap;

use globset::GlobMatcher;
use tracing::debug;

use crate::error::{EtlError, EtlResult};
use crate::paths;
use crate::processor::ProcessorConfig;

/// The four stage directories of one config, resolved to bucket keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDirs {
    pub inbox: String,
    pub processing: String,
    pub archive: String,
    pub error: String,
}

impl PipelineDirs {
    /// Resolve all four directories against the config's location.
    ///
    /// A file must leave a stage when it moves on, so the inbox has to differ
    /// from every later stage and processing from archive and error. Archive
    /// and error may share a directory.
    pub fn resolve(config_key: &str, config: &ProcessorConfig) -> EtlResult<Self> {
        let dirs = Self {
            inbox: paths::resolve(config_key, &config.inbox_dir)?,
            processing: paths::resolve(config_key, &config.processing_dir)?,
            archive: paths::resolve(config_key, &config.archive_dir)?,
            error: paths::resolve(config_key, &config.error_dir)?,
        };

        let stages = [
            ("inbox_dir", &dirs.inbox, "processing_dir", &dirs.processing),
            ("inbox_dir", &dirs.inbox, "archive_dir", &dirs.archive),
            ("inbox_dir", &dirs.inbox, "error_dir", &dirs.error),
            ("processing_dir", &dirs.processing, "archive_dir", &dirs.archive),
            ("processing_dir", &dirs.processing, "error_dir", &dirs.error),
        ];
        for (field, dir, other_field, other) in stages {
            if dir == other {
                return Err(EtlError::invalid_path(format!(
                    "{field} and {other_field} of {config_key} both resolve to {dir:?}"
                )));
            }
        }

        Ok(dirs)
    }

    /// Directories that get a marker object when empty. The error directory
    /// is left out.
    pub fn marked(&self) -> [&str; 3] {
        [&self.inbox, &self.processing, &self.archive]
    }
}

/// One active config with everything needed to route files to it.
#[derive(Debug, Clone)]
pub struct RegisteredConfig {
    pub key: String,
    pub config: ProcessorConfig,
    pub dirs: PipelineDirs,
    matcher: GlobMatcher,
}

impl RegisteredConfig {
    pub fn new(key: impl Into<String>, config: ProcessorConfig) -> EtlResult<Self> {
        let key = key.into();
        let dirs = PipelineDirs::resolve(&key, &config)?;
        let matcher = config.matcher()?;
        Ok(Self {
            key,
            config,
            dirs,
            matcher,
        })
    }

    /// Whether a file name (no directory part) is accepted by the glob.
    pub fn accepts(&self, file_name: &str) -> bool {
        !paths::is_marker(file_name) && self.matcher.is_match(file_name)
    }
}

#[derive(Debug, Default)]
pub struct ConfigRegistry {
    entries: HashMap<String, RegisteredConfig>,
    inboxes: HashMap<String, String>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the config stored under `key`.
    ///
    /// Fails with [`EtlError::InboxConflict`] when another key already owns
    /// the same inbox directory; the registry is left unchanged then.
    pub fn register(&mut self, key: &str, config: ProcessorConfig) -> EtlResult<&RegisteredConfig> {
        let entry = RegisteredConfig::new(key, config)?;

        if let Some(owner) = self.inboxes.get(&entry.dirs.inbox) {
            if owner != key {
                return Err(EtlError::InboxConflict {
                    config: key.to_string(),
                    inbox: entry.dirs.inbox.clone(),
                    owner: owner.clone(),
                });
            }
        }

        if let Some(previous) = self.entries.remove(key) {
            self.inboxes.remove(&previous.dirs.inbox);
        }

        debug!(config = key, inbox = %entry.dirs.inbox, "Registering processor config");
        self.inboxes.insert(entry.dirs.inbox.clone(), key.to_string());
        Ok(&*self.entries.entry(key.to_string()).or_insert(entry))
    }

    /// Drop the config stored under `key`. Nothing in the bucket is touched.
    pub fn unregister(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.inboxes.remove(&entry.dirs.inbox);
                true
            }
            None => false,
        }
    }

    /// The config whose inbox is the exact parent of `data_key` and whose
    /// glob accepts its file name.
    pub fn resolve(&self, data_key: &str) -> Option<&RegisteredConfig> {
        let owner = self.inboxes.get(paths::parent(data_key))?;
        self.entries
            .get(owner)
            .filter(|entry| entry.accepts(paths::file_name(data_key)))
    }

    pub fn get(&self, key: &str) -> Option<&RegisteredConfig> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredConfig> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
