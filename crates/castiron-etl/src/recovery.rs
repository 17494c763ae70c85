//! Startup cleanup of half-finished moves.
//!
//! A move is a copy followed by a delete. If the worker stops between the
//! two, the file exists in two adjacent stages with the same content. The
//! later stage is the one that counts, so the earlier copy is deleted. Two
//! objects that only share a name are different files and both stay; they
//! are reported as conflicts. Files that sit in a processing directory with
//! no matching later copy were interrupted while their command ran; they
//! are reported but left for an operator.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::EtlResult;
use crate::paths;
use crate::registry::{ConfigRegistry, RegisteredConfig};
use crate::storage::ObjectStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Earlier-stage duplicates that were deleted
    pub removed: Vec<String>,
    /// Earlier-stage objects whose later namesake has different content
    pub conflicts: Vec<String>,
    /// Files left in a processing directory
    pub stranded: Vec<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.removed.is_empty() && self.conflicts.is_empty() && self.stranded.is_empty()
    }
}

/// Run the recovery pass over every registered config.
pub async fn recover(
    store: &dyn ObjectStore,
    bucket: &str,
    registry: &ConfigRegistry,
) -> EtlResult<RecoveryReport> {
    let mut report = RecoveryReport::default();

    for entry in registry.iter() {
        recover_config(store, bucket, entry, &mut report).await?;
    }

    if report.is_clean() {
        info!(bucket, "Recovery found nothing to repair");
    } else {
        info!(
            bucket,
            removed = report.removed.len(),
            conflicts = report.conflicts.len(),
            stranded = report.stranded.len(),
            "Recovery pass finished"
        );
    }
    Ok(report)
}

async fn recover_config(
    store: &dyn ObjectStore,
    bucket: &str,
    entry: &RegisteredConfig,
    report: &mut RecoveryReport,
) -> EtlResult<()> {
    let dirs = &entry.dirs;
    let inbox = file_names(store, bucket, &dirs.inbox).await?;
    let processing = file_names(store, bucket, &dirs.processing).await?;
    let archive = file_names(store, bucket, &dirs.archive).await?;
    let error = file_names(store, bucket, &dirs.error).await?;

    let stages = [
        (&dirs.inbox, &inbox, &dirs.processing, &processing),
        (&dirs.processing, &processing, &dirs.archive, &archive),
        (&dirs.processing, &processing, &dirs.error, &error),
    ];

    // processing names already resolved against a later stage
    let mut finished = BTreeSet::new();
    for (earlier_dir, earlier, later_dir, later) in stages {
        let from_processing = earlier_dir == &dirs.processing;
        for name in earlier.intersection(later) {
            if from_processing && finished.contains(name) {
                continue;
            }
            let key = paths::join(earlier_dir, name);
            let later_key = paths::join(later_dir, name);

            if store.get(bucket, &key).await? != store.get(bucket, &later_key).await? {
                warn!(config = %entry.key, key = %key, later = %later_key, "Same name, different content; keeping both");
                report.conflicts.push(key);
                continue;
            }

            warn!(config = %entry.key, key = %key, later = %later_key, "Removing duplicate left by an interrupted move");
            store.remove(bucket, &key).await?;
            if from_processing {
                finished.insert(name.clone());
            }
            report.removed.push(key);
        }
    }

    for name in processing.difference(&finished) {
        let key = paths::join(&dirs.processing, name);
        warn!(config = %entry.key, key = %key, "File stranded in processing");
        report.stranded.push(key);
    }

    Ok(())
}

/// Names of the data files directly inside `dir`.
async fn file_names(store: &dyn ObjectStore, bucket: &str, dir: &str) -> EtlResult<BTreeSet<String>> {
    let keys = store.list(bucket, &paths::dir_prefix(dir), false).await?;
    Ok(keys
        .iter()
        .filter(|key| !paths::is_marker(key))
        .map(|key| paths::file_name(key).to_string())
        .collect())
}
