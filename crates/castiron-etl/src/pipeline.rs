//! Data file lifecycle: inbox → processing → archive | error.
//!
//! Handling a file is split in two halves. [`FilePipeline::claim`] resolves
//! the owning config and moves the file out of the inbox; it must run on the
//! single consumer so registry reads and claims stay ordered with config
//! events. [`FilePipeline::process`] materializes the claimed file, runs the
//! command and routes the file by its outcome; it only touches keys the
//! claim already owns and may run on a separate task.
//!
//! Moves are copy-then-delete and are not rolled back. A store failure part
//! way through leaves the file where the failing step found it, possibly in
//! two directories at once; the startup recovery pass cleans that up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::DestinationConfig;
use crate::error::{EtlError, EtlResult};
use crate::paths;
use crate::registry::{ConfigRegistry, PipelineDirs};
use crate::runner::{command_env, CommandRunner, CommandStatus};
use crate::storage::ObjectStore;

const SCRATCH_PREFIX: &str = "castiron-";

/// A file that has been moved to its processing directory and now belongs
/// to this worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedFile {
    pub run_id: Uuid,
    pub bucket: String,
    pub config_key: String,
    pub file_name: String,
    pub shell: String,
    pub save_error_log: bool,
    pub processing_key: String,
    pub archive_key: String,
    pub error_key: String,
    pub error_log_key: String,
}

/// What happened to one data file notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// No registered config owns the key, it is no longer in the inbox, or
    /// its processing slot is taken
    NotHandled,
    Archived {
        archive_key: String,
    },
    Failed {
        error_key: String,
        /// Set when the config asks for the command output to be kept
        error_log_key: Option<String>,
        /// `None` if the command never started, was killed or timed out
        exit_code: Option<i32>,
    },
}

#[derive(Clone)]
pub struct FilePipeline {
    store: Arc<dyn ObjectStore>,
    runner: Arc<dyn CommandRunner>,
    destination: DestinationConfig,
    work_dir: Option<PathBuf>,
}

impl FilePipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        runner: Arc<dyn CommandRunner>,
        destination: DestinationConfig,
    ) -> Self {
        Self {
            store,
            runner,
            destination,
            work_dir: None,
        }
    }

    /// Create scratch directories under `work_dir` instead of the system
    /// temp dir.
    pub fn with_work_dir(mut self, work_dir: Option<PathBuf>) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Claim then process in one go.
    pub async fn handle_data_file(
        &self,
        registry: &ConfigRegistry,
        bucket: &str,
        key: &str,
    ) -> EtlResult<FileOutcome> {
        match self.claim(registry, bucket, key).await? {
            Some(claimed) => self.process(claimed).await,
            None => Ok(FileOutcome::NotHandled),
        }
    }

    /// Resolve `key` against the registry and move it to the processing
    /// directory.
    ///
    /// Returns `None` when no config owns the key, when the object is
    /// already gone from the inbox (a redelivered event for a file another
    /// run has claimed), or when an earlier file of the same name still
    /// occupies the processing directory. In the last case the new file
    /// stays in the inbox untouched.
    pub async fn claim(
        &self,
        registry: &ConfigRegistry,
        bucket: &str,
        key: &str,
    ) -> EtlResult<Option<ClaimedFile>> {
        let Some(entry) = registry.resolve(key) else {
            debug!(bucket, key, "No processor config owns this file");
            return Ok(None);
        };

        if !self.still_present(bucket, key).await? {
            debug!(bucket, key, "File already left the inbox, ignoring event");
            return Ok(None);
        }

        let file_name = paths::file_name(key);
        let processing_key = paths::join(&entry.dirs.processing, file_name);
        if self.still_present(bucket, &processing_key).await? {
            warn!(
                bucket,
                key,
                processing_key = %processing_key,
                "A file with this name is still in processing, leaving it in the inbox"
            );
            return Ok(None);
        }

        let claimed = ClaimedFile {
            run_id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            config_key: entry.key.clone(),
            file_name: file_name.to_string(),
            shell: entry.config.shell.clone(),
            save_error_log: entry.config.save_error_log,
            processing_key,
            archive_key: paths::join(&entry.dirs.archive, file_name),
            error_key: paths::join(&entry.dirs.error, file_name),
            error_log_key: paths::join(&entry.dirs.error, &paths::error_log_name(file_name)),
        };

        self.store
            .move_object(bucket, key, &claimed.processing_key)
            .await?;

        info!(
            run_id = %claimed.run_id,
            config = %claimed.config_key,
            from = key,
            to = %claimed.processing_key,
            "File claimed"
        );
        Ok(Some(claimed))
    }

    /// Run the config's command against a claimed file and route it to the
    /// archive or error directory.
    #[instrument(
        name = "process_file",
        skip_all,
        fields(run_id = %claimed.run_id, bucket = %claimed.bucket, key = %claimed.processing_key)
    )]
    pub async fn process(&self, claimed: ClaimedFile) -> EtlResult<FileOutcome> {
        let scratch = self.scratch_dir()?;
        let local_file = scratch.path().join(&claimed.file_name);

        let data = self
            .store
            .get(&claimed.bucket, &claimed.processing_key)
            .await?;
        tokio::fs::write(&local_file, &data).await?;
        debug!(bytes = data.len(), path = %local_file.display(), "File materialized");

        let output = if claimed.save_error_log {
            Some(tempfile::NamedTempFile::new_in(scratch.path())?.into_temp_path())
        } else {
            None
        };

        let (status, launch_error) = self
            .run_command(&claimed, scratch.path(), &local_file, output.as_deref())
            .await?;

        if status.success() {
            self.store
                .move_object(&claimed.bucket, &claimed.processing_key, &claimed.archive_key)
                .await?;
            info!(archive_key = %claimed.archive_key, "File archived");
            return Ok(FileOutcome::Archived {
                archive_key: claimed.archive_key,
            });
        }

        self.store
            .move_object(&claimed.bucket, &claimed.processing_key, &claimed.error_key)
            .await?;

        let error_log_key = if claimed.save_error_log {
            let log = match (launch_error, output.as_deref()) {
                (Some(message), _) => message.into_bytes(),
                (None, Some(path)) => tokio::fs::read(path).await?,
                (None, None) => Vec::new(),
            };
            self.store
                .put(&claimed.bucket, &claimed.error_log_key, log)
                .await?;
            Some(claimed.error_log_key)
        } else {
            None
        };

        warn!(
            exit_code = ?status.exit_code,
            timed_out = status.timed_out,
            error_key = %claimed.error_key,
            error_log_key = ?error_log_key,
            "File failed"
        );
        Ok(FileOutcome::Failed {
            error_key: claimed.error_key,
            error_log_key,
            exit_code: status.exit_code,
        })
    }

    /// Give each empty stage directory a marker object so it shows up in
    /// listings. Checking and creating is not atomic; a racing creator only
    /// writes the same empty object again.
    pub async fn ensure_markers(&self, bucket: &str, dirs: &PipelineDirs) -> EtlResult<()> {
        for dir in dirs.marked() {
            let existing = self.store.list(bucket, &paths::dir_prefix(dir), true).await?;
            if existing.is_empty() {
                let marker = paths::marker_key(dir);
                self.store.put(bucket, &marker, Vec::new()).await?;
                debug!(bucket, marker = %marker, "Created directory marker");
            }
        }
        Ok(())
    }

    async fn still_present(&self, bucket: &str, key: &str) -> EtlResult<bool> {
        let listed = self.store.list(bucket, key, false).await?;
        Ok(listed.iter().any(|k| k == key))
    }

    fn scratch_dir(&self) -> EtlResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match &self.work_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    /// A command that cannot start counts as a failed run; its error text
    /// stands in for the command output.
    async fn run_command(
        &self,
        claimed: &ClaimedFile,
        workdir: &Path,
        local_file: &Path,
        output: Option<&Path>,
    ) -> EtlResult<(CommandStatus, Option<String>)> {
        let env = command_env(&self.destination, local_file);
        match self.runner.run(&claimed.shell, &env, workdir, output).await {
            Ok(status) => Ok((status, None)),
            Err(EtlError::CommandLaunch(err)) => {
                warn!(error = %err, shell = %claimed.shell, "Command could not be started");
                let status = CommandStatus {
                    exit_code: None,
                    timed_out: false,
                };
                Ok((status, Some(format!("failed to launch command: {err}\n"))))
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::processor::ProcessorConfig;
    use crate::runner::ShellCommandRunner;
    use crate::storage::InMemoryStore;

    const BUCKET: &str = "etl";

    fn config(shell: &str, save_error_log: bool) -> ProcessorConfig {
        ProcessorConfig {
            enabled: true,
            handled_file_glob: "*.csv".to_string(),
            inbox_dir: "in".to_string(),
            processing_dir: "proc".to_string(),
            archive_dir: "arch".to_string(),
            error_dir: "err".to_string(),
            save_error_log,
            shell: shell.to_string(),
        }
    }

    fn setup(
        shell: &str,
        save_error_log: bool,
        runner: ShellCommandRunner,
    ) -> (Arc<InMemoryStore>, FilePipeline, ConfigRegistry) {
        let store = Arc::new(InMemoryStore::with_bucket(BUCKET));
        let pipeline = FilePipeline::new(
            store.clone(),
            Arc::new(runner),
            DestinationConfig::default(),
        );
        let mut registry = ConfigRegistry::new();
        registry
            .register("cfg/a.toml", config(shell, save_error_log))
            .unwrap();
        (store, pipeline, registry)
    }

    #[tokio::test]
    async fn test_success_archives() {
        let (store, pipeline, registry) = setup("exit 0", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/x.csv", b"1,2\n".to_vec()).await.unwrap();

        let outcome = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/x.csv")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FileOutcome::Archived {
                archive_key: "cfg/arch/x.csv".to_string()
            }
        );
        assert_eq!(store.keys(BUCKET), vec!["cfg/arch/x.csv"]);
    }

    #[tokio::test]
    async fn test_command_reads_local_copy() {
        let (store, pipeline, registry) = setup(
            "grep -q needle \"$ETL_FILENAME\"",
            false,
            ShellCommandRunner::new(),
        );
        store.put(BUCKET, "cfg/in/hit.csv", b"hay needle".to_vec()).await.unwrap();
        store.put(BUCKET, "cfg/in/miss.csv", b"hay".to_vec()).await.unwrap();

        let hit = pipeline.handle_data_file(&registry, BUCKET, "cfg/in/hit.csv").await.unwrap();
        let miss = pipeline.handle_data_file(&registry, BUCKET, "cfg/in/miss.csv").await.unwrap();

        assert!(matches!(hit, FileOutcome::Archived { .. }));
        assert!(matches!(miss, FileOutcome::Failed { exit_code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_failure_saves_log() {
        let (store, pipeline, registry) =
            setup("echo bad row >&2; exit 1", true, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/y.csv", b"x".to_vec()).await.unwrap();

        let outcome = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/y.csv")
            .await
            .unwrap();

        assert_eq!(
            outcome,
            FileOutcome::Failed {
                error_key: "cfg/err/y.csv".to_string(),
                error_log_key: Some("cfg/err/y_csv_error_log.txt".to_string()),
                exit_code: Some(1),
            }
        );
        let log = store.get(BUCKET, "cfg/err/y_csv_error_log.txt").await.unwrap();
        assert_eq!(String::from_utf8(log).unwrap().trim(), "bad row");
        assert!(!store.contains(BUCKET, "cfg/in/y.csv"));
        assert!(!store.contains(BUCKET, "cfg/proc/y.csv"));
    }

    #[tokio::test]
    async fn test_failure_without_log() {
        let (store, pipeline, registry) = setup("echo noise; exit 2", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/y.csv", b"x".to_vec()).await.unwrap();

        let outcome = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/y.csv")
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            FileOutcome::Failed { error_log_key: None, exit_code: Some(2), .. }
        ));
        assert_eq!(store.keys(BUCKET), vec!["cfg/err/y.csv"]);
    }

    #[tokio::test]
    async fn test_launch_failure_routes_to_error() {
        let runner = ShellCommandRunner::new().with_shell("/nonexistent/castiron-sh");
        let (store, pipeline, registry) = setup("exit 0", true, runner);
        store.put(BUCKET, "cfg/in/z.csv", b"x".to_vec()).await.unwrap();

        let outcome = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/z.csv")
            .await
            .unwrap();

        assert!(matches!(outcome, FileOutcome::Failed { exit_code: None, .. }));
        assert!(store.contains(BUCKET, "cfg/err/z.csv"));
        let log = store.get(BUCKET, "cfg/err/z_csv_error_log.txt").await.unwrap();
        assert!(String::from_utf8(log).unwrap().contains("failed to launch command"));
    }

    #[tokio::test]
    async fn test_unmatched_file_untouched() {
        let (store, pipeline, registry) = setup("exit 0", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/notes.txt", Vec::new()).await.unwrap();
        store.put(BUCKET, "elsewhere/x.csv", Vec::new()).await.unwrap();

        for key in ["cfg/in/notes.txt", "elsewhere/x.csv"] {
            let outcome = pipeline.handle_data_file(&registry, BUCKET, key).await.unwrap();
            assert_eq!(outcome, FileOutcome::NotHandled);
            assert!(store.contains(BUCKET, key));
        }
    }

    #[tokio::test]
    async fn test_redelivery_after_claim_is_noop() {
        let (store, pipeline, registry) = setup("exit 0", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/z.csv", b"x".to_vec()).await.unwrap();

        let claimed = pipeline
            .claim(&registry, BUCKET, "cfg/in/z.csv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.processing_key, "cfg/proc/z.csv");

        let again = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/z.csv")
            .await
            .unwrap();
        assert_eq!(again, FileOutcome::NotHandled);
        assert_eq!(store.keys(BUCKET), vec!["cfg/proc/z.csv"]);
    }

    #[tokio::test]
    async fn test_same_name_not_claimed_while_processing() {
        let (store, pipeline, registry) = setup("exit 0", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/x.csv", b"FIRST".to_vec()).await.unwrap();
        let first = pipeline
            .claim(&registry, BUCKET, "cfg/in/x.csv")
            .await
            .unwrap()
            .unwrap();

        store.put(BUCKET, "cfg/in/x.csv", b"SECOND".to_vec()).await.unwrap();
        let second = pipeline.claim(&registry, BUCKET, "cfg/in/x.csv").await.unwrap();
        assert!(second.is_none());

        let outcome = pipeline.process(first).await.unwrap();
        assert!(matches!(outcome, FileOutcome::Archived { .. }));
        assert_eq!(store.get(BUCKET, "cfg/arch/x.csv").await.unwrap(), b"FIRST");
        assert_eq!(store.get(BUCKET, "cfg/in/x.csv").await.unwrap(), b"SECOND");

        // the slot is free again
        let again = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/x.csv")
            .await
            .unwrap();
        assert!(matches!(again, FileOutcome::Archived { .. }));
        assert_eq!(store.get(BUCKET, "cfg/arch/x.csv").await.unwrap(), b"SECOND");
        assert_eq!(store.keys(BUCKET), vec!["cfg/arch/x.csv"]);
    }

    #[tokio::test]
    async fn test_store_failure_aborts_without_rollback() {
        let (store, pipeline, registry) = setup("exit 0", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/x.csv", b"x".to_vec()).await.unwrap();
        store.fail_key("cfg/arch/x.csv");

        let err = pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/x.csv")
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Store(_)));
        // the claim stands, the file waits in processing
        assert_eq!(store.keys(BUCKET), vec!["cfg/proc/x.csv"]);
    }

    #[tokio::test]
    async fn test_scratch_dir_removed() {
        let work_dir = TempDir::new().unwrap();
        let (store, pipeline, registry) = setup("exit 1", true, ShellCommandRunner::new());
        let pipeline = pipeline.with_work_dir(Some(work_dir.path().to_path_buf()));
        store.put(BUCKET, "cfg/in/x.csv", b"x".to_vec()).await.unwrap();

        pipeline
            .handle_data_file(&registry, BUCKET, "cfg/in/x.csv")
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_ensure_markers_only_for_empty_dirs() {
        let (store, pipeline, registry) = setup("exit 0", false, ShellCommandRunner::new());
        store.put(BUCKET, "cfg/in/waiting.csv", Vec::new()).await.unwrap();
        let dirs = registry.get("cfg/a.toml").unwrap().dirs.clone();

        pipeline.ensure_markers(BUCKET, &dirs).await.unwrap();
        pipeline.ensure_markers(BUCKET, &dirs).await.unwrap();

        assert_eq!(
            store.keys(BUCKET),
            vec!["cfg/arch/.keep", "cfg/in/waiting.csv", "cfg/proc/.keep"]
        );
    }
}
