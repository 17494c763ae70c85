//! Processor config documents.
//!
//! A processor config is a TOML object uploaded next to the directories it
//! manages. Only the `[castiron.etl]` table is read:
//!
//! ```toml
//! [castiron.etl]
//! enabled = true
//! handled_file_glob = "*.csv"
//! inbox_dir = "in"
//! processing_dir = "processing"
//! archive_dir = "archive"
//! error_dir = "error"
//! save_error_log = true
//! shell = "psql -c \"\\copy $DATABASE_TABLE from '$ETL_FILENAME' csv\""
//! ```

use globset::{GlobBuilder, GlobMatcher};
use serde::{Deserialize, Serialize};

use crate::error::{EtlError, EtlResult};
use crate::paths;

/// Validated description of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Disabled configs parse fine but are never registered
    pub enabled: bool,

    /// Glob over file names in the inbox directory
    pub handled_file_glob: String,

    pub inbox_dir: String,
    pub processing_dir: String,
    pub archive_dir: String,
    pub error_dir: String,

    /// Keep the command's combined output next to failed files
    pub save_error_log: bool,

    /// Command line run through `sh -c` for each file
    pub shell: String,
}

impl ProcessorConfig {
    /// Compile the file glob. `*` does not cross `/` and matching is
    /// case-sensitive.
    pub fn matcher(&self) -> EtlResult<GlobMatcher> {
        GlobBuilder::new(&self.handled_file_glob)
            .literal_separator(true)
            .build()
            .map(|glob| glob.compile_matcher())
            .map_err(|e| {
                EtlError::config_parse(format!(
                    "handled_file_glob {:?}: {}",
                    self.handled_file_glob, e
                ))
            })
    }

    fn validate(&self) -> EtlResult<()> {
        let dirs = [
            ("inbox_dir", &self.inbox_dir),
            ("processing_dir", &self.processing_dir),
            ("archive_dir", &self.archive_dir),
            ("error_dir", &self.error_dir),
        ];
        for (field, value) in dirs {
            paths::validate_relative(value)
                .map_err(|reason| EtlError::config_parse(format!("{field}: {reason}")))?;
        }

        if self.shell.trim().is_empty() {
            return Err(EtlError::config_parse("shell: command is empty"));
        }

        self.matcher()?;
        Ok(())
    }
}

/// Parse and validate a processor config document.
///
/// A document without a `[castiron.etl]` table is treated as an empty table
/// and therefore fails on the first missing field. Any failure yields
/// [`EtlError::ConfigParse`]; the message says which part was wrong.
pub fn parse_config(raw: &str) -> EtlResult<ProcessorConfig> {
    let document: toml::Table = toml::from_str(raw).map_err(EtlError::config_parse)?;
    let section = etl_section(&document)?;

    let config: ProcessorConfig = toml::Value::Table(section)
        .try_into()
        .map_err(EtlError::config_parse)?;
    config.validate()?;

    Ok(config)
}

fn etl_section(document: &toml::Table) -> EtlResult<toml::Table> {
    let castiron = match document.get("castiron") {
        None => return Ok(toml::Table::new()),
        Some(toml::Value::Table(table)) => table,
        Some(other) => {
            return Err(EtlError::config_parse(format!(
                "castiron must be a table, found {}",
                other.type_str()
            )))
        }
    };

    match castiron.get("etl") {
        None => Ok(toml::Table::new()),
        Some(toml::Value::Table(table)) => Ok(table.clone()),
        Some(other) => Err(EtlError::config_parse(format!(
            "castiron.etl must be a table, found {}",
            other.type_str()
        ))),
    }
}
