//! Object key helpers.
//!
//! Keys are `/`-separated and never start with `/`. A directory is
//! represented without its trailing slash; the bucket root is the empty
//! string. Directory fields in a processor config are relative to the
//! directory holding the config object itself.

use crate::error::{EtlError, EtlResult};

/// Zero-length object that keeps an otherwise empty directory visible
pub const MARKER_NAME: &str = ".keep";

const ERROR_LOG_SUFFIX: &str = "_error_log.txt";

/// Directory part of a key, `""` for objects at the bucket root.
pub fn parent(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[..idx],
        None => "",
    }
}

/// Final component of a key.
pub fn file_name(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[idx + 1..],
        None => key,
    }
}

/// Append `name` to a directory.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Listing prefix for the direct children of a directory.
pub fn dir_prefix(dir: &str) -> String {
    if dir.is_empty() {
        String::new()
    } else {
        format!("{dir}/")
    }
}

pub fn marker_key(dir: &str) -> String {
    join(dir, MARKER_NAME)
}

pub fn is_marker(key: &str) -> bool {
    file_name(key) == MARKER_NAME
}

/// `y.csv` -> `y_csv_error_log.txt`
pub fn error_log_name(file_name: &str) -> String {
    format!("{}{}", file_name.replace('.', "_"), ERROR_LOG_SUFFIX)
}

/// Syntax check for a directory field at parse time.
///
/// `.` and `..` are accepted here; whether `..` escapes the bucket is only
/// known once the config's own location is, see [`resolve`].
pub fn validate_relative(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path is empty".to_string());
    }
    if path.starts_with('/') {
        return Err(format!("{path:?} is absolute"));
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.split('/').any(str::is_empty) {
        return Err(format!("{path:?} contains an empty segment"));
    }
    Ok(())
}

/// Resolve a config-relative directory to a bucket directory.
///
/// `resolve("cfg/a.toml", "../in")` is `"in"`; `resolve("a.toml", ".")` is
/// the bucket root.
pub fn resolve(config_key: &str, relative: &str) -> EtlResult<String> {
    validate_relative(relative).map_err(EtlError::invalid_path)?;

    let mut segments: Vec<&str> = parent(config_key)
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(EtlError::invalid_path(format!(
                        "{relative:?} escapes the bucket root when resolved from {config_key}"
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    Ok(segments.join("/"))
}
