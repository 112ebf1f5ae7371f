use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

const ARTIFACT_EXTENSION: &str = "md";
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("topic '{0}' does not produce a usable file name")]
    UnusableName(String),
    #[error("failed to create output directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn illegal_chars() -> &'static Regex {
    static ILLEGAL: OnceLock<Regex> = OnceLock::new();
    ILLEGAL.get_or_init(|| {
        Regex::new(r#"[<>:"/\\|?*\x00-\x1F\x7F]"#).expect("static pattern is valid")
    })
}

/// Turns free-form topic text into a file stem that stays inside the output
/// directory on every platform. Returns `None` when nothing usable remains.
pub fn sanitize_file_stem(topic: &str) -> Option<String> {
    let replaced = illegal_chars().replace_all(topic.trim(), "_");
    let stem = replaced
        .trim_start_matches('.')
        .trim_end_matches(|c: char| c == '.' || c == ' ');

    if stem.is_empty() || stem.chars().all(|c| c == '_') {
        return None;
    }

    let base = stem.split('.').next().unwrap_or(stem);
    if RESERVED_DEVICE_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(base))
    {
        return Some(format!("_{stem}"));
    }

    Some(stem.to_string())
}

/// Writes generation results as `<topic>.md` files under one directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, topic: &str) -> Result<PathBuf, OutputError> {
        let stem =
            sanitize_file_stem(topic).ok_or_else(|| OutputError::UnusableName(topic.to_string()))?;
        Ok(self.dir.join(format!("{stem}.{ARTIFACT_EXTENSION}")))
    }

    /// Overwrites any existing artifact for the same topic.
    pub fn write(&self, topic: &str, contents: &str) -> Result<PathBuf, OutputError> {
        let path = self.path_for(topic)?;

        fs::create_dir_all(&self.dir).map_err(|source| OutputError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;
        fs::write(&path, contents).map_err(|source| OutputError::Write {
            path: path.clone(),
            source,
        })?;

        debug!("Wrote {} bytes to {:?}", contents.len(), path);
        Ok(path)
    }
}
