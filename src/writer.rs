use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;
use tracing::{info, warn};

use crate::error::WriteError;
use crate::export::ExportFormat;
use crate::parser::normalize_text;

static ILLEGAL_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

const FALLBACK_STEM: &str = "wjx_export";
const MAX_STEM_CHARS: usize = 80;
const MAX_ATTEMPTS: usize = 1000;
/// Format whose file is created exclusively to claim a stem.
const CLAIM_FORMAT: ExportFormat = ExportFormat::ALL[0];

/// Persists rendered payloads into one output directory.
pub struct OutputWriter {
    dir: PathBuf,
}

impl OutputWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Claim a file stem for which no file of any format exists yet:
    /// `<title>`, then `<title>_<stamp>`, then `<title>_<stamp>_<n>`.
    /// The claim file is created with `create_new`, so concurrent callers never share a stem.
    pub fn reserve_stem(&self, title: &str, now: DateTime<Local>) -> Result<String, WriteError> {
        fs::create_dir_all(&self.dir).map_err(|source| WriteError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let base = sanitize_filename(title);
        let stamp = now.format("%Y%m%d_%H%M%S").to_string();

        for attempt in 0..MAX_ATTEMPTS {
            let stem = match attempt {
                0 => base.clone(),
                1 => format!("{}_{}", base, stamp),
                n => format!("{}_{}_{}", base, stamp, n),
            };
            let taken = ExportFormat::ALL
                .iter()
                .filter(|f| **f != CLAIM_FORMAT)
                .any(|f| self.path_for(&stem, *f).exists());
            if taken {
                continue;
            }

            let claim = self.path_for(&stem, CLAIM_FORMAT);
            match OpenOptions::new().write(true).create_new(true).open(&claim) {
                Ok(_) => return Ok(stem),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(WriteError::Io { path: claim, source }),
            }
        }
        Err(WriteError::NameCollision(base))
    }

    /// Remove the empty claim file of a format that was never written.
    pub fn release(&self, stem: &str, format: ExportFormat) {
        let path = self.path_for(stem, format);
        let empty = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(false);
        if empty {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
    }

    pub fn path_for(&self, stem: &str, format: ExportFormat) -> PathBuf {
        self.dir.join(format!("{}.{}", stem, format.extension()))
    }

    /// Write one payload and return the path actually written.
    pub fn write(&self, stem: &str, format: ExportFormat, bytes: &[u8]) -> Result<PathBuf, WriteError> {
        let path = self.path_for(stem, format);
        fs::write(&path, bytes).map_err(|source| WriteError::Io {
            path: path.clone(),
            source,
        })?;
        info!("Wrote {}", path.display());
        Ok(path)
    }

    /// Write a plain file by name (used for batch reports).
    pub fn write_named(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, WriteError> {
        fs::create_dir_all(&self.dir).map_err(|source| WriteError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(name);
        fs::write(&path, bytes).map_err(|source| WriteError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Make a title safe as a file stem on every common filesystem.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = ILLEGAL_CHARS_RE.replace_all(&normalize_text(name), "_").to_string();
    let mut stem = cleaned.trim_matches([' ', '.']).to_string();
    if stem.chars().count() > MAX_STEM_CHARS {
        stem = stem.chars().take(MAX_STEM_CHARS).collect::<String>();
        stem = stem.trim_end_matches([' ', '.']).to_string();
    }
    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn sanitize_rules() {
        assert_eq!(sanitize_filename("a/b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_filename("  .. "), "wjx_export");
        assert_eq!(sanitize_filename("问卷  调查. "), "问卷 调查");
        let long = "长".repeat(120);
        assert_eq!(sanitize_filename(&long).chars().count(), 80);
    }

    #[test]
    fn collisions_get_timestamp_then_counter() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());

        let first = writer.reserve_stem("问卷", now()).unwrap();
        assert_eq!(first, "问卷");
        writer.write(&first, ExportFormat::Json, b"{}").unwrap();

        let second = writer.reserve_stem("问卷", now()).unwrap();
        assert_eq!(second, "问卷_20260506_070809");
        writer.write(&second, ExportFormat::Markdown, b"# x").unwrap();

        let third = writer.reserve_stem("问卷", now()).unwrap();
        assert_eq!(third, "问卷_20260506_070809_2");
    }

    #[test]
    fn reserved_stem_is_claimed_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());

        let first = writer.reserve_stem("问卷", now()).unwrap();
        assert!(writer.path_for(&first, ExportFormat::Docx).exists());
        let second = writer.reserve_stem("问卷", now()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn release_drops_only_empty_claims() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path());

        let stem = writer.reserve_stem("t", now()).unwrap();
        writer.release(&stem, ExportFormat::Docx);
        assert!(!writer.path_for(&stem, ExportFormat::Docx).exists());

        let stem = writer.reserve_stem("t", now()).unwrap();
        writer.write(&stem, ExportFormat::Docx, b"PK").unwrap();
        writer.release(&stem, ExportFormat::Docx);
        assert!(writer.path_for(&stem, ExportFormat::Docx).exists());
    }

    #[test]
    fn write_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("nested"));
        let stem = writer.reserve_stem("t", now()).unwrap();
        let path = writer.write(&stem, ExportFormat::Docx, b"PK").unwrap();
        assert_eq!(path, dir.path().join("nested").join("t.docx"));
        assert_eq!(fs::read(&path).unwrap(), b"PK");
    }

    #[test]
    fn write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path().join("absent"));
        let err = writer.write("x", ExportFormat::Json, b"{}").unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
    }
}
