use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::Result;
use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Settings;
use crate::fetch::{self, Fetcher};
use crate::pipeline::{self, ExportOutcome};
use crate::writer::OutputWriter;

static URL_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[,，;；\s]+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
}

/// One line of the batch report.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub url: String,
    pub status: Status,
    pub title: String,
    pub message: String,
    pub files: Vec<PathBuf>,
    pub error_code: u8,
    pub warnings: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub run_id: String,
    pub output_dir: PathBuf,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped: Vec<String>,
    pub log_path: PathBuf,
    pub bundle_path: PathBuf,
    pub results: Vec<BatchEntry>,
}

impl BatchReport {
    /// Worst exit code among the processed URLs.
    pub fn exit_code(&self) -> u8 {
        self.results.iter().map(|r| r.error_code).max().unwrap_or(0)
    }
}

/// Split free-form input into URL tokens (commas, semicolons incl. full-width, whitespace).
pub fn split_url_tokens(raw: &str) -> Vec<String> {
    URL_SPLIT_RE
        .split(raw.trim_start_matches('\u{feff}'))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn read_url_file(path: &Path) -> std::io::Result<Vec<String>> {
    let bytes = std::fs::read(path)?;
    Ok(split_url_tokens(&String::from_utf8_lossy(&bytes)))
}

/// De-duplicate (first occurrence wins) and partition into (valid, invalid).
pub fn partition_urls(tokens: Vec<String>, allowed_hosts: &[String]) -> (Vec<String>, Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for token in tokens {
        if !seen.insert(token.clone()) {
            continue;
        }
        match fetch::validate_url(&token, allowed_hosts) {
            Ok(_) => valid.push(token),
            Err(_) => invalid.push(token),
        }
    }
    (valid, invalid)
}

/// Export many URLs into `<output_dir>/<run_id>/` with bounded concurrency.
pub async fn run_batch(
    urls: Vec<String>,
    skipped: Vec<String>,
    settings: Arc<Settings>,
) -> Result<BatchReport> {
    let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut log = RunLog::default();
    log.push(format!("run {}: {} URLs, {} skipped", run_id, urls.len(), skipped.len()));
    for bad in &skipped {
        warn!("Skipping invalid or unsupported URL: {}", bad);
        log.push(format!("SKIP {}: invalid or unsupported URL", bad));
    }

    let writer = Arc::new(OutputWriter::new(settings.output_dir.join(&run_id)));
    let fetcher = Arc::new(Fetcher::new(&settings)?);
    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let total = urls.len();
    info!("Batch {}: {} URLs -> {}", run_id, total, writer.dir().display());

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, BatchEntry)>(total.max(1));
    for (pos, url) in urls.into_iter().enumerate() {
        let fetcher = Arc::clone(&fetcher);
        let writer = Arc::clone(&writer);
        let settings = Arc::clone(&settings);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let entry = match sem.acquire().await {
                Ok(_permit) => {
                    let result = pipeline::export_url(&fetcher, &url, &writer, &settings).await;
                    entry_for(&url, result)
                }
                Err(e) => failed_entry(&url, e.to_string(), crate::error::EXIT_FETCH),
            };
            let _ = tx.send((pos, entry)).await;
        });
    }
    drop(tx);

    let mut results: Vec<(usize, BatchEntry)> = Vec::with_capacity(total);
    while let Some(item) = rx.recv().await {
        pb.inc(1);
        log.record(&item.1);
        results.push(item);
    }
    pb.finish_and_clear();
    results.sort_by_key(|(pos, _)| *pos);
    let results: Vec<BatchEntry> = results.into_iter().map(|(_, e)| e).collect();

    let success_count = results.iter().filter(|r| r.status == Status::Success).count();
    let report = BatchReport {
        output_dir: writer.dir().to_path_buf(),
        success_count,
        failed_count: results.len() - success_count,
        skipped,
        log_path: writer.dir().join(format!("run_{}.log", run_id)),
        bundle_path: writer.dir().join(format!("bundle_{}.zip", run_id)),
        results,
        run_id,
    };

    let mut bundled: Vec<PathBuf> = report.results.iter().flat_map(|r| r.files.clone()).collect();
    bundled.extend(write_report(&writer, &report)?);

    log.push(format!(
        "finished: {} succeeded, {} failed",
        report.success_count, report.failed_count
    ));
    bundled.push(writer.write_named(&file_name(&report.log_path), log.text().as_bytes())?);
    write_bundle(&report.bundle_path, &bundled)?;
    info!("Wrote {}", report.bundle_path.display());

    info!(
        "Batch finished: {} succeeded, {} failed",
        report.success_count, report.failed_count
    );
    Ok(report)
}

fn entry_for(url: &str, result: Result<ExportOutcome, crate::error::Error>) -> BatchEntry {
    match result {
        Ok(outcome) => {
            let code = outcome.exit_code();
            let message = if outcome.failures.is_empty() {
                outcome.warnings.to_string()
            } else {
                outcome
                    .failures
                    .iter()
                    .map(|(f, e)| format!("{}: {}", f.extension(), e))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            BatchEntry {
                url: url.to_string(),
                status: if code == 0 { Status::Success } else { Status::Failed },
                title: outcome.title,
                message,
                files: outcome.files.into_iter().map(|(_, p)| p).collect(),
                error_code: code,
                warnings: outcome.warnings.count,
            }
        }
        Err(e) => failed_entry(url, e.to_string(), e.exit_code()),
    }
}

fn failed_entry(url: &str, message: String, code: u8) -> BatchEntry {
    BatchEntry {
        url: url.to_string(),
        status: Status::Failed,
        title: String::new(),
        message,
        files: Vec::new(),
        error_code: code,
        warnings: 0,
    }
}

/// Timestamped, human-readable trail of one batch run.
#[derive(Default)]
struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    fn push(&mut self, line: String) {
        self.lines
            .push(format!("[{}] {}", Local::now().format("%H:%M:%S"), line));
    }

    fn record(&mut self, entry: &BatchEntry) {
        let line = match entry.status {
            Status::Success => format!(
                "OK {} -> {} ({} files; {})",
                entry.url,
                entry.title,
                entry.files.len(),
                entry.message
            ),
            Status::Failed => format!("FAIL {} [exit {}]: {}", entry.url, entry.error_code, entry.message),
        };
        self.push(line);
    }

    fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Deflated zip of every listed file, stored flat by file name.
fn write_bundle(path: &Path, files: &[PathBuf]) -> Result<()> {
    let mut zip = zip::ZipWriter::new(File::create(path)?);
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for file in files.iter().filter(|f| f.exists()) {
        zip.start_file(file_name(file), options)?;
        zip.write_all(&std::fs::read(file)?)?;
    }
    zip.finish()?;
    Ok(())
}

/// `results.json` with every entry, `failed_urls.txt` as `url<TAB>message` lines.
fn write_report(writer: &OutputWriter, report: &BatchReport) -> Result<Vec<PathBuf>> {
    let json = serde_json::to_vec_pretty(report)?;
    let results = writer.write_named("results.json", &json)?;
    info!("Wrote {}", results.display());

    let failed: Vec<String> = report
        .results
        .iter()
        .filter(|r| r.status == Status::Failed)
        .map(|r| format!("{}\t{}", r.url, r.message))
        .collect();
    let failed = writer.write_named("failed_urls.txt", failed.join("\n").as_bytes())?;
    info!("Wrote {}", failed.display());
    Ok(vec![results, failed])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_mixed_separators() {
        let tokens = split_url_tokens("\u{feff}https://a.wjx.cn/1, https://a.wjx.cn/2；https://a.wjx.cn/3\n\thttps://a.wjx.cn/4");
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0], "https://a.wjx.cn/1");
        assert_eq!(tokens[3], "https://a.wjx.cn/4");
    }

    #[test]
    fn partition_dedupes_and_validates() {
        let hosts = Settings::default().allowed_hosts;
        let tokens = vec![
            "https://v.wjx.cn/vm/a.aspx".to_string(),
            "https://example.com/x".to_string(),
            "https://v.wjx.cn/vm/a.aspx".to_string(),
            "https://v.wjx.cn/vm/b.aspx".to_string(),
        ];
        let (valid, invalid) = partition_urls(tokens, &hosts);
        assert_eq!(valid, vec!["https://v.wjx.cn/vm/a.aspx", "https://v.wjx.cn/vm/b.aspx"]);
        assert_eq!(invalid, vec!["https://example.com/x"]);
    }

    #[test]
    fn reads_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.csv");
        std::fs::write(&path, "https://v.wjx.cn/vm/a.aspx,https://v.wjx.cn/vm/b.aspx\n").unwrap();
        assert_eq!(read_url_file(&path).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_batch_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            output_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let report = run_batch(Vec::new(), vec!["bad".to_string()], Arc::new(settings))
            .await
            .unwrap();
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failed_count, 0);
        assert_eq!(report.exit_code(), 0);
        assert!(report.output_dir.join("results.json").exists());
        assert!(report.output_dir.join("failed_urls.txt").exists());

        let log = std::fs::read_to_string(&report.log_path).unwrap();
        assert!(log.contains("SKIP bad"));
        assert!(log.contains("finished: 0 succeeded, 0 failed"));

        let archive = zip::ZipArchive::new(File::open(&report.bundle_path).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        let log_name = file_name(&report.log_path);
        assert_eq!(names, vec!["failed_urls.txt", "results.json", log_name.as_str()]);
    }

    #[test]
    fn bundle_stores_files_flat() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("out");
        std::fs::create_dir_all(&nested).unwrap();
        let a = nested.join("问卷.json");
        let b = nested.join("问卷.md");
        std::fs::write(&a, b"{}").unwrap();
        std::fs::write(&b, b"# t").unwrap();

        let bundle = dir.path().join("bundle.zip");
        write_bundle(&bundle, &[a, b, nested.join("missing.docx")]).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut md = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("问卷.md").unwrap(), &mut md).unwrap();
        assert_eq!(md, "# t");
    }

    #[test]
    fn failed_entry_carries_exit_code() {
        let err = crate::error::Error::from(crate::error::ParseError::MalformedMarkup);
        let entry = entry_for("https://v.wjx.cn/vm/x.aspx", Err(err));
        assert_eq!(entry.status, Status::Failed);
        assert_eq!(entry.error_code, 3);
        assert!(entry.message.starts_with("malformed-markup"));
    }
}
