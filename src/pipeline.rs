use std::path::PathBuf;

use chrono::Local;
use tracing::{info, warn};

use crate::assemble::{RunContext, WarningSummary};
use crate::config::Settings;
use crate::error::{Error, EXIT_OUTPUT};
use crate::export::{self, ExportFormat};
use crate::fetch::{self, Fetcher};
use crate::parser;
use crate::writer::OutputWriter;

/// Result of one survey export. Individual formats may fail without failing the run.
#[derive(Debug)]
pub struct ExportOutcome {
    pub url: String,
    pub title: String,
    pub question_count: usize,
    pub files: Vec<(ExportFormat, PathBuf)>,
    pub failures: Vec<(ExportFormat, Error)>,
    pub warnings: WarningSummary,
}

impl ExportOutcome {
    pub fn exit_code(&self) -> u8 {
        if self.failures.is_empty() {
            0
        } else {
            EXIT_OUTPUT
        }
    }
}

/// Validate, fetch, then export one survey URL.
pub async fn export_url(
    fetcher: &Fetcher,
    raw_url: &str,
    writer: &OutputWriter,
    settings: &Settings,
) -> Result<ExportOutcome, Error> {
    let url = fetch::validate_url(raw_url, &settings.allowed_hosts)?;
    let markup = fetcher.fetch(url.as_str()).await?;
    export_markup(&markup, url.as_str(), writer, settings)
}

/// Parse markup and write all three formats. Parse failures return before any file is created.
pub fn export_markup(
    markup: &str,
    source_url: &str,
    writer: &OutputWriter,
    settings: &Settings,
) -> Result<ExportOutcome, Error> {
    let mut ctx = RunContext::new();
    let survey = parser::parse_survey(markup, source_url, &mut ctx)?;
    let warnings = ctx.summary();
    if warnings.count > 0 {
        warn!("{}", warnings);
    }

    let rendered = export::render_all(&survey, &export::default_exporters(), settings.parallel_export);
    let stem = writer.reserve_stem(&survey.title, Local::now())?;

    let mut files = Vec::new();
    let mut failures = Vec::new();
    for r in rendered {
        let written = r
            .result
            .map_err(Error::from)
            .and_then(|bytes| writer.write(&stem, r.format, &bytes).map_err(Error::from));
        match written {
            Ok(path) => files.push((r.format, path)),
            Err(e) => {
                warn!("{} output failed: {}", r.format.extension(), e);
                writer.release(&stem, r.format);
                failures.push((r.format, e));
            }
        }
    }

    info!(
        "Exported \"{}\": {} files written, {} failed",
        survey.title,
        files.len(),
        failures.len()
    );

    Ok(ExportOutcome {
        url: source_url.to_string(),
        title: survey.title.clone(),
        question_count: survey.questions.len(),
        files,
        failures,
        warnings,
    })
}
