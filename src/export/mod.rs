pub mod docx;
pub mod json;
pub mod markdown;
pub mod tabular;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::ExportError;
use crate::model::Survey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Docx,
    Json,
    Markdown,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 3] = [ExportFormat::Docx, ExportFormat::Json, ExportFormat::Markdown];

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Docx => "docx",
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "md",
        }
    }
}

/// A pure projection of a finished Survey into one output format.
pub trait Exporter: Send + Sync {
    fn format(&self) -> ExportFormat;
    fn render(&self, survey: &Survey) -> Result<Vec<u8>, ExportError>;
}

/// Rendered bytes for one format, or the reason that format failed.
pub struct Rendered {
    pub format: ExportFormat,
    pub result: Result<Vec<u8>, ExportError>,
}

pub fn default_exporters() -> Vec<Box<dyn Exporter>> {
    vec![
        Box::new(tabular::TabularExporter),
        Box::new(json::JsonExporter),
        Box::new(markdown::MarkdownExporter),
    ]
}

/// Refuse to render a model that breaks an invariant; no repair is attempted.
pub(crate) fn ensure_valid(survey: &Survey) -> Result<(), ExportError> {
    survey.check_invariants().map_err(ExportError::UnsupportedValue)
}

/// Run every exporter over the same Survey. One failure never suppresses the others.
pub fn render_all(survey: &Survey, exporters: &[Box<dyn Exporter>], parallel: bool) -> Vec<Rendered> {
    let run = |exporter: &dyn Exporter| {
        let format = exporter.format();
        let result = exporter.render(survey);
        match &result {
            Ok(bytes) => debug!("Rendered {} ({} bytes)", format.extension(), bytes.len()),
            Err(e) => warn!("Export to {} failed: {}", format.extension(), e),
        }
        Rendered { format, result }
    };

    if parallel {
        exporters.par_iter().map(|e| run(e.as_ref())).collect()
    } else {
        exporters.iter().map(|e| run(e.as_ref())).collect()
    }
}
