use super::{docx, ensure_valid, ExportFormat, Exporter};
use crate::error::ExportError;
use crate::model::{Question, Survey};

pub const HEADER: [&str; 6] = ["题号", "题型", "必填", "题干", "选项", "逻辑"];
pub const OPTION_SEPARATOR: &str = "；";
/// Crawl time is always rendered in UTC so output does not depend on the host zone.
pub const CRAWL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// One table per run of questions sharing a section.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBlock {
    pub heading: Option<String>,
    pub rows: Vec<[String; 6]>,
}

/// The tabular projection: a metadata header plus fixed-column tables.
#[derive(Debug, Clone, PartialEq)]
pub struct TabularDocument {
    pub title: String,
    pub metadata: Vec<(String, String)>,
    pub blocks: Vec<TableBlock>,
}

impl TabularDocument {
    pub fn prompts(&self) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.rows.iter().map(|r| r[3].clone()))
            .collect()
    }
}

pub struct TabularExporter;

impl Exporter for TabularExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Docx
    }

    fn render(&self, survey: &Survey) -> Result<Vec<u8>, ExportError> {
        docx::encode(&build(survey)?)
    }
}

pub fn build(survey: &Survey) -> Result<TabularDocument, ExportError> {
    ensure_valid(survey)?;

    let mut metadata = Vec::new();
    if !survey.description.is_empty() {
        metadata.push(("简介".to_string(), survey.description.clone()));
    }
    metadata.push(("来源".to_string(), survey.source_url.clone()));
    metadata.push((
        "抓取时间".to_string(),
        survey.crawl_time.format(CRAWL_TIME_FORMAT).to_string(),
    ));
    metadata.push(("题目总数".to_string(), survey.questions.len().to_string()));

    let blocks = survey
        .blocks()
        .into_iter()
        .map(|b| TableBlock {
            heading: b.section.map(|s| s.name.clone()),
            rows: b.questions.into_iter().map(row).collect(),
        })
        .collect();

    Ok(TabularDocument {
        title: survey.title.clone(),
        metadata,
        blocks,
    })
}

fn row(q: &Question) -> [String; 6] {
    [
        q.index.to_string(),
        q.kind.label().to_string(),
        if q.required { "是" } else { "否" }.to_string(),
        q.prompt.clone(),
        options_cell(q),
        q.logic.clone(),
    ]
}

/// Options joined by the fixed separator; matrix rows go on a second line.
pub fn options_cell(q: &Question) -> String {
    let options = q.options.join(OPTION_SEPARATOR);
    if q.rows.is_empty() {
        options
    } else {
        format!("{}\n行: {}", options, q.rows.join(OPTION_SEPARATOR))
    }
}
