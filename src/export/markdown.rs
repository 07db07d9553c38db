use super::tabular::{CRAWL_TIME_FORMAT, OPTION_SEPARATOR};
use super::{ensure_valid, ExportFormat, Exporter};
use crate::error::ExportError;
use crate::model::{Question, Survey};

pub const PROMPT_PREFIX: &str = "- 题干: ";

/// Human-readable Markdown narrative.
pub struct MarkdownExporter;

impl Exporter for MarkdownExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Markdown
    }

    fn render(&self, survey: &Survey) -> Result<Vec<u8>, ExportError> {
        render(survey).map(String::into_bytes)
    }
}

pub fn render(survey: &Survey) -> Result<String, ExportError> {
    ensure_valid(survey)?;

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("# {}", survey.title));
    lines.push(String::new());
    if !survey.description.is_empty() {
        lines.push(format!("> {}", survey.description));
        lines.push(String::new());
    }
    lines.push("## 元数据".to_string());
    lines.push(format!("- 来源: {}", survey.source_url));
    lines.push(format!("- 抓取时间: {}", survey.crawl_time.format(CRAWL_TIME_FORMAT)));
    lines.push(format!("- 题目总数: {}", survey.questions.len()));
    lines.push(format!("- 章节数: {}", survey.sections.len()));
    lines.push(String::new());

    for block in survey.blocks() {
        if let Some(section) = block.section {
            lines.push(format!("## 章节: {}", section.name));
            lines.push(format!("- 章节题数: {}", section.question_refs.len()));
            lines.push(String::new());
        }
        for q in block.questions {
            push_question(&mut lines, q);
        }
    }

    Ok(lines.join("\n").trim_end().to_string() + "\n")
}

/// Fixed block order: heading, type, required, prompt, options, logic.
fn push_question(lines: &mut Vec<String>, q: &Question) {
    lines.push(format!("### Q{}", q.index));
    lines.push(format!("- 题型: {}", q.kind.label()));
    lines.push(format!("- 必填: {}", if q.required { "是" } else { "否" }));
    lines.push(format!("{}{}", PROMPT_PREFIX, q.prompt));

    if q.options.is_empty() {
        lines.push("- 选项: 无".to_string());
    } else {
        lines.push("- 选项:".to_string());
        for (i, opt) in q.options.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, opt));
        }
    }
    if !q.rows.is_empty() {
        lines.push(format!("- 矩阵行: {}", q.rows.join(OPTION_SEPARATOR)));
    }

    if q.logic.is_empty() {
        lines.push("- 逻辑: 无".to_string());
    } else {
        lines.push(format!("- 逻辑: {}", q.logic));
    }
    lines.push(String::new());
}
