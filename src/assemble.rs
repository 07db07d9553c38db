use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::{Question, Section, Survey};
use crate::parser::logic::{self, Referent};
use crate::parser::question::ExtractedQuestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningReason {
    MissingPrompt,
    UnrecognizedKind,
    MissingOptions,
}

impl fmt::Display for WarningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningReason::MissingPrompt => "no prompt text",
            WarningReason::UnrecognizedKind => "unrecognized question type",
            WarningReason::MissingOptions => "no options found",
        };
        f.write_str(s)
    }
}

/// Non-fatal problem with one question, keyed by its 1-based ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionWarning {
    pub index: usize,
    pub reason: WarningReason,
}

/// Count plus affected ordinals, reported next to successful output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningSummary {
    pub count: usize,
    pub ordinals: Vec<usize>,
}

impl fmt::Display for WarningSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            return f.write_str("no extraction warnings");
        }
        let list: Vec<String> = self.ordinals.iter().map(|i| format!("Q{}", i)).collect();
        write!(f, "{} extraction warning(s): {}", self.count, list.join(", "))
    }
}

/// State scoped to one survey run: warning list and the crawl clock.
#[derive(Debug, Default)]
pub struct RunContext {
    crawl_time: Option<DateTime<Utc>>,
    warnings: Vec<ExtractionWarning>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the timestamp stamped at assembly instead of reading the clock.
    #[cfg(test)]
    pub fn with_crawl_time(time: DateTime<Utc>) -> Self {
        Self {
            crawl_time: Some(time),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, index: usize, reason: WarningReason) {
        if !self.warnings.iter().any(|w| w.index == index) {
            self.warnings.push(ExtractionWarning { index, reason });
        }
    }

    pub fn warnings(&self) -> &[ExtractionWarning] {
        &self.warnings
    }

    pub fn summary(&self) -> WarningSummary {
        WarningSummary {
            count: self.warnings.len(),
            ordinals: self.warnings.iter().map(|w| w.index).collect(),
        }
    }
}

/// Extractor output in document order, interleaved with section markers.
pub enum Item {
    Question(ExtractedQuestion),
    Marker(Option<String>),
}

struct OpenSection {
    name: String,
    refs: Vec<usize>,
}

/// Assign indices, resolve logic references, group sections and stamp the crawl time.
pub fn assemble(
    title: &str,
    description: &str,
    source_url: &str,
    items: Vec<Item>,
    ctx: &RunContext,
) -> Survey {
    let mut extracted: Vec<ExtractedQuestion> = Vec::new();
    let mut sections: Vec<Section> = Vec::new();
    let mut open: Option<OpenSection> = None;
    let mut markers_seen = 0usize;

    for item in items {
        match item {
            Item::Marker(label) => {
                markers_seen += 1;
                close_section(&mut open, &mut sections);
                let name = label.unwrap_or_else(|| format!("Section {}", markers_seen));
                open = Some(OpenSection { name, refs: Vec::new() });
            }
            Item::Question(q) => {
                extracted.push(q);
                if let Some(s) = open.as_mut() {
                    s.refs.push(extracted.len());
                }
            }
        }
    }
    close_section(&mut open, &mut sections);

    let by_topic: HashMap<u32, usize> = extracted
        .iter()
        .enumerate()
        .filter_map(|(pos, q)| q.topic_id.map(|t| (t, pos)))
        .collect();

    let questions: Vec<Question> = extracted
        .iter()
        .enumerate()
        .map(|(pos, q)| {
            let logic = logic::render(&q.logic, |topic| {
                let target = by_topic.get(&topic).copied().or_else(|| {
                    let pos = (topic as usize).checked_sub(1)?;
                    (pos < extracted.len() && extracted[pos].topic_id.is_none()).then_some(pos)
                })?;
                Some(Referent {
                    index: target + 1,
                    options: &extracted[target].options,
                })
            });
            Question {
                index: pos + 1,
                topic_id: q.topic_id,
                kind: q.kind,
                required: q.required,
                prompt: q.prompt.clone(),
                options: q.options.clone(),
                rows: q.rows.clone(),
                logic,
            }
        })
        .collect();

    Survey {
        title: title.to_string(),
        description: description.to_string(),
        source_url: source_url.to_string(),
        crawl_time: ctx.crawl_time.unwrap_or_else(Utc::now),
        sections,
        questions,
    }
}

/// Sections without questions are dropped.
fn close_section(open: &mut Option<OpenSection>, sections: &mut Vec<Section>) {
    if let Some(s) = open.take() {
        if !s.refs.is_empty() {
            sections.push(Section {
                name: s.name,
                question_refs: s.refs,
            });
        }
    }
}
