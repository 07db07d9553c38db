pub mod logic;
pub mod page;
pub mod question;
pub mod rules;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::{debug, info};

use crate::assemble::{self, RunContext};
use crate::error::ParseError;
use crate::model::Survey;
use page::Region;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Dropdown entries that prompt for a choice rather than being one.
pub(crate) const SELECT_PLACEHOLDERS: &[&str] = &["请选择", "--请选择--", "Please select"];

/// Collapse runs of whitespace (including full-width newlines from markup) into one space.
pub fn normalize_text(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

/// Visible text of an element, text nodes joined by single spaces.
pub fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// Three-stage pipeline for one page: markup → located regions → questions → Survey.
pub fn parse_survey(markup: &str, source_url: &str, ctx: &mut RunContext) -> Result<Survey, ParseError> {
    page::check_markup(markup)?;
    if let Some(reason) = page::check_restricted(markup) {
        return Err(ParseError::AccessRestricted(reason.to_string()));
    }

    let document = Html::parse_document(markup);
    let layout = page::locate(&document)?;
    debug!(
        "Template {} matched: {} regions, {} question containers",
        layout.template,
        layout.regions.len(),
        layout.question_count()
    );

    let signals = logic::script_signals(markup);
    let mut items = Vec::with_capacity(layout.regions.len());
    let mut ordinal = 0;
    for region in &layout.regions {
        match region {
            Region::Question(node) => {
                ordinal += 1;
                let extracted = question::extract(*node, ordinal, &signals, ctx);
                items.push(assemble::Item::Question(extracted));
            }
            Region::SectionMarker(label) => items.push(assemble::Item::Marker(label.clone())),
        }
    }

    let survey = assemble::assemble(&layout.title, &layout.description, source_url, items, ctx);
    info!(
        "Parsed \"{}\": {} questions, {} sections, {} warnings",
        survey.title,
        survey.questions.len(),
        survey.sections.len(),
        ctx.warnings().len()
    );
    Ok(survey)
}
