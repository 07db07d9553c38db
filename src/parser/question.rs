use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use tracing::warn;

use super::logic::{self, LogicHint, ScriptSignal};
use super::{element_text, normalize_text, rules, SELECT_PLACEHOLDERS};
use crate::assemble::{RunContext, WarningReason};
use crate::model::QuestionKind;

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s*[.、．:：]\s*").unwrap());

static STEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".topichtml, .div_title_question").unwrap());
static LABEL_AREA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".field-label, .div_title_question_all, legend").unwrap());
static REQUIRED_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        ".field-label .req, .div_title_question .req, .req-mark, \
         input[required], textarea[required], select[required], [aria-required='true']",
    )
    .unwrap()
});

static RADIO_LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".ui-radio .label").unwrap());
static CHECKBOX_LABEL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".ui-checkbox .label").unwrap());
static LEGACY_LABEL_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("ul.ulradiocheck li label").unwrap());
static SELECT_OPTION_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("select option").unwrap());
static GENERIC_LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".label").unwrap());
static PLAIN_LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("label").unwrap());
static SCALE_ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".scale-rating a[val], .scale-div a[val]").unwrap());
static STAR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".star-rating li[title]").unwrap());
static SCALE_LEFT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".scaleTitle_frist").unwrap());
static SCALE_RIGHT_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".scaleTitle_last").unwrap());
static MATRIX_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.matrix-rating, table.matrixtable").unwrap());
static ROW_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static CELL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th, td").unwrap());
static SORT_ITEM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".ui-sortable li, .sort-list li").unwrap());

/// Placeholder entries of dropdowns that are not real answers.
/// Everything read from one container; `index` and resolved logic are assigned at assembly.
#[derive(Debug, Clone)]
pub struct ExtractedQuestion {
    pub topic_id: Option<u32>,
    pub kind: QuestionKind,
    pub required: bool,
    pub prompt: String,
    pub options: Vec<String>,
    pub rows: Vec<String>,
    pub logic: Vec<LogicHint>,
}

/// Build a question record from one container. Never fails: unreadable
/// containers degrade to `QuestionKind::Other` and record a warning in `ctx`.
pub fn extract(
    node: ElementRef<'_>,
    ordinal: usize,
    signals: &[ScriptSignal],
    ctx: &mut RunContext,
) -> ExtractedQuestion {
    let topic_id = topic_id(node);
    let detected = rules::detect_kind(node);
    let prompt = extract_prompt(node);

    let Some(prompt) = prompt else {
        warn!("Q{}: no prompt text found, keeping as placeholder", ordinal);
        ctx.warn(ordinal, WarningReason::MissingPrompt);
        return ExtractedQuestion {
            topic_id,
            kind: QuestionKind::Other,
            required: false,
            prompt: String::new(),
            options: Vec::new(),
            rows: Vec::new(),
            logic: Vec::new(),
        };
    };

    let kind = detected.map(|(k, _)| k).unwrap_or(QuestionKind::Other);
    let (options, rows) = extract_options(node, kind);
    let logic = logic::extract(node, topic_id, &options, signals);

    match detected {
        None => {
            warn!("Q{}: no type rule matched, recorded as other", ordinal);
            ctx.warn(ordinal, WarningReason::UnrecognizedKind);
        }
        Some((kind, rule)) if kind.expects_options() && options.is_empty() => {
            warn!("Q{}: detected as {:?} by {} rule but no options found", ordinal, kind, rule);
            ctx.warn(ordinal, WarningReason::MissingOptions);
        }
        Some(_) => {}
    }

    ExtractedQuestion {
        topic_id,
        kind,
        required: is_required(node),
        prompt,
        options,
        rows,
        logic,
    }
}

fn topic_id(node: ElementRef<'_>) -> Option<u32> {
    let el = node.value();
    let raw = el
        .attr("topic")
        .or_else(|| el.attr("id").filter(|id| id.starts_with("div")))?;
    DIGITS_RE.captures(raw)?[1].parse().ok()
}

fn extract_prompt(node: ElementRef<'_>) -> Option<String> {
    if let Some(stem) = node
        .select(&STEM_SEL)
        .map(element_text)
        .map(|t| strip_required_glyph(&t))
        .find(|t| !t.is_empty())
    {
        return Some(stem);
    }
    node.select(&LABEL_AREA_SEL)
        .map(element_text)
        .map(|t| strip_required_glyph(&LEADING_NUMBER_RE.replace(&t, "")))
        .find(|t| !t.is_empty())
}

fn strip_required_glyph(text: &str) -> String {
    text.trim().trim_end_matches(['*', '＊']).trim().to_string()
}

fn is_required(node: ElementRef<'_>) -> bool {
    let el = node.value();
    let attr_flag = matches!(el.attr("req").map(str::trim), Some("1" | "true"));
    let label_star = node
        .select(&LABEL_AREA_SEL)
        .map(element_text)
        .any(|t| t.ends_with('*') || t.ends_with('＊'));
    attr_flag || label_star || node.select(&REQUIRED_SEL).next().is_some()
}

fn texts(node: ElementRef<'_>, sel: &Selector) -> Vec<String> {
    node.select(sel)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// First selector that yields any text wins.
fn first_non_empty(node: ElementRef<'_>, sels: &[&Selector]) -> Vec<String> {
    sels.iter()
        .map(|sel| texts(node, sel))
        .find(|found| !found.is_empty())
        .unwrap_or_default()
}

/// Option labels in document order (duplicates preserved), plus matrix row labels.
fn extract_options(node: ElementRef<'_>, kind: QuestionKind) -> (Vec<String>, Vec<String>) {
    match kind {
        QuestionKind::FreeText => (Vec::new(), Vec::new()),
        QuestionKind::SingleChoice => {
            let found = first_non_empty(node, &[&*RADIO_LABEL_SEL, &*LEGACY_LABEL_SEL]);
            if !found.is_empty() {
                return (found, Vec::new());
            }
            let dropdown: Vec<String> = texts(node, &SELECT_OPTION_SEL)
                .into_iter()
                .filter(|t| !SELECT_PLACEHOLDERS.contains(&t.as_str()))
                .collect();
            if !dropdown.is_empty() {
                return (dropdown, Vec::new());
            }
            (first_non_empty(node, &[&*GENERIC_LABEL_SEL, &*PLAIN_LABEL_SEL]), Vec::new())
        }
        QuestionKind::MultipleChoice => (
            first_non_empty(
                node,
                &[&*CHECKBOX_LABEL_SEL, &*LEGACY_LABEL_SEL, &*GENERIC_LABEL_SEL, &*PLAIN_LABEL_SEL],
            ),
            Vec::new(),
        ),
        QuestionKind::Rating => (scale_options(node), Vec::new()),
        QuestionKind::Matrix => matrix_options(node),
        QuestionKind::Ordering => (
            first_non_empty(node, &[&*SORT_ITEM_SEL, &*GENERIC_LABEL_SEL]),
            Vec::new(),
        ),
        QuestionKind::Other => (
            first_non_empty(node, &[&*GENERIC_LABEL_SEL, &*PLAIN_LABEL_SEL]),
            Vec::new(),
        ),
    }
}

fn scale_options(node: ElementRef<'_>) -> Vec<String> {
    let anchors: Vec<String> = node
        .select(&SCALE_ANCHOR_SEL)
        .filter_map(|a| {
            let el = a.value();
            let val = el.attr("val").map(normalize_text).filter(|v| !v.is_empty())?;
            let title = el
                .attr("title")
                .or_else(|| el.attr("htitle"))
                .map(normalize_text)
                .unwrap_or_default();
            Some(if title.is_empty() { val } else { format!("{}({})", val, title) })
        })
        .collect();
    if !anchors.is_empty() {
        return anchors;
    }

    let stars: Vec<String> = node
        .select(&STAR_SEL)
        .filter_map(|li| li.value().attr("title").map(normalize_text))
        .filter(|t| !t.is_empty())
        .collect();
    if !stars.is_empty() {
        return stars;
    }

    [&*SCALE_LEFT_SEL, &*SCALE_RIGHT_SEL]
        .iter()
        .filter_map(|sel| node.select(sel).next().map(element_text))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Column headers become options, first-cell labels of later rows become rows.
fn matrix_options(node: ElementRef<'_>) -> (Vec<String>, Vec<String>) {
    let Some(table) = node.select(&MATRIX_SEL).next() else {
        return (Vec::new(), Vec::new());
    };
    let mut rows = table.select(&ROW_SEL);
    let Some(header) = rows.next() else {
        return (Vec::new(), Vec::new());
    };

    let mut columns: Vec<String> = header.select(&CELL_SEL).map(element_text).collect();
    if columns.first().is_some_and(|c| c.is_empty()) {
        columns.remove(0);
    }
    columns.retain(|c| !c.is_empty());

    let row_labels: Vec<String> = rows
        .filter_map(|row| row.select(&CELL_SEL).next().map(element_text))
        .filter(|t| !t.is_empty())
        .collect();

    (columns, row_labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn run(fragment: &str) -> (ExtractedQuestion, RunContext) {
        let html = Html::parse_fragment(fragment);
        let sel = Selector::parse("div.field").unwrap();
        let node = html.select(&sel).next().unwrap();
        let mut ctx = RunContext::new();
        let q = extract(node, 1, &[], &mut ctx);
        (q, ctx)
    }

    #[test]
    fn single_choice_with_star() {
        let (q, ctx) = run(
            r#"<div class="field ui-field-contain" topic="1" type="3">
                 <div class="field-label"><span class="topicnumber">1.</span>
                   <div class="topichtml">性别</div><span class="req">*</span></div>
                 <div class="ui-radio"><input type="radio"><div class="label">男</div></div>
                 <div class="ui-radio"><input type="radio"><div class="label">女</div></div>
               </div>"#,
        );
        assert_eq!(q.topic_id, Some(1));
        assert_eq!(q.kind, QuestionKind::SingleChoice);
        assert!(q.required);
        assert_eq!(q.prompt, "性别");
        assert_eq!(q.options, vec!["男", "女"]);
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn missing_marker_means_optional() {
        let (q, _) = run(
            r#"<div class="field" type="1"><div class="topichtml">备注</div><textarea></textarea></div>"#,
        );
        assert!(!q.required);
        assert_eq!(q.kind, QuestionKind::FreeText);
        assert!(q.options.is_empty());
    }

    #[test]
    fn req_attribute_marks_required() {
        let (q, _) = run(r#"<div class="field" req="1" type="1"><div class="topichtml">电话</div></div>"#);
        assert!(q.required);
    }

    #[test]
    fn repeated_options_preserved() {
        let (q, _) = run(
            r#"<div class="field" type="4"><div class="topichtml">选择</div>
                 <div class="ui-checkbox"><div class="label">同意</div></div>
                 <div class="ui-checkbox"><div class="label">同意</div></div>
               </div>"#,
        );
        assert_eq!(q.options, vec!["同意", "同意"]);
    }

    #[test]
    fn fallback_prompt_strips_number_and_star() {
        let (q, _) = run(
            r#"<div class="field"><div class="field-label">3. 您的年龄 *</div><input type="text"></div>"#,
        );
        assert_eq!(q.prompt, "您的年龄");
        assert!(q.required);
        assert_eq!(q.kind, QuestionKind::FreeText);
    }

    #[test]
    fn no_prompt_degrades_to_other() {
        let (q, ctx) = run(r#"<div class="field" type="3"><div class="ui-radio"><div class="label">A</div></div></div>"#);
        assert_eq!(q.kind, QuestionKind::Other);
        assert!(q.prompt.is_empty());
        assert!(q.options.is_empty());
        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(ctx.warnings()[0].reason, WarningReason::MissingPrompt);
    }

    #[test]
    fn unknown_control_keeps_recoverable_text() {
        let (q, ctx) = run(
            r#"<div class="field" type="99"><div class="topichtml">上传</div>
                 <input type="file"><span class="label">支持 PDF</span></div>"#,
        );
        assert_eq!(q.kind, QuestionKind::Other);
        assert_eq!(q.prompt, "上传");
        assert_eq!(q.options, vec!["支持 PDF"]);
        assert_eq!(ctx.warnings()[0].reason, WarningReason::UnrecognizedKind);
    }

    #[test]
    fn choice_without_options_warns() {
        let (q, ctx) = run(r#"<div class="field" type="3"><div class="topichtml">空</div></div>"#);
        assert_eq!(q.kind, QuestionKind::SingleChoice);
        assert_eq!(ctx.warnings()[0].reason, WarningReason::MissingOptions);
    }

    #[test]
    fn dropdown_skips_placeholder() {
        let (q, _) = run(
            r#"<div class="field" type="7"><div class="topichtml">省份</div>
                 <select><option>请选择</option><option>北京</option><option>上海</option></select></div>"#,
        );
        assert_eq!(q.options, vec!["北京", "上海"]);
    }

    #[test]
    fn scale_endpoints_when_no_anchors() {
        let (q, _) = run(
            r#"<div class="field" type="5"><div class="topichtml">推荐度</div>
                 <span class="scaleTitle_frist">不可能</span><span class="scaleTitle_last">极有可能</span></div>"#,
        );
        assert_eq!(q.kind, QuestionKind::Rating);
        assert_eq!(q.options, vec!["不可能", "极有可能"]);
    }

    #[test]
    fn ordering_items() {
        let (q, _) = run(
            r#"<div class="field"><div class="topichtml">排序</div>
                 <ul class="ui-sortable"><li>甲</li><li>乙</li></ul></div>"#,
        );
        assert_eq!(q.kind, QuestionKind::Ordering);
        assert_eq!(q.options, vec!["甲", "乙"]);
    }

    #[test]
    fn legacy_id_gives_topic() {
        let (q, _) = run(r#"<div class="field" id="div12"><div class="div_title_question">X</div><textarea></textarea></div>"#);
        assert_eq!(q.topic_id, Some(12));
    }
}
