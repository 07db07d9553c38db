use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Selector};

use super::{element_text, normalize_text, SELECT_PLACEHOLDERS};

static SCRIPT_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)var\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([^;]{1,800});").unwrap()
});
static LOGIC_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(rel|jump|logic|skip|display|cond)").unwrap());
static CONDITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[qQ]?(\d+)\s*[,，:=]\s*([\d\s;；,，]+)$").unwrap());
static TOPIC_REF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)q(\d+)").unwrap());
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());
static CHOICE_INPUT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[type='radio'], input[type='checkbox'], option").unwrap());
static NEARBY_LABEL_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".label, label").unwrap());

/// Attributes that state a display condition on the question itself.
const CONDITION_ATTRS: &[&str] = &["relation", "data-relation", "rely", "cond", "condition", "showcond"];
/// Attributes carrying other flow rules, kept as descriptive notes.
const NOTE_ATTRS: &[&str] = &["jumpto", "skipto", "hidecond", "display"];

/// Classes of question containers and section markers inside the question area.
const REGION_CLASSES: &[&str] = &["ui-field-contain", "div_question", "cutfield", "div_cut"];

const MAX_NOTES: usize = 8;
const MAX_SCRIPT_HINTS: usize = 3;

/// A page-script variable that looks like flow-control data.
#[derive(Debug, Clone)]
pub struct ScriptSignal {
    pub name: String,
    pub value: String,
}

/// Logic found on one container, before question references are resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum LogicHint {
    /// Shown only when question `topic` has one of `options` (1-based) selected.
    Condition { topic: u32, options: Vec<u32> },
    /// Choosing `option` moves to question `target`.
    Jump { option: String, target: u32 },
    Note(String),
    ScriptHint(String),
}

/// Resolved view of another question used when rendering hints.
pub struct Referent<'a> {
    pub index: usize,
    pub options: &'a [String],
}

pub fn script_signals(markup: &str) -> Vec<ScriptSignal> {
    SCRIPT_VAR_RE
        .captures_iter(markup)
        .filter(|caps| LOGIC_NAME_RE.is_match(&caps[1]) || LOGIC_NAME_RE.is_match(&caps[2]))
        .map(|caps| ScriptSignal {
            name: caps[1].to_string(),
            value: truncate(&caps[2], 140),
        })
        .collect()
}

/// Collect logic hints from a container's attributes, its option inputs and page scripts.
pub fn extract(
    node: ElementRef<'_>,
    topic_id: Option<u32>,
    option_labels: &[String],
    signals: &[ScriptSignal],
) -> Vec<LogicHint> {
    let el = node.value();
    let mut hints: Vec<LogicHint> = Vec::new();

    attribute_hints(el, &mut hints);
    for sibling in sibling_annotations(node) {
        attribute_hints(sibling.value(), &mut hints);
    }

    let has_condition = hints.iter().any(|h| matches!(h, LogicHint::Condition { .. }));
    let hidden = el
        .attr("style")
        .map(|s| s.to_lowercase().replace(' ', "").contains("display:none"))
        .unwrap_or(false);
    if hidden && !has_condition {
        hints.push(LogicHint::Note("initially hidden".to_string()));
    }

    for input in node.select(&CHOICE_INPUT_SEL) {
        let attrs = input.value();
        let Some(label) = input_label(node, input, option_labels) else {
            continue;
        };

        if let Some(jump) = attrs.attr("jumpto").map(normalize_text).filter(|v| !v.is_empty()) {
            match NUMBER_RE.captures(&jump).and_then(|c| c[1].parse().ok()) {
                Some(target) => hints.push(LogicHint::Jump { option: label.clone(), target }),
                None => hints.push(LogicHint::Note(format!("option {} jumps to {}", label, jump))),
            }
        }
        if let Some(rel) = attrs.attr("rel").map(normalize_text).filter(|v| !v.is_empty()) {
            let guess = TOPIC_REF_RE
                .captures(&rel)
                .map(|c| format!(" (likely topic {})", &c[1]))
                .unwrap_or_default();
            hints.push(LogicHint::Note(format!("option {} triggers {}{}", label, rel, guess)));
        }
    }

    dedup_keep_order(&mut hints);
    hints.truncate(MAX_NOTES);

    if hints.is_empty() {
        if let Some(topic) = topic_id {
            hints.extend(
                script_hints_for(topic, signals)
                    .into_iter()
                    .take(MAX_SCRIPT_HINTS)
                    .map(LogicHint::ScriptHint),
            );
        }
    }

    hints
}

fn attribute_hints(el: &Element, hints: &mut Vec<LogicHint>) {
    for attr in CONDITION_ATTRS {
        let Some(raw) = el.attr(attr).map(normalize_text).filter(|v| !v.is_empty()) else {
            continue;
        };
        let parsed = parse_conditions(&raw);
        if parsed.is_empty() {
            hints.push(LogicHint::Note(format!("{}={}", attr, raw)));
        } else {
            hints.extend(parsed);
        }
    }

    for attr in NOTE_ATTRS {
        if let Some(raw) = el.attr(attr).map(normalize_text).filter(|v| !v.is_empty()) {
            hints.push(LogicHint::Note(format!("{}={}", attr, raw)));
        }
    }
}

fn is_region(el: ElementRef<'_>) -> bool {
    el.value().classes().any(|c| REGION_CLASSES.contains(&c))
}

/// Annotation elements beside a container: those between the previous region and
/// this one, plus trailing ones when no region follows. Each belongs to one container.
fn sibling_annotations(node: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut found: Vec<ElementRef<'_>> = node
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .take_while(|el| !is_region(*el))
        .collect();
    found.reverse();

    let following: Vec<ElementRef<'_>> = node.next_siblings().filter_map(ElementRef::wrap).collect();
    if !following.iter().any(|el| is_region(*el)) {
        found.extend(following);
    }
    found
}

/// Label of one choice input, read from its own markup: the option text, a label
/// next to the input, or a 1-based `value` into the extracted labels.
/// Dropdown placeholders yield `None`.
fn input_label(node: ElementRef<'_>, input: ElementRef<'_>, option_labels: &[String]) -> Option<String> {
    let el = input.value();
    if el.name() == "option" {
        let text = element_text(input);
        if SELECT_PLACEHOLDERS.contains(&text.as_str()) {
            return None;
        }
        if !text.is_empty() {
            return Some(text);
        }
    } else if let Some(text) = input
        .parent()
        .and_then(ElementRef::wrap)
        .filter(|parent| parent.id() != node.id())
        .and_then(|parent| {
            parent
                .select(&NEARBY_LABEL_SEL)
                .map(element_text)
                .find(|t| !t.is_empty())
        })
    {
        return Some(text);
    }

    let value = el.attr("value").map(normalize_text).filter(|v| !v.is_empty());
    let by_index = value
        .as_deref()
        .and_then(|v| v.parse::<usize>().ok())
        .and_then(|n| option_labels.get(n.checked_sub(1)?))
        .cloned();
    Some(
        by_index
            .or(value)
            .unwrap_or_else(|| "unlabeled option".to_string()),
    )
}

/// Parse `topic,opt[;opt]` groups separated by `|`.
fn parse_conditions(raw: &str) -> Vec<LogicHint> {
    let mut out = Vec::new();
    for group in raw.split('|') {
        let Some(caps) = CONDITION_RE.captures(group) else {
            return Vec::new();
        };
        let Ok(topic) = caps[1].parse::<u32>() else {
            return Vec::new();
        };
        let options: Vec<u32> = NUMBER_RE
            .captures_iter(&caps[2])
            .filter_map(|c| c[1].parse().ok())
            .collect();
        if topic == 0 || options.is_empty() {
            return Vec::new();
        }
        out.push(LogicHint::Condition { topic, options });
    }
    out
}

fn script_hints_for(topic: u32, signals: &[ScriptSignal]) -> Vec<String> {
    let Ok(re) = Regex::new(&format!(r"(?i)\bq{0}\b|_{0}\b", topic)) else {
        return Vec::new();
    };
    let mut out: Vec<String> = signals
        .iter()
        .filter(|s| re.is_match(&s.value))
        .map(|s| format!("script {}={}", s.name, truncate(&s.value, 70)))
        .collect();
    out.dedup();
    out
}

/// Render hints as one line: display conditions joined by ` AND `, then other notes after `; `.
pub fn render<'a>(hints: &[LogicHint], resolve: impl Fn(u32) -> Option<Referent<'a>>) -> String {
    let mut conditions: Vec<String> = Vec::new();
    let mut notes: Vec<String> = Vec::new();

    for hint in hints {
        match hint {
            LogicHint::Condition { topic, options } => {
                let referent = resolve(*topic);
                let q = referent
                    .as_ref()
                    .map(|r| format!("Q{}", r.index))
                    .unwrap_or_else(|| format!("topic {}", topic));
                let labels: Vec<String> = options
                    .iter()
                    .map(|o| {
                        referent
                            .as_ref()
                            .and_then(|r| r.options.get((*o as usize).wrapping_sub(1)))
                            .cloned()
                            .unwrap_or_else(|| format!("option #{}", o))
                    })
                    .collect();
                conditions.push(format!("{} = {}", q, labels.join(" or ")));
            }
            LogicHint::Jump { option, target } => {
                let q = resolve(*target)
                    .map(|r| format!("Q{}", r.index))
                    .unwrap_or_else(|| format!("topic {}", target));
                notes.push(format!("choosing {} jumps to {}", option, q));
            }
            LogicHint::Note(text) => notes.push(text.clone()),
            LogicHint::ScriptHint(text) => notes.push(format!("unparsed {}", text)),
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if !conditions.is_empty() {
        parts.push(format!("displayed only if {}", conditions.join(" AND ")));
    }
    parts.extend(notes);
    parts.join("; ")
}

fn dedup_keep_order(hints: &mut Vec<LogicHint>) {
    let mut kept: Vec<LogicHint> = Vec::with_capacity(hints.len());
    for h in hints.drain(..) {
        if !kept.contains(&h) {
            kept.push(h);
        }
    }
    *hints = kept;
}

fn truncate(text: &str, max: usize) -> String {
    let text = normalize_text(text);
    if text.chars().count() <= max {
        text
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
