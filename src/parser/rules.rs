use std::sync::LazyLock;

use scraper::{ElementRef, Selector};

use crate::model::QuestionKind;

/// One independent capability check over a question container.
pub trait KindRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn detect(&self, node: ElementRef<'_>) -> Option<QuestionKind>;
}

/// Maps the template's own `type` code attribute.
struct TypeCodeRule;

impl KindRule for TypeCodeRule {
    fn name(&self) -> &'static str {
        "type-code"
    }

    fn detect(&self, node: ElementRef<'_>) -> Option<QuestionKind> {
        let code = node.value().attr("type")?.trim();
        match code {
            "1" | "2" => Some(QuestionKind::FreeText),
            "3" | "7" => Some(QuestionKind::SingleChoice),
            "4" => Some(QuestionKind::MultipleChoice),
            "5" | "8" => Some(QuestionKind::Rating),
            "6" | "9" => Some(QuestionKind::Matrix),
            "11" => Some(QuestionKind::Ordering),
            _ => None,
        }
    }
}

/// Matches when any descendant satisfies a CSS selector.
struct SelectorRule {
    name: &'static str,
    selector: Selector,
    kind: QuestionKind,
}

impl SelectorRule {
    fn boxed(name: &'static str, css: &str, kind: QuestionKind) -> Box<dyn KindRule> {
        Box::new(Self {
            name,
            selector: Selector::parse(css).unwrap(),
            kind,
        })
    }
}

impl KindRule for SelectorRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&self, node: ElementRef<'_>) -> Option<QuestionKind> {
        node.select(&self.selector).next().map(|_| self.kind)
    }
}

/// Rules in priority order. Composite layouts (grids, sortable lists, scales)
/// embed plain radio/checkbox inputs, so they are checked before the plain controls.
static RULES: LazyLock<Vec<Box<dyn KindRule>>> = LazyLock::new(|| {
    vec![
        Box::new(TypeCodeRule),
        SelectorRule::boxed(
            "grid",
            "table.matrix-rating, table.matrixtable, .matrix-rating",
            QuestionKind::Matrix,
        ),
        SelectorRule::boxed(
            "drag-handle",
            ".ui-sortable, .sort-list, .drag-handle, [draggable='true']",
            QuestionKind::Ordering,
        ),
        SelectorRule::boxed(
            "scale",
            ".scale-rating, .scale-div, .star-rating, .rate-off, input[type='range'], .ui-slider",
            QuestionKind::Rating,
        ),
        SelectorRule::boxed(
            "single-select",
            "input[type='radio'], .ui-radio, select",
            QuestionKind::SingleChoice,
        ),
        SelectorRule::boxed(
            "multi-select",
            "input[type='checkbox'], .ui-checkbox",
            QuestionKind::MultipleChoice,
        ),
        SelectorRule::boxed(
            "free-text",
            "textarea, input[type='text'], input[type='tel'], input[type='email'], input[type='number'], input:not([type])",
            QuestionKind::FreeText,
        ),
    ]
});

/// First matching rule wins; `None` when the container matches no known pattern.
pub fn detect_kind(node: ElementRef<'_>) -> Option<(QuestionKind, &'static str)> {
    RULES
        .iter()
        .find_map(|rule| rule.detect(node).map(|kind| (kind, rule.name())))
}
