use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::{element_text, normalize_text};
use crate::error::ParseError;

const FALLBACK_TITLE: &str = "问卷导出";

static PASSWORD_INPUT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<input[^>]+type=['"]password['"]"#).unwrap());
static ANY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[A-Za-z!/]").unwrap());

static TITLE_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static OG_DESC_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property='og:description']").unwrap());
static DESC_SELS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["#divDesc", "#desc", ".desc_begin", ".description", ".survey-desc"]
        .iter()
        .map(|s| Selector::parse(s).unwrap())
        .collect()
});

/// Phrases that identify captcha, password, login and throttle pages.
const RESTRICTED_KEYWORDS: &[(&str, &str)] = &[
    ("验证码", "captcha page; captcha handling is not supported"),
    ("滑块验证", "slider verification page; risk-control checks are not supported"),
    ("请输入访问密码", "password-protected survey"),
    ("请先登录", "survey requires login"),
    ("访问过于频繁", "rate limited by the survey site; retry later"),
];

/// A known page template: where the title, question containers and section
/// markers live.
pub struct PageTemplate {
    pub name: &'static str,
    root: Selector,
    title: Selector,
    items: Selector,
    container_class: &'static str,
    marker_class: &'static str,
}

impl PageTemplate {
    fn new(
        name: &'static str,
        root: &str,
        title: &str,
        container_class: &'static str,
        marker_class: &'static str,
        items: &str,
    ) -> Self {
        Self {
            name,
            root: Selector::parse(root).unwrap(),
            title: Selector::parse(title).unwrap(),
            items: Selector::parse(items).unwrap(),
            container_class,
            marker_class,
        }
    }
}

/// Templates in the order they are tried.
static TEMPLATES: LazyLock<Vec<PageTemplate>> = LazyLock::new(|| {
    vec![
        // Mobile/modern layout: div.field.ui-field-contain per question, div.cutfield per page break.
        PageTemplate::new(
            "modern",
            "#divQuestion",
            "#htitle",
            "ui-field-contain",
            "cutfield",
            "div.field.ui-field-contain, div.cutfield",
        ),
        // Older desktop layout: div.div_question per question, div.div_cut per section.
        PageTemplate::new(
            "legacy",
            "#divQuestion, #ctl00_ContentPlaceHolder1_JQ1_question, .surveycontent",
            "#divTitle h1, .surveytitle, #htitle",
            "div_question",
            "div_cut",
            "div.div_question, div.div_cut",
        ),
    ]
});

/// One located region inside the question area, in document order.
pub enum Region<'a> {
    Question(ElementRef<'a>),
    /// Section boundary; `None` when the marker carries no label.
    SectionMarker(Option<String>),
}

/// Result of structural parsing: header text plus the ordered regions.
pub struct PageLayout<'a> {
    pub template: &'static str,
    pub title: String,
    pub description: String,
    pub regions: Vec<Region<'a>>,
}

impl PageLayout<'_> {
    pub fn question_count(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| matches!(r, Region::Question(_)))
            .count()
    }
}

/// Reject markup that cannot be traversed at all.
pub fn check_markup(markup: &str) -> Result<(), ParseError> {
    if markup.trim().is_empty() || !ANY_TAG_RE.is_match(markup) {
        return Err(ParseError::MalformedMarkup);
    }
    Ok(())
}

/// Detect pages that block anonymous access.
pub fn check_restricted(markup: &str) -> Option<&'static str> {
    for (keyword, reason) in RESTRICTED_KEYWORDS {
        if markup.contains(keyword) {
            return Some(reason);
        }
    }
    if PASSWORD_INPUT_RE.is_match(markup) {
        return Some("password input found; password-protected surveys are not supported");
    }
    None
}

/// Locate title, description and question regions using the first template that matches.
pub fn locate<'a>(document: &'a Html) -> Result<PageLayout<'a>, ParseError> {
    let mut saw_root = false;
    for template in TEMPLATES.iter() {
        let Some(root) = document.select(&template.root).next() else {
            continue;
        };
        saw_root = true;

        let regions = collect_regions(root, template);
        if !regions.iter().any(|r| matches!(r, Region::Question(_))) {
            continue;
        }

        return Ok(PageLayout {
            template: template.name,
            title: extract_title(document, template),
            description: extract_description(document),
            regions,
        });
    }

    let detail = if saw_root {
        "question area found but it contains no question containers"
    } else {
        "no known survey template matched the page"
    };
    Err(ParseError::UnrecognizedPageStructure(detail.to_string()))
}

fn collect_regions<'a>(root: ElementRef<'a>, template: &PageTemplate) -> Vec<Region<'a>> {
    root.select(&template.items)
        .filter_map(|el| {
            let classes: Vec<&str> = el.value().classes().collect();
            if classes.contains(&template.marker_class) {
                Some(Region::SectionMarker(marker_label(el)))
            } else if classes.contains(&template.container_class) {
                Some(Region::Question(el))
            } else {
                None
            }
        })
        .collect()
}

/// Prefer the first child div's text, then the marker's own text.
fn marker_label(el: ElementRef<'_>) -> Option<String> {
    let first_div = el
        .children()
        .filter_map(ElementRef::wrap)
        .find(|c| c.value().name() == "div")
        .map(element_text)
        .filter(|t| !t.is_empty());
    first_div
        .or_else(|| Some(element_text(el)))
        .filter(|t| !t.is_empty())
}

fn extract_title(document: &Html, template: &PageTemplate) -> String {
    document
        .select(&template.title)
        .map(element_text)
        .find(|t| !t.is_empty())
        .or_else(|| {
            document
                .select(&TITLE_SEL)
                .map(element_text)
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| FALLBACK_TITLE.to_string())
}

fn extract_description(document: &Html) -> String {
    for sel in DESC_SELS.iter() {
        if let Some(text) = document
            .select(sel)
            .map(element_text)
            .find(|t| !t.is_empty())
        {
            return text;
        }
    }
    document
        .select(&OG_DESC_SEL)
        .filter_map(|m| m.value().attr("content"))
        .map(normalize_text)
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_markup_is_malformed() {
        assert!(matches!(check_markup(""), Err(ParseError::MalformedMarkup)));
        assert!(matches!(check_markup("   \n "), Err(ParseError::MalformedMarkup)));
        assert!(matches!(check_markup("just some words"), Err(ParseError::MalformedMarkup)));
        assert!(check_markup("<html><body></body></html>").is_ok());
    }

    #[test]
    fn restricted_pages_detected() {
        assert!(check_restricted("<div>请输入访问密码</div>").is_some());
        assert!(check_restricted(r#"<form><input type="password" name="pw"></form>"#).is_some());
        assert!(check_restricted("<div>普通问卷</div>").is_none());
    }

    #[test]
    fn locates_modern_layout() {
        let html = Html::parse_document(
            r#"<html><head><title>T</title></head><body>
            <div id="htitle">满意度调查</div>
            <div id="divDesc">感谢参与</div>
            <div id="divQuestion">
              <div class="field ui-field-contain" topic="1" type="1"><div class="topichtml">A</div></div>
              <div class="cutfield"><div>第二部分</div></div>
              <div class="field ui-field-contain" topic="2" type="1"><div class="topichtml">B</div></div>
            </div></body></html>"#,
        );
        let layout = locate(&html).unwrap();
        assert_eq!(layout.template, "modern");
        assert_eq!(layout.title, "满意度调查");
        assert_eq!(layout.description, "感谢参与");
        assert_eq!(layout.regions.len(), 3);
        assert_eq!(layout.question_count(), 2);
        assert!(matches!(&layout.regions[1], Region::SectionMarker(Some(n)) if n == "第二部分"));
    }

    #[test]
    fn locates_legacy_layout() {
        let html = Html::parse_document(
            r#"<html><body><div class="surveycontent">
              <div id="divTitle"><h1>旧版问卷</h1></div>
              <div class="div_question" id="div1"><div class="div_title_question">Q</div></div>
            </div></body></html>"#,
        );
        let layout = locate(&html).unwrap();
        assert_eq!(layout.template, "legacy");
        assert_eq!(layout.title, "旧版问卷");
        assert_eq!(layout.question_count(), 1);
    }

    #[test]
    fn title_falls_back_to_document_title() {
        let html = Html::parse_document(
            r#"<html><head><title>页面标题</title>
            <meta property="og:description" content=" 元描述 "></head><body>
            <div id="divQuestion"><div class="field ui-field-contain"></div></div></body></html>"#,
        );
        let layout = locate(&html).unwrap();
        assert_eq!(layout.title, "页面标题");
        assert_eq!(layout.description, "元描述");
    }

    #[test]
    fn empty_question_area_is_unrecognized() {
        let html = Html::parse_document(r#"<html><body><div id="divQuestion"></div></body></html>"#);
        assert!(matches!(locate(&html), Err(ParseError::UnrecognizedPageStructure(_))));

        let html = Html::parse_document("<html><body><p>hello</p></body></html>");
        assert!(matches!(locate(&html), Err(ParseError::UnrecognizedPageStructure(_))));
    }
}
