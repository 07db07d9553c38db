use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice,
    MultipleChoice,
    FreeText,
    Rating,
    Matrix,
    Ordering,
    Other,
}

impl QuestionKind {
    /// Label used by the tabular and narrative outputs.
    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::SingleChoice => "单选",
            QuestionKind::MultipleChoice => "多选",
            QuestionKind::FreeText => "填空",
            QuestionKind::Rating => "量表",
            QuestionKind::Matrix => "矩阵",
            QuestionKind::Ordering => "排序",
            QuestionKind::Other => "其他",
        }
    }

    pub fn expects_options(self) -> bool {
        matches!(
            self,
            QuestionKind::SingleChoice
                | QuestionKind::MultipleChoice
                | QuestionKind::Matrix
                | QuestionKind::Ordering
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub index: usize,
    /// Question number as printed in the page markup, when present.
    #[serde(default)]
    pub topic_id: Option<u32>,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub required: bool,
    pub prompt: String,
    pub options: Vec<String>,
    /// Row labels of a matrix question; empty for every other kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<String>,
    pub logic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub question_refs: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub crawl_time: DateTime<Utc>,
    pub sections: Vec<Section>,
    pub questions: Vec<Question>,
}

/// A run of consecutive questions sharing the same section (or none).
pub struct Block<'a> {
    pub section: Option<&'a Section>,
    pub questions: Vec<&'a Question>,
}

impl Survey {
    /// Check every model invariant, returning a description of the first violation.
    pub fn check_invariants(&self) -> Result<(), String> {
        match url::Url::parse(&self.source_url) {
            Ok(u) if u.has_host() => {}
            _ => return Err(format!("source_url is not an absolute URL: {:?}", self.source_url)),
        }

        for (pos, q) in self.questions.iter().enumerate() {
            if q.index != pos + 1 {
                return Err(format!(
                    "question at position {} has index {} (expected {})",
                    pos,
                    q.index,
                    pos + 1
                ));
            }
        }

        let mut seen: HashSet<usize> = HashSet::new();
        let mut last = 0usize;
        for section in &self.sections {
            if section.question_refs.is_empty() {
                return Err(format!("section {:?} has no questions", section.name));
            }
            for &idx in &section.question_refs {
                if idx == 0 || idx > self.questions.len() {
                    return Err(format!("section {:?} references unknown Q{}", section.name, idx));
                }
                if !seen.insert(idx) {
                    return Err(format!("Q{} appears in more than one section", idx));
                }
                if idx <= last {
                    return Err(format!("section {:?} is out of document order at Q{}", section.name, idx));
                }
                last = idx;
            }
        }

        Ok(())
    }

    pub fn section_of(&self, index: usize) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.question_refs.contains(&index))
    }

    /// Questions in canonical order, grouped into consecutive section runs.
    /// Unsectioned questions form blocks with `section: None`.
    pub fn blocks(&self) -> Vec<Block<'_>> {
        let mut blocks: Vec<Block<'_>> = Vec::new();
        for q in &self.questions {
            let section = self.section_of(q.index);
            match blocks.last_mut() {
                Some(b) if same_section(b.section, section) => b.questions.push(q),
                _ => blocks.push(Block {
                    section,
                    questions: vec![q],
                }),
            }
        }
        blocks
    }
}

fn same_section(a: Option<&Section>, b: Option<&Section>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => std::ptr::eq(x, y),
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn question(index: usize, kind: QuestionKind, prompt: &str, options: &[&str]) -> Question {
        Question {
            index,
            topic_id: Some(index as u32),
            kind,
            required: false,
            prompt: prompt.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
            logic: String::new(),
        }
    }

    pub(crate) fn sample_survey() -> Survey {
        let mut q3 = question(3, QuestionKind::MultipleChoice, "喜欢的颜色", &["红", "绿", "蓝"]);
        q3.logic = "displayed only if Q1 = 是".to_string();
        let mut q1 = question(1, QuestionKind::SingleChoice, "是否参加", &["是", "否"]);
        q1.required = true;
        Survey {
            title: "样例问卷".to_string(),
            description: "说明文字".to_string(),
            source_url: "https://v.wjx.cn/vm/abc.aspx".to_string(),
            crawl_time: DateTime::parse_from_rfc3339("2026-03-01T08:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            sections: vec![
                Section { name: "基本信息".to_string(), question_refs: vec![1, 2] },
                Section { name: "偏好".to_string(), question_refs: vec![3] },
            ],
            questions: vec![
                q1,
                question(2, QuestionKind::FreeText, "您的姓名", &[]),
                q3,
            ],
        }
    }

    #[test]
    fn sample_is_valid() {
        assert!(sample_survey().check_invariants().is_ok());
    }

    #[test]
    fn gap_in_indices_rejected() {
        let mut s = sample_survey();
        s.questions[1].index = 5;
        assert!(s.check_invariants().is_err());
    }

    #[test]
    fn overlapping_sections_rejected() {
        let mut s = sample_survey();
        s.sections[1].question_refs = vec![2, 3];
        let err = s.check_invariants().unwrap_err();
        assert!(err.contains("more than one section"));
    }

    #[test]
    fn empty_section_rejected() {
        let mut s = sample_survey();
        s.sections.push(Section { name: "空".to_string(), question_refs: vec![] });
        assert!(s.check_invariants().is_err());
    }

    #[test]
    fn relative_url_rejected() {
        let mut s = sample_survey();
        s.source_url = "/vm/abc.aspx".to_string();
        assert!(s.check_invariants().is_err());
    }

    #[test]
    fn blocks_follow_sections() {
        let s = sample_survey();
        let blocks = s.blocks();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].section.map(|x| x.name.as_str()), Some("基本信息"));
        assert_eq!(blocks[0].questions.len(), 2);
        assert_eq!(blocks[1].questions[0].index, 3);
    }

    #[test]
    fn blocks_without_sections_is_one_flat_run() {
        let mut s = sample_survey();
        s.sections.clear();
        let blocks = s.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].section.is_none());
        assert_eq!(blocks[0].questions.len(), 3);
    }
}
