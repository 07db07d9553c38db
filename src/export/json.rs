use super::{ensure_valid, ExportFormat, Exporter};
use crate::error::ExportError;
use crate::model::Survey;

/// Field-for-field serialization of the Survey record.
pub struct JsonExporter;

impl Exporter for JsonExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }

    fn render(&self, survey: &Survey) -> Result<Vec<u8>, ExportError> {
        ensure_valid(survey)?;
        let mut bytes =
            serde_json::to_vec_pretty(survey).map_err(|e| ExportError::Encode(e.to_string()))?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Read back a structured-data payload.
pub fn from_slice(bytes: &[u8]) -> Result<Survey, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::sample_survey;
    use serde_json::Value;

    #[test]
    fn round_trip_is_lossless() {
        let survey = sample_survey();
        let bytes = JsonExporter.render(&survey).unwrap();
        assert_eq!(from_slice(&bytes).unwrap(), survey);
    }

    #[test]
    fn round_trip_with_matrix_rows_and_now() {
        let mut survey = sample_survey();
        survey.crawl_time = chrono::Utc::now();
        survey.questions[2].rows = vec!["行一".into(), "行二".into()];
        survey.questions[1].topic_id = None;
        let bytes = JsonExporter.render(&survey).unwrap();
        assert_eq!(from_slice(&bytes).unwrap(), survey);
    }

    #[test]
    fn top_level_keys() {
        let bytes = JsonExporter.render(&sample_survey()).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["title", "description", "source_url", "crawl_time", "sections", "questions"] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert_eq!(value["sections"][0]["question_refs"], serde_json::json!([1, 2]));
        assert_eq!(value["questions"][0]["type"], "single_choice");
        assert_eq!(value["questions"][0]["required"], true);
        assert_eq!(value["questions"][1]["options"], serde_json::json!([]));
        assert_eq!(value["questions"][2]["logic"], "displayed only if Q1 = 是");
    }

    #[test]
    fn non_ascii_is_not_escaped() {
        let bytes = JsonExporter.render(&sample_survey()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("样例问卷"));
    }
}
