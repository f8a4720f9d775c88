//! Turning a user's stored form answers into a prompt context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use counsel_core::UserId;

use crate::result::AiError;

/// Context sent to the model when the user has not answered anything yet.
pub const NO_PROFILE_CONTEXT: &str = "No student profile information available.";

/// One answered question inside a form response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub answer: JsonValue,
}

/// All of a user's answers for one onboarding form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormResponse {
    pub response_id: String,
    pub user_id: UserId,
    pub form_id: String,
    #[serde(default)]
    pub responses: Vec<AnswerEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read access to stored form responses (implemented by the response store in `infra`).
#[async_trait]
pub trait ResponseSource: Send + Sync {
    async fn responses_for(&self, user_id: &UserId) -> Result<Vec<FormResponse>, AiError>;
}

/// `"college_goals"` -> `"College Goals"`.
fn form_title(form_id: &str) -> String {
    form_id
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn render_answer(answer: &JsonValue) -> Option<String> {
    let rendered = match answer {
        JsonValue::Null => return None,
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Array(items) => items
            .iter()
            .filter_map(render_answer)
            .collect::<Vec<_>>()
            .join(", "),
        JsonValue::Bool(b) => {
            if *b {
                "Yes".to_string()
            } else {
                "No".to_string()
            }
        }
        other => other.to_string(),
    };
    (!rendered.is_empty()).then_some(rendered)
}

/// Render responses into the context document, or `None` when there are no responses.
pub fn build_context(responses: &[FormResponse]) -> Option<String> {
    if responses.is_empty() {
        return None;
    }

    let mut lines = vec!["Student Profile Information:".to_string()];
    for form in responses {
        let title = if form.form_id.trim().is_empty() {
            "Unknown Form".to_string()
        } else {
            form_title(&form.form_id)
        };
        lines.push(format!("\n{title}:"));

        for entry in &form.responses {
            let question = entry.question_text.trim();
            if question.is_empty() {
                continue;
            }
            if let Some(answer) = render_answer(&entry.answer) {
                lines.push(format!("- {question}: {answer}"));
            }
        }
    }
    Some(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(form_id: &str, answers: Vec<(&str, JsonValue)>) -> FormResponse {
        let now = Utc::now();
        FormResponse {
            response_id: format!("r-{form_id}"),
            user_id: UserId::parse("u1").unwrap(),
            form_id: form_id.to_string(),
            responses: answers
                .into_iter()
                .map(|(q, a)| AnswerEntry {
                    question_id: None,
                    question_text: q.to_string(),
                    answer: a,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn no_responses_means_no_context() {
        assert_eq!(build_context(&[]), None);
    }

    #[test]
    fn forms_are_titled_and_empty_answers_skipped() {
        let context = build_context(&[form(
            "college_goals",
            vec![
                ("What do you want to study?", json!("Marine biology")),
                ("Preferred size?", json!("")),
                ("", json!("orphan answer")),
                ("Regions", json!(["West Coast", "Northeast"])),
                ("Needs aid?", json!(true)),
            ],
        )])
        .unwrap();

        assert!(context.starts_with("Student Profile Information:"));
        assert!(context.contains("\nCollege Goals:"));
        assert!(context.contains("- What do you want to study?: Marine biology"));
        assert!(context.contains("- Regions: West Coast, Northeast"));
        assert!(context.contains("- Needs aid?: Yes"));
        assert!(!context.contains("Preferred size?"));
        assert!(!context.contains("orphan answer"));
    }

    #[test]
    fn form_title_normalizes_case() {
        assert_eq!(form_title("ACADEMIC_background"), "Academic Background");
        assert_eq!(form_title("intro__free_time"), "Intro Free Time");
    }
}
