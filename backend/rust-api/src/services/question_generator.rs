use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use validator::Validate;

use super::gemini_client::{GenerationRequest, GenerativeModel, ModelError, Part};
use super::quiz_engine::{QuestionKind, QuestionPlan};
use super::scenario_images::{self, ScenarioImage};
use crate::metrics::QUESTIONS_GENERATED_TOTAL;
use crate::models::{Category, OptionLabel, Question};
use crate::utils::retry::{retry_async_when, RetryConfig};

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)```").unwrap();
    static ref OPTION_LABEL: Regex = Regex::new(r"^\s*([A-Da-d])\s*[\).:]\s*").unwrap();
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("malformed model output: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Model(err) => err.is_retryable(),
            GenerationError::Malformed(_) => true,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
struct GeneratedQuestion {
    #[validate(length(min = 1, message = "question is empty"))]
    question: String,
    #[validate(length(equal = 4, message = "expected exactly four options"))]
    options: Vec<String>,
    #[validate(length(min = 1, message = "correct is empty"))]
    correct: String,
    #[validate(length(min = 1, message = "explanation is empty"))]
    explanation: String,
}

/// Pulls the JSON object out of a model reply that may be wrapped in a
/// markdown fence or surrounded by prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let body = CODE_FENCE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

/// Strict conversion of model output into a [`Question`].
pub fn parse_question(
    text: &str,
    category: Category,
    image_url: Option<String>,
) -> Result<Question, GenerationError> {
    let json = extract_json(text)
        .ok_or_else(|| GenerationError::Malformed("no JSON object in response".to_string()))?;

    let mut generated: GeneratedQuestion = serde_json::from_str(json)
        .map_err(|e| GenerationError::Malformed(format!("unexpected question shape: {}", e)))?;

    generated.question = generated.question.trim().to_string();
    generated.correct = generated.correct.trim().to_string();
    generated.explanation = generated.explanation.trim().to_string();
    generated
        .validate()
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let options = normalize_options(&generated.options)?;
    let correct = OptionLabel::parse(&generated.correct).ok_or_else(|| {
        GenerationError::Malformed(format!("correct '{}' is not one of A-D", generated.correct))
    })?;

    Ok(Question {
        id: uuid::Uuid::new_v4().to_string(),
        text: generated.question,
        options,
        correct,
        category,
        explanation: generated.explanation,
        image_url,
        user_answer: None,
        is_correct: None,
    })
}

/// Options must come in A-D order. Unlabelled options get their label added;
/// a label in the wrong position is rejected.
fn normalize_options(options: &[String]) -> Result<Vec<String>, GenerationError> {
    options
        .iter()
        .zip(OptionLabel::ALL)
        .map(|(option, expected)| {
            let option = option.trim();
            match OPTION_LABEL.captures(option) {
                Some(captures) => {
                    let label = captures.get(1).and_then(|m| OptionLabel::parse(m.as_str()));
                    let rest = &option[captures.get(0).map(|m| m.end()).unwrap_or(0)..];
                    if label != Some(expected) {
                        return Err(GenerationError::Malformed(format!(
                            "option '{}' should be labelled {}",
                            option, expected
                        )));
                    }
                    if rest.trim().is_empty() {
                        return Err(GenerationError::Malformed(format!(
                            "option {} has no text",
                            expected
                        )));
                    }
                    Ok(format!("{}) {}", expected, rest.trim()))
                }
                None if option.is_empty() => Err(GenerationError::Malformed(format!(
                    "option {} is empty",
                    expected
                ))),
                None => Ok(format!("{}) {}", expected, option)),
            }
        })
        .collect()
}

fn topic(category: Category) -> String {
    category.as_str().replace('_', " ")
}

pub fn theory_prompt(category: Category) -> String {
    format!(
        r#"Generate an Irish driving theory test question about {topic}.

Return ONLY this JSON (no markdown, no extra text):
{{
    "question": "Your question here?",
    "options": ["A) First", "B) Second", "C) Third", "D) Fourth"],
    "correct": "A",
    "explanation": "Why this is correct"
}}"#,
        topic = topic(category)
    )
}

pub fn scenario_prompt(category: Category) -> String {
    format!(
        r#"Analyze this driving scenario image and create an Irish driving test question.
Category: {topic}

Return ONLY this JSON:
{{
    "question": "In this scenario, what should you do?",
    "options": ["A) ...", "B) ...", "C) ...", "D) ..."],
    "correct": "A",
    "explanation": "..."
}}"#,
        topic = topic(category)
    )
}

pub struct QuestionGenerator {
    model: Arc<dyn GenerativeModel>,
    retry: RetryConfig,
    images_path: PathBuf,
}

impl QuestionGenerator {
    pub fn new(model: Arc<dyn GenerativeModel>, retry: RetryConfig, images_path: PathBuf) -> Self {
        Self {
            model,
            retry,
            images_path,
        }
    }

    pub async fn generate(&self, plan: &QuestionPlan) -> Result<Question, GenerationError> {
        if plan.kind == QuestionKind::Scenario {
            if let Some(image) = scenario_images::pick_random(&self.images_path).await {
                match tokio::fs::read(&image.path).await {
                    Ok(bytes) => return self.generate_scenario(plan.category, &image, bytes).await,
                    Err(e) => tracing::warn!(
                        "Could not read scenario image {}: {}",
                        image.path.display(),
                        e
                    ),
                }
            }
            tracing::info!("Falling back to a text question for {}", plan.category);
        }

        self.generate_theory(plan.category).await
    }

    async fn generate_theory(&self, category: Category) -> Result<Question, GenerationError> {
        let question = self
            .request_question("generate_question", category, None, || {
                GenerationRequest::text(theory_prompt(category))
            })
            .await?;

        QUESTIONS_GENERATED_TOTAL
            .with_label_values(&[QuestionKind::Theory.as_str(), category.as_str()])
            .inc();
        Ok(question)
    }

    async fn generate_scenario(
        &self,
        category: Category,
        image: &ScenarioImage,
        bytes: Vec<u8>,
    ) -> Result<Question, GenerationError> {
        tracing::debug!("Generating scenario question from {}", image.file_name);

        let question = self
            .request_question(
                "generate_scenario_question",
                category,
                Some(image.public_url()),
                || {
                    GenerationRequest::text(scenario_prompt(category)).with_part(Part::InlineData {
                        mime_type: image.mime_type.to_string(),
                        data: bytes.clone(),
                    })
                },
            )
            .await?;

        QUESTIONS_GENERATED_TOTAL
            .with_label_values(&[QuestionKind::Scenario.as_str(), category.as_str()])
            .inc();
        Ok(question)
    }

    async fn request_question<B>(
        &self,
        operation: &str,
        category: Category,
        image_url: Option<String>,
        build_request: B,
    ) -> Result<Question, GenerationError>
    where
        B: Fn() -> GenerationRequest,
    {
        retry_async_when(
            operation,
            self.retry.clone(),
            GenerationError::is_retryable,
            |_| {
                let request = build_request();
                let image_url = image_url.clone();
                async move {
                    let text = self.model.generate(request).await?;
                    parse_question(&text, category, image_url)
                }
            },
        )
        .await
    }
}
