use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::{Category, CategoryScore, OptionLabel, Phase, Question};

#[derive(Debug, Deserialize, Validate)]
pub struct StartSessionRequest {
    #[validate(length(min = 1, max = 128, message = "user_id must be 1-128 characters"))]
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub question: Question,
    pub phase: Phase,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAnswerRequest {
    #[validate(length(min = 1, max = 256, message = "answer must not be empty"))]
    pub answer: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAnswerResponse {
    pub is_correct: bool,
    pub correct_answer: OptionLabel,
    pub explanation: String,
    pub next_question: Option<Question>,
    pub complete: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub total_answered: u32,
    pub correct_answers: u32,
    pub overall_accuracy: f64,
    pub category_scores: BTreeMap<Category, CategoryScore>,
    pub weak_categories: Vec<Category>,
    pub phase: Phase,
    pub questions_remaining: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub session_id: String,
    pub status: String,
    pub total_answered: u32,
}
