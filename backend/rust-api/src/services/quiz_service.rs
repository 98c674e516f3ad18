use std::sync::Arc;
use uuid::Uuid;

use super::question_generator::{GenerationError, QuestionGenerator};
use super::quiz_engine;
use super::session_store::{SessionStore, StoreError};
use super::AppState;
use crate::config::QuizConfig;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, QUIZ_SESSIONS_TOTAL};
use crate::models::quiz::{
    EndSessionResponse, ProgressResponse, StartSessionResponse, SubmitAnswerResponse,
};
use crate::models::{Question, QuizSession};

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("Session not found")]
    SessionNotFound(String),
    #[error("Session has no question awaiting an answer")]
    NoActiveQuestion,
    #[error("Question generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct QuizService {
    store: Arc<dyn SessionStore>,
    generator: QuestionGenerator,
    rules: QuizConfig,
}

impl QuizService {
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.sessions.clone(),
            generator: QuestionGenerator::new(
                state.model.clone(),
                state.config.generation.retry_config(),
                state.config.images_path.clone(),
            ),
            rules: state.config.quiz.clone(),
        }
    }

    pub async fn start(&self, user_id: &str) -> Result<StartSessionResponse, QuizError> {
        let mut session = QuizSession::new(Uuid::new_v4().to_string(), user_id.to_string());
        let question = self.advance(&mut session).await?;

        self.store.put(&session).await?;

        QUIZ_SESSIONS_TOTAL.with_label_values(&["started"]).inc();

        tracing::info!(
            "Quiz session started: {} for user: {}",
            session.session_id,
            user_id
        );

        Ok(StartSessionResponse {
            session_id: session.session_id,
            question,
            phase: session.phase,
        })
    }

    /// Grades the answer and either finishes the session or fetches the next
    /// question. Nothing is written back unless the next question exists.
    pub async fn answer(
        &self,
        session_id: &str,
        answer: &str,
    ) -> Result<SubmitAnswerResponse, QuizError> {
        let mut session = self.load(session_id).await?;

        let outcome = quiz_engine::record_answer(&self.rules, &mut session, answer)
            .ok_or(QuizError::NoActiveQuestion)?;

        tracing::info!(
            "Answer recorded: session={}, category={}, correct={}, answered={}",
            session_id,
            outcome.category,
            outcome.is_correct,
            session.history.len()
        );

        let next_question = if quiz_engine::is_complete(&self.rules, &session) {
            self.store.remove(session_id).await?;

            QUIZ_SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
            tracing::info!(
                "Quiz session completed: {} ({}/{} correct)",
                session_id,
                session.correct_answers(),
                session.history.len()
            );
            None
        } else {
            let question = self.advance(&mut session).await?;
            self.store.put(&session).await?;
            Some(question)
        };

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[
                if outcome.is_correct { "true" } else { "false" },
                outcome.phase.as_str(),
            ])
            .inc();

        Ok(SubmitAnswerResponse {
            is_correct: outcome.is_correct,
            correct_answer: outcome.correct_answer,
            explanation: outcome.explanation,
            complete: next_question.is_none(),
            next_question,
        })
    }

    pub async fn progress(&self, session_id: &str) -> Result<ProgressResponse, QuizError> {
        let session = self.load(session_id).await?;
        Ok(quiz_engine::progress(&self.rules, &session))
    }

    pub async fn end(&self, session_id: &str) -> Result<EndSessionResponse, QuizError> {
        let session = self.load(session_id).await?;

        if !self.store.remove(session_id).await? {
            return Err(QuizError::SessionNotFound(session_id.to_string()));
        }

        QUIZ_SESSIONS_TOTAL.with_label_values(&["ended"]).inc();
        tracing::info!(
            "Quiz session ended early: {} after {} answers",
            session_id,
            session.history.len()
        );

        Ok(EndSessionResponse {
            session_id: session.session_id,
            status: "ended".to_string(),
            total_answered: session.history.len() as u32,
        })
    }

    async fn load(&self, session_id: &str) -> Result<QuizSession, QuizError> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| QuizError::SessionNotFound(session_id.to_string()))
    }

    /// Plans and generates the next question and makes it current.
    async fn advance(&self, session: &mut QuizSession) -> Result<Question, QuizError> {
        let plan = {
            let mut rng = rand::rng();
            quiz_engine::plan_next(&self.rules, session, &mut rng)
        };

        tracing::debug!(
            "Next question for {}: phase={}, category={}, kind={}",
            session.session_id,
            plan.phase.as_str(),
            plan.category,
            plan.kind.as_str()
        );

        let question = self.generator.generate(&plan).await?;

        session.phase = plan.phase;
        session.current_question = Some(question.clone());
        session.updated_at = chrono::Utc::now();

        Ok(question)
    }
}
