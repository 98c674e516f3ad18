//! Adaptive quiz rules: assessment then practice, weak-category targeting and
//! periodic scenario questions. Pure functions over [`QuizSession`]; no I/O.

use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::BTreeMap;

use crate::config::QuizConfig;
use crate::models::quiz::ProgressResponse;
use crate::models::{accuracy, Category, CategoryScore, OptionLabel, Phase, QuizSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Theory,
    /// Grounded in a scenario image
    Scenario,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Theory => "theory",
            QuestionKind::Scenario => "scenario",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionPlan {
    pub phase: Phase,
    pub category: Category,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub is_correct: bool,
    pub correct_answer: OptionLabel,
    pub explanation: String,
    pub category: Category,
    pub phase: Phase,
}

/// Decides phase, category and kind of the question that follows the
/// current history.
pub fn plan_next<R: Rng + ?Sized>(
    rules: &QuizConfig,
    session: &QuizSession,
    rng: &mut R,
) -> QuestionPlan {
    let answered = session.history.len();

    if answered < rules.assessment_length {
        let last = session.history.last().map(|q| q.category);
        let candidates: Vec<Category> = Category::ALL
            .into_iter()
            .filter(|category| !(rules.avoid_repeat_categories && Some(*category) == last))
            .collect();

        return QuestionPlan {
            phase: Phase::Assessment,
            category: random_category(&candidates, rng),
            kind: QuestionKind::Theory,
        };
    }

    let category = session
        .weak_categories
        .first()
        .copied()
        .unwrap_or_else(|| random_category(&Category::ALL, rng));

    let practice_ordinal = answered - rules.assessment_length + 1;
    let kind = if practice_ordinal % rules.scenario_interval.max(1) == 0 {
        QuestionKind::Scenario
    } else {
        QuestionKind::Theory
    };

    QuestionPlan {
        phase: Phase::Practice,
        category,
        kind,
    }
}

fn random_category<R: Rng + ?Sized>(candidates: &[Category], rng: &mut R) -> Category {
    candidates
        .choose(rng)
        .copied()
        .unwrap_or(Category::RoadSigns)
}

/// Grades the current question, moves it into history and refreshes the
/// tallies. Returns `None` when there is no question waiting for an answer.
pub fn record_answer(
    rules: &QuizConfig,
    session: &mut QuizSession,
    raw_answer: &str,
) -> Option<AnswerOutcome> {
    let mut question = session.current_question.take()?;

    let is_correct = OptionLabel::parse(raw_answer) == Some(question.correct);
    question.user_answer = Some(raw_answer.trim().to_string());
    question.is_correct = Some(is_correct);

    let score = session.scores.entry(question.category).or_default();
    score.total += 1;
    if is_correct {
        score.correct += 1;
    }

    let outcome = AnswerOutcome {
        is_correct,
        correct_answer: question.correct,
        explanation: question.explanation.clone(),
        category: question.category,
        phase: session.phase,
    };

    session.history.push(question);
    session.weak_categories = weak_categories(rules, &session.scores);
    session.updated_at = chrono::Utc::now();

    Some(outcome)
}

/// Categories with enough attempts and accuracy under the threshold, weakest
/// first. Ties go to the category with more attempts, then declaration order.
pub fn weak_categories(
    rules: &QuizConfig,
    scores: &BTreeMap<Category, CategoryScore>,
) -> Vec<Category> {
    let mut weak: Vec<(Category, CategoryScore)> = scores
        .iter()
        .filter(|(_, score)| {
            score.total >= rules.weak_min_attempts
                && score.accuracy() < rules.weak_accuracy_threshold
        })
        .map(|(category, score)| (*category, *score))
        .collect();

    weak.sort_by(|(a_cat, a), (b_cat, b)| {
        a.accuracy()
            .total_cmp(&b.accuracy())
            .then_with(|| b.total.cmp(&a.total))
            .then_with(|| a_cat.cmp(b_cat))
    });

    weak.into_iter().map(|(category, _)| category).collect()
}

pub fn is_complete(rules: &QuizConfig, session: &QuizSession) -> bool {
    session.history.len() >= rules.session_length
}

pub fn progress(rules: &QuizConfig, session: &QuizSession) -> ProgressResponse {
    let total = session.history.len() as u32;
    let correct = session.correct_answers();

    ProgressResponse {
        total_answered: total,
        correct_answers: correct,
        overall_accuracy: accuracy(correct, total),
        category_scores: session.scores.clone(),
        weak_categories: session.weak_categories.clone(),
        phase: session.phase,
        questions_remaining: (rules.session_length as u32).saturating_sub(total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Question;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rules() -> QuizConfig {
        QuizConfig::default()
    }

    fn question(category: Category, correct: OptionLabel) -> Question {
        Question {
            id: uuid::Uuid::new_v4().to_string(),
            text: "What does a yellow box junction mean?".into(),
            options: vec![
                "A) Do not enter unless your exit is clear".into(),
                "B) Park here".into(),
                "C) Bus stop".into(),
                "D) Taxi rank".into(),
            ],
            correct,
            category,
            explanation: "Keep the junction clear.".into(),
            image_url: None,
            user_answer: None,
            is_correct: None,
        }
    }

    fn answer(session: &mut QuizSession, category: Category, correct: bool) -> AnswerOutcome {
        session.current_question = Some(question(category, OptionLabel::A));
        record_answer(&rules(), session, if correct { "A" } else { "B" }).unwrap()
    }

    #[test]
    fn first_five_questions_are_assessment() {
        let rules = rules();
        let mut rng = StdRng::seed_from_u64(7);
        let mut session = QuizSession::new("s".into(), "u".into());

        for n in 0..rules.session_length {
            let plan = plan_next(&rules, &session, &mut rng);
            let expected = if n < 5 {
                Phase::Assessment
            } else {
                Phase::Practice
            };
            assert_eq!(plan.phase, expected, "question {}", n + 1);
            session.phase = plan.phase;
            answer(&mut session, plan.category, n % 2 == 0);
        }
    }

    #[test]
    fn assessment_avoids_immediate_repeats() {
        let rules = rules();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let mut session = QuizSession::new("s".into(), "u".into());
            answer(&mut session, Category::Parking, true);
            let plan = plan_next(&rules, &session, &mut rng);
            assert_ne!(plan.category, Category::Parking);
        }
    }

    #[test]
    fn assessment_may_repeat_when_allowed() {
        let rules = QuizConfig {
            avoid_repeat_categories: false,
            ..QuizConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut session = QuizSession::new("s".into(), "u".into());
        answer(&mut session, Category::Parking, true);

        let repeated = (0..200)
            .map(|_| plan_next(&rules, &session, &mut rng).category)
            .any(|category| category == Category::Parking);
        assert!(repeated);
    }

    #[test]
    fn practice_targets_weakest_category() {
        let rules = rules();
        let mut rng = StdRng::seed_from_u64(3);
        let mut session = QuizSession::new("s".into(), "u".into());

        // parking 1/3, roundabouts 1/2, road signs 2/2
        answer(&mut session, Category::Parking, false);
        answer(&mut session, Category::Parking, true);
        answer(&mut session, Category::Parking, false);
        answer(&mut session, Category::Roundabouts, false);
        answer(&mut session, Category::Roundabouts, true);
        answer(&mut session, Category::RoadSigns, true);
        answer(&mut session, Category::RoadSigns, true);

        assert_eq!(
            session.weak_categories,
            vec![Category::Parking, Category::Roundabouts]
        );
        let plan = plan_next(&rules, &session, &mut rng);
        assert_eq!(plan.phase, Phase::Practice);
        assert_eq!(plan.category, Category::Parking);
    }

    #[test]
    fn weak_categories_need_two_attempts_and_under_seventy_percent() {
        let rules = rules();
        let mut scores = BTreeMap::new();
        scores.insert(Category::Parking, CategoryScore { correct: 0, total: 1 });
        scores.insert(Category::RoadSigns, CategoryScore { correct: 7, total: 10 });
        scores.insert(Category::SpeedLimits, CategoryScore { correct: 2, total: 3 });
        scores.insert(Category::RightOfWay, CategoryScore { correct: 0, total: 2 });

        let weak = weak_categories(&rules, &scores);

        // 70% exactly is not weak; 66.7% is.
        assert_eq!(weak, vec![Category::RightOfWay, Category::SpeedLimits]);
        for category in &weak {
            let score = scores[category];
            assert!(score.total >= 2);
            assert!(score.accuracy() < 70.0);
        }
    }

    #[test]
    fn weak_ties_prefer_more_attempts() {
        let rules = rules();
        let mut scores = BTreeMap::new();
        scores.insert(Category::Parking, CategoryScore { correct: 1, total: 2 });
        scores.insert(Category::Roundabouts, CategoryScore { correct: 2, total: 4 });

        assert_eq!(
            weak_categories(&rules, &scores),
            vec![Category::Roundabouts, Category::Parking]
        );
    }

    #[test]
    fn every_third_practice_question_is_a_scenario() {
        let rules = rules();
        let mut rng = StdRng::seed_from_u64(9);
        let mut session = QuizSession::new("s".into(), "u".into());
        let mut kinds = Vec::new();

        for _ in 0..rules.session_length {
            let plan = plan_next(&rules, &session, &mut rng);
            if plan.phase == Phase::Practice {
                kinds.push(plan.kind);
            }
            answer(&mut session, plan.category, true);
        }

        assert_eq!(kinds.len(), 10);
        for (index, kind) in kinds.iter().enumerate() {
            let expected = if (index + 1) % 3 == 0 {
                QuestionKind::Scenario
            } else {
                QuestionKind::Theory
            };
            assert_eq!(*kind, expected, "practice question {}", index + 1);
        }
    }

    #[test]
    fn record_answer_updates_history_and_tallies() {
        let rules = rules();
        let mut session = QuizSession::new("s".into(), "u".into());
        session.current_question = Some(question(Category::SpeedLimits, OptionLabel::C));

        let outcome = record_answer(&rules, &mut session, "c) 50 km/h").unwrap();

        assert!(outcome.is_correct);
        assert_eq!(outcome.correct_answer, OptionLabel::C);
        assert!(session.current_question.is_none());
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].user_answer.as_deref(), Some("c) 50 km/h"));
        assert_eq!(session.history[0].is_correct, Some(true));
        assert_eq!(
            session.scores[&Category::SpeedLimits],
            CategoryScore { correct: 1, total: 1 }
        );
    }

    #[test]
    fn free_text_answer_is_graded_wrong() {
        let rules = rules();
        let mut session = QuizSession::new("s".into(), "u".into());
        session.current_question = Some(question(Category::Parking, OptionLabel::D));

        let outcome = record_answer(&rules, &mut session, "Don't know").unwrap();

        assert!(!outcome.is_correct);
        assert_eq!(session.history[0].is_correct, Some(false));
        assert_eq!(
            session.scores[&Category::Parking],
            CategoryScore { correct: 0, total: 1 }
        );
    }

    #[test]
    fn record_answer_without_question_is_none() {
        let mut session = QuizSession::new("s".into(), "u".into());
        assert!(record_answer(&rules(), &mut session, "A").is_none());
    }

    #[test]
    fn completes_at_session_length() {
        let rules = rules();
        let mut session = QuizSession::new("s".into(), "u".into());

        for _ in 0..14 {
            answer(&mut session, Category::Parking, true);
            assert!(!is_complete(&rules, &session));
        }
        answer(&mut session, Category::Parking, true);
        assert!(is_complete(&rules, &session));
    }

    #[test]
    fn progress_accuracy() {
        let rules = rules();
        let mut session = QuizSession::new("s".into(), "u".into());

        let empty = progress(&rules, &session);
        assert_eq!(empty.overall_accuracy, 0.0);
        assert_eq!(empty.questions_remaining, 15);

        answer(&mut session, Category::Parking, true);
        answer(&mut session, Category::Parking, false);
        answer(&mut session, Category::RoadSigns, true);
        answer(&mut session, Category::RoadSigns, true);

        let report = progress(&rules, &session);
        assert_eq!(report.total_answered, 4);
        assert_eq!(report.correct_answers, 3);
        assert_eq!(report.overall_accuracy, 75.0);
        assert_eq!(report.questions_remaining, 11);
        assert_eq!(report.weak_categories, vec![Category::Parking]);
    }
}
