use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod analysis;
pub mod quiz;

/// Theory test categories a question can be drawn from. Declaration order is
/// the tie-break order for weak-category ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    RoadSigns,
    RightOfWay,
    SpeedLimits,
    Parking,
    Roundabouts,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::RoadSigns,
        Category::RightOfWay,
        Category::SpeedLimits,
        Category::Parking,
        Category::Roundabouts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::RoadSigns => "road_signs",
            Category::RightOfWay => "right_of_way",
            Category::SpeedLimits => "speed_limits",
            Category::Parking => "parking",
            Category::Roundabouts => "roundabouts",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Assessment,
    Practice,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Assessment => "assessment",
            Phase::Practice => "practice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionLabel {
    A,
    B,
    C,
    D,
}

impl OptionLabel {
    pub const ALL: [OptionLabel; 4] = [OptionLabel::A, OptionLabel::B, OptionLabel::C, OptionLabel::D];

    /// Reads a leading label, so `"b"`, `"B) Stop"` and `" B "` all give
    /// `B`. The letter must stand alone: `"Don't know"` is not `D`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut chars = raw.trim_start().chars();
        let label = match chars.next()?.to_ascii_uppercase() {
            'A' => OptionLabel::A,
            'B' => OptionLabel::B,
            'C' => OptionLabel::C,
            'D' => OptionLabel::D,
            _ => return None,
        };

        match chars.next() {
            Some(next) if next.is_alphanumeric() => None,
            _ => Some(label),
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            OptionLabel::A => 'A',
            OptionLabel::B => 'B',
            OptionLabel::C => 'C',
            OptionLabel::D => 'D',
        }
    }
}

impl fmt::Display for OptionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct: OptionLabel,
    pub category: Category,
    pub explanation: String,
    pub image_url: Option<String>,
    pub user_answer: Option<String>,
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub correct: u32,
    pub total: u32,
}

impl CategoryScore {
    pub fn accuracy(&self) -> f64 {
        accuracy(self.correct, self.total)
    }
}

/// `100 * correct / total`, or 0 when nothing has been answered.
pub fn accuracy(correct: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(correct) / f64::from(total) * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSession {
    pub session_id: String,
    pub user_id: String,
    pub phase: Phase,
    pub current_question: Option<Question>,
    pub history: Vec<Question>,
    pub scores: BTreeMap<Category, CategoryScore>,
    pub weak_categories: Vec<Category>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuizSession {
    pub fn new(session_id: String, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            phase: Phase::Assessment,
            current_question: None,
            history: Vec::new(),
            scores: BTreeMap::new(),
            weak_categories: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn correct_answers(&self) -> u32 {
        self.history
            .iter()
            .filter(|q| q.is_correct == Some(true))
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_label_parses_loose_answers() {
        assert_eq!(OptionLabel::parse("b"), Some(OptionLabel::B));
        assert_eq!(OptionLabel::parse("  C) Yield"), Some(OptionLabel::C));
        assert_eq!(OptionLabel::parse("D"), Some(OptionLabel::D));
        assert_eq!(OptionLabel::parse("E"), None);
        assert_eq!(OptionLabel::parse("   "), None);
        assert_eq!(OptionLabel::parse("a. Stop"), Some(OptionLabel::A));
        assert_eq!(OptionLabel::parse("B:"), Some(OptionLabel::B));
    }

    #[test]
    fn option_label_rejects_free_text() {
        assert_eq!(OptionLabel::parse("Don't know"), None);
        assert_eq!(OptionLabel::parse("banana"), None);
        assert_eq!(OptionLabel::parse("ab"), None);
        assert_eq!(OptionLabel::parse("C3"), None);
    }

    #[test]
    fn categories_serialize_in_snake_case() {
        let json = serde_json::to_string(&Category::RightOfWay).unwrap();
        assert_eq!(json, "\"right_of_way\"");
        assert_eq!(Category::RightOfWay.to_string(), "right_of_way");
    }

    #[test]
    fn accuracy_is_zero_without_attempts() {
        assert_eq!(accuracy(0, 0), 0.0);
        assert_eq!(accuracy(1, 4), 25.0);
        assert_eq!(CategoryScore { correct: 2, total: 2 }.accuracy(), 100.0);
    }

    #[test]
    fn score_map_uses_category_names_as_keys() {
        let mut session = QuizSession::new("s".into(), "u".into());
        session
            .scores
            .insert(Category::Parking, CategoryScore { correct: 1, total: 2 });

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["scores"]["parking"]["total"], 2);
        assert_eq!(json["phase"], "assessment");
    }
}
