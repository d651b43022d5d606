use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One rubric dimension, scored independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RubricTrait {
    Content,
    Organization,
    Language,
    AiFeedback,
}

impl RubricTrait {
    pub const ALL: [RubricTrait; 4] = [
        Self::Content,
        Self::Organization,
        Self::Language,
        Self::AiFeedback,
    ];

    /// Whether raters back this trait's score with sentence evidence.
    pub fn selects_sentences(self) -> bool {
        !matches!(self, Self::AiFeedback)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Organization => "organization",
            Self::Language => "language",
            Self::AiFeedback => "ai_feedback",
        }
    }
}

impl fmt::Display for RubricTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RubricTrait {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" => Ok(Self::Content),
            "organization" | "organisation" => Ok(Self::Organization),
            "language" => Ok(Self::Language),
            "ai_feedback" | "ai-feedback" | "feedback" => Ok(Self::AiFeedback),
            other => Err(format!("unknown rubric trait: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("score must be between 1 and 5, got {0}")]
pub struct InvalidScore(pub i64);

/// A rubric score in `1..=5`. Unset scores are `Option<Score>::None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Score(u8);

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: i64) -> Result<Self, InvalidScore> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(InvalidScore(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All valid scores, ascending.
    pub fn all() -> impl Iterator<Item = Score> {
        (Self::MIN..=Self::MAX).map(Score)
    }
}

impl TryFrom<i64> for Score {
    type Error = InvalidScore;
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for i64 {
    fn from(score: Score) -> Self {
        i64::from(score.0)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed score input that is not a score.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseScoreError {
    #[error("score must be a number from 1 to 5, got {0:?}")]
    NotANumber(String),
    #[error(transparent)]
    OutOfRange(#[from] InvalidScore),
}

impl FromStr for Score {
    type Err = ParseScoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let value = s
            .parse::<i64>()
            .map_err(|_| ParseScoreError::NotANumber(s.to_string()))?;
        Ok(Self::new(value)?)
    }
}

/// Number of sentences a rater must flag for a trait.
///
/// `round(total * (5 - score) / 5)`, half away from zero, done in integer
/// arithmetic. Lower scores demand more evidence; a 5 demands none. An
/// unset score demands nothing.
pub fn required_count(total_sentences: usize, score: Option<Score>) -> usize {
    let Some(score) = score else {
        return 0;
    };
    let deficit = usize::from(Score::MAX - score.get());
    (2 * total_sentences * deficit + usize::from(Score::MAX)) / (2 * usize::from(Score::MAX))
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RubricError {
    #[error("rubric has no traits")]
    Empty,
    #[error("trait listed twice: {0}")]
    Duplicate(RubricTrait),
    #[error("{0}")]
    Parse(String),
}

/// Ordered set of traits a session walks through. Composition is
/// configuration: the current form scores all four traits, the earlier
/// form scored language, organization and content only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RubricTrait>", into = "Vec<RubricTrait>")]
pub struct Rubric {
    order: Vec<RubricTrait>,
}

impl Rubric {
    pub fn new(order: Vec<RubricTrait>) -> Result<Self, RubricError> {
        if order.is_empty() {
            return Err(RubricError::Empty);
        }
        for (i, t) in order.iter().enumerate() {
            if order[..i].contains(t) {
                return Err(RubricError::Duplicate(*t));
            }
        }
        Ok(Self { order })
    }

    pub fn standard() -> Self {
        Self {
            order: RubricTrait::ALL.to_vec(),
        }
    }

    pub fn legacy() -> Self {
        Self {
            order: vec![
                RubricTrait::Language,
                RubricTrait::Organization,
                RubricTrait::Content,
            ],
        }
    }

    pub fn first(&self) -> RubricTrait {
        self.order[0]
    }

    pub fn contains(&self, t: RubricTrait) -> bool {
        self.order.contains(&t)
    }

    pub fn position(&self, t: RubricTrait) -> Option<usize> {
        self.order.iter().position(|x| *x == t)
    }

    pub fn next(&self, t: RubricTrait) -> Option<RubricTrait> {
        let pos = self.position(t)?;
        self.order.get(pos + 1).copied()
    }

    pub fn prev(&self, t: RubricTrait) -> Option<RubricTrait> {
        let pos = self.position(t)?;
        pos.checked_sub(1).map(|p| self.order[p])
    }

    pub fn iter(&self) -> impl Iterator<Item = RubricTrait> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for Rubric {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<RubricTrait>> for Rubric {
    type Error = RubricError;
    fn try_from(order: Vec<RubricTrait>) -> Result<Self, Self::Error> {
        Self::new(order)
    }
}

impl From<Rubric> for Vec<RubricTrait> {
    fn from(rubric: Rubric) -> Self {
        rubric.order
    }
}

impl FromStr for Rubric {
    type Err = RubricError;

    /// Accepts `standard`, `legacy`, or a comma-separated trait list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "standard" => Ok(Self::standard()),
            "legacy" => Ok(Self::legacy()),
            list => {
                let order = list
                    .split(',')
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| p.parse::<RubricTrait>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(RubricError::Parse)?;
                Self::new(order)
            }
        }
    }
}
