use rater_core::errors::{Recovery, ServiceError};
use rater_core::rubric::RubricTrait;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("choose a {0} score before selecting sentences")]
    ScoreRequired(RubricTrait),

    #[error("{0} is scored without sentence evidence")]
    SelectionNotAllowed(RubricTrait),

    #[error("sentence {index} does not exist (essay has {total} sentences)")]
    SentenceOutOfRange { index: usize, total: usize },

    #[error("{0} is not part of this rubric")]
    TraitNotInRubric(RubricTrait),
}

impl EngineError {
    /// Guard rejections stay in the editor; service errors route as usual.
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Service(e) => e.recovery(),
            _ => Recovery::Inline,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Service(e) => e.error_kind(),
            Self::ScoreRequired(_) => "score_required",
            Self::SelectionNotAllowed(_) => "selection_not_allowed",
            Self::SentenceOutOfRange { .. } => "sentence_out_of_range",
            Self::TraitNotInRubric(_) => "trait_not_in_rubric",
        }
    }
}
