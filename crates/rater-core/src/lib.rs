pub mod annotation;
pub mod errors;
pub mod essay;
pub mod ids;
pub mod rubric;
pub mod security;
pub mod sentences;
pub mod services;

pub use annotation::{Annotation, AnnotationPatch, Completeness, NewAnnotation, SubmitReceipt, TraitAnnotation};
pub use errors::{Recovery, ServiceError};
pub use essay::{BlindAssignment, Essay, EssaySummary, Evidence};
pub use ids::{AnnotationId, BlindId, EssayId, UserId};
pub use rubric::{required_count, InvalidScore, ParseScoreError, Rubric, RubricError, RubricTrait, Score};
pub use security::{LoginResponse, SessionContext, SessionToken, User};
pub use services::{AnnotationStore, AuthService, EssayStore};
