pub mod board;
pub mod dashboard;
pub mod error;
pub mod sequence;
pub mod session;

pub use board::TraitBoard;
pub use dashboard::{resolve_user, Dashboard};
pub use error::EngineError;
pub use sequence::{EssaySequence, SequenceEntry};
pub use session::{AnnotationSession, NextStep, SaveOutcome, SessionStatus, TraitStatus};
