use async_trait::async_trait;

use crate::annotation::{Annotation, AnnotationPatch, NewAnnotation, SubmitReceipt};
use crate::errors::ServiceError;
use crate::essay::{BlindAssignment, Essay, EssaySummary};
use crate::ids::{AnnotationId, EssayId};
use crate::security::{LoginResponse, User};

/// Credential exchange and identity lookup.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ServiceError>;

    /// Resolve the user behind the currently injected token.
    async fn current_user(&self) -> Result<User, ServiceError>;
}

/// Read-only essay access.
#[async_trait]
pub trait EssayStore: Send + Sync {
    async fn list(&self) -> Result<Vec<EssaySummary>, ServiceError>;

    async fn get(&self, id: EssayId) -> Result<Essay, ServiceError>;
}

/// The rater's own annotations.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    async fn get(&self, essay_id: EssayId) -> Result<Option<Annotation>, ServiceError>;

    async fn create(&self, annotation: &NewAnnotation) -> Result<Annotation, ServiceError>;

    async fn update(
        &self,
        id: AnnotationId,
        patch: &AnnotationPatch,
    ) -> Result<Annotation, ServiceError>;

    /// Blind sequence, in the backend's order.
    async fn list_blind_ids(&self) -> Result<Vec<BlindAssignment>, ServiceError>;

    async fn submit_all(&self) -> Result<SubmitReceipt, ServiceError>;
}
