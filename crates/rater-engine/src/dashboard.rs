use tracing::{instrument, warn};

use rater_core::errors::ServiceError;
use rater_core::essay::EssaySummary;
use rater_core::security::User;
use rater_core::services::{AuthService, EssayStore};

/// The rater's essay list with overall progress.
#[derive(Clone, Debug)]
pub struct Dashboard {
    pub rows: Vec<EssaySummary>,
}

impl Dashboard {
    pub fn new(rows: Vec<EssaySummary>) -> Self {
        Self { rows }
    }

    #[instrument(skip_all)]
    pub async fn load(essays: &dyn EssayStore) -> Result<Self, ServiceError> {
        Ok(Self::new(essays.list().await?))
    }

    pub fn completed(&self) -> usize {
        self.rows.iter().filter(|r| r.is_annotated).count()
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    /// Share of essays annotated, 0..=100. An empty list is 0%.
    pub fn percent(&self) -> f64 {
        if self.rows.is_empty() {
            0.0
        } else {
            self.completed() as f64 / self.total() as f64 * 100.0
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.rows.is_empty() && self.completed() == self.total()
    }
}

/// The rater behind the current session. A remembered user is used as-is;
/// otherwise the token is checked against the backend. An auth error means
/// the stored session is dead and the caller should discard it.
#[instrument(skip_all)]
pub async fn resolve_user(auth: &dyn AuthService, known: Option<User>) -> Result<User, ServiceError> {
    if let Some(user) = known {
        return Ok(user);
    }
    auth.current_user().await.inspect_err(|e| {
        if matches!(e, ServiceError::Auth(_)) {
            warn!(error_kind = e.error_kind(), error = %e, "stored session rejected");
        }
    })
}
