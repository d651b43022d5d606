use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use rater_core::annotation::{Annotation, AnnotationPatch, NewAnnotation, SubmitReceipt};
use rater_core::errors::ServiceError;
use rater_core::essay::{BlindAssignment, Essay, EssaySummary};
use rater_core::ids::{AnnotationId, EssayId};
use rater_core::security::{LoginResponse, SessionContext, SessionToken, User};
use rater_core::services::{AnnotationStore, AuthService, EssayStore};

use crate::config::ClientConfig;

/// REST client for the annotation backend.
///
/// The session context is shared behind a lock so a successful `login`
/// is visible to every later call made through any clone.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    session: Arc<RwLock<SessionContext>>,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig, session: SessionContext) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session: Arc::new(RwLock::new(session)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Copy of the current session, e.g. to persist after login.
    pub async fn session(&self) -> SessionContext {
        self.session.read().await.clone()
    }

    /// Drop the held credentials (logout, or an expired token).
    pub async fn clear_session(&self) {
        self.session.write().await.clear();
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.session.read().await.bearer() {
            Some(bearer) => req.header("Authorization", bearer),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ServiceError> {
        let req = self.authorized(req).await.header("accept", "application/json");
        let resp = req.send().await.map_err(map_transport)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            let err = ServiceError::from_status(status, body);
            warn!(status, error_kind = err.error_kind(), error = %err, "backend rejected request");
            return Err(err);
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ServiceError> {
        let resp = self.send(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

fn map_transport(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Network(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ServiceError::Network(format!("could not reach backend: {e}"))
    } else {
        ServiceError::Network(e.to_string())
    }
}

#[async_trait]
impl AuthService for HttpBackend {
    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ServiceError> {
        let req = self
            .client
            .post(self.url("/auth/login"))
            .form(&[("username", username), ("password", password)]);
        let resp: LoginResponse = self.send_json(req).await?;

        *self.session.write().await = SessionContext::authenticated(
            resp.user.clone(),
            SessionToken::new(resp.access_token.clone()),
        );
        debug!(user_id = %resp.user.id, "logged in");
        Ok(resp)
    }

    #[instrument(skip(self))]
    async fn current_user(&self) -> Result<User, ServiceError> {
        if !self.session.read().await.is_authenticated() {
            return Err(ServiceError::Auth("not logged in".into()));
        }
        let user: User = self.send_json(self.client.get(self.url("/users/me"))).await?;
        self.session.write().await.user = Some(user.clone());
        Ok(user)
    }
}

#[async_trait]
impl EssayStore for HttpBackend {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<EssaySummary>, ServiceError> {
        self.send_json(self.client.get(self.url("/essays"))).await
    }

    #[instrument(skip(self), fields(essay_id = %id))]
    async fn get(&self, id: EssayId) -> Result<Essay, ServiceError> {
        self.send_json(self.client.get(self.url(&format!("/essays/{id}"))))
            .await
    }
}

#[async_trait]
impl AnnotationStore for HttpBackend {
    #[instrument(skip_all, fields(essay_id = %essay_id))]
    async fn get(&self, essay_id: EssayId) -> Result<Option<Annotation>, ServiceError> {
        self.send_json(
            self.client
                .get(self.url(&format!("/annotations/essay-data/{essay_id}"))),
        )
        .await
    }

    #[instrument(skip(self, annotation), fields(essay_id = %annotation.essay_id))]
    async fn create(&self, annotation: &NewAnnotation) -> Result<Annotation, ServiceError> {
        self.send_json(self.client.post(self.url("/annotations")).json(annotation))
            .await
    }

    #[instrument(skip(self, patch), fields(annotation_id = %id))]
    async fn update(
        &self,
        id: AnnotationId,
        patch: &AnnotationPatch,
    ) -> Result<Annotation, ServiceError> {
        self.send_json(
            self.client
                .patch(self.url(&format!("/annotations/{id}")))
                .json(patch),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn list_blind_ids(&self) -> Result<Vec<BlindAssignment>, ServiceError> {
        self.send_json(self.client.get(self.url("/annotations/blind-ids")))
            .await
    }

    #[instrument(skip(self))]
    async fn submit_all(&self) -> Result<SubmitReceipt, ServiceError> {
        self.send_json(self.client.post(self.url("/annotations/submit-all")))
            .await
    }
}
