use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::ids::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
}

/// Bearer token issued at login (redacted in Debug).
#[derive(Clone)]
pub struct SessionToken(pub SecretString);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(SecretString::from(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Login endpoint response.
#[derive(Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub user: User,
}

impl std::fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResponse")
            .field("token_type", &self.token_type)
            .field("user", &self.user)
            .finish()
    }
}

fn default_token_type() -> String {
    "bearer".into()
}

/// Who is rating, and with what credentials. Injected into collaborators
/// instead of living in process-wide state.
#[derive(Clone, Debug, Default)]
pub struct SessionContext {
    pub user: Option<User>,
    pub token: Option<SessionToken>,
}

impl SessionContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user: User, token: SessionToken) -> Self {
        Self {
            user: Some(user),
            token: Some(token),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// `Authorization` header value, if a token is held.
    pub fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t.expose()))
    }

    pub fn clear(&mut self) {
        self.user = None;
        self.token = None;
    }
}
