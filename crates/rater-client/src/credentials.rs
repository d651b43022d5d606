use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rater_core::security::{SessionContext, SessionToken, User};

/// Persisted login, written after a successful `login` and removed on
/// logout or when the backend rejects the token.
#[derive(Serialize, Deserialize)]
pub struct CredentialsFile {
    /// Backend the token was issued by. A token is never sent elsewhere.
    pub api_url: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub saved_at: DateTime<Utc>,
}

impl std::fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsFile")
            .field("api_url", &self.api_url)
            .field("user", &self.user)
            .field("saved_at", &self.saved_at)
            .finish_non_exhaustive()
    }
}

pub fn default_credentials_path() -> PathBuf {
    rater_telemetry::rater_dir().join("session.json")
}

fn load_credentials_file(path: &Path) -> Option<CredentialsFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable credentials file");
            None
        }
    }
}

/// Restore the session saved for `api_url`. Missing, corrupt or foreign
/// credentials all yield an anonymous session.
pub fn load_session(path: &Path, api_url: &str) -> SessionContext {
    let Some(file) = load_credentials_file(path) else {
        return SessionContext::anonymous();
    };
    if file.api_url.trim_end_matches('/') != api_url.trim_end_matches('/') {
        debug!(saved = %file.api_url, current = %api_url, "credentials belong to another backend");
        return SessionContext::anonymous();
    }
    if file.access_token.is_empty() {
        return SessionContext::anonymous();
    }
    SessionContext {
        user: file.user,
        token: Some(SessionToken::new(file.access_token)),
    }
}

/// Persist `session` for `api_url`. Anonymous sessions remove the file.
pub fn save_session(path: &Path, api_url: &str, session: &SessionContext) -> std::io::Result<()> {
    let Some(token) = &session.token else {
        return clear_session(path);
    };
    let file = CredentialsFile {
        api_url: api_url.to_string(),
        access_token: token.expose().to_string(),
        user: session.user.clone(),
        saved_at: Utc::now(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Remove saved credentials. Already-absent is not an error.
pub fn clear_session(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
