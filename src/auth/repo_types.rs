use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// How an account was last authenticated or linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
    Microsoft,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::Google => "google",
            AuthProvider::Microsoft => "microsoft",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "local" => Some(AuthProvider::Local),
            "google" => Some(AuthProvider::Google),
            "microsoft" => Some(AuthProvider::Microsoft),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User record in the credential store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // None for OAuth-only accounts
    pub provider: AuthProvider,
    pub photo: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields a store update may touch. `updated_at` is always written.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub provider: Option<AuthProvider>,
    pub photo: Option<String>,
    pub updated_at: OffsetDateTime,
}

impl UserChanges {
    pub fn touch() -> Self {
        Self {
            provider: None,
            photo: None,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(provider) = self.provider {
            user.provider = provider;
        }
        if let Some(photo) = &self.photo {
            user.photo = Some(photo.clone());
        }
        user.updated_at = self.updated_at;
    }
}
