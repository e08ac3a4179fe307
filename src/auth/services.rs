use std::{future::Future, sync::Arc, time::Duration};

use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{Credentials, LoginRequest, NewLocalUser, OAuthProfile, PublicUser, RegisterRequest},
        password,
        repo::{StoreError, UserStore},
        repo_types::{AuthProvider, User, UserChanges},
    },
    error::{AppError, AppResult},
};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Shape checks for registration. Runs before anything touches the store.
pub fn validate_registration(req: RegisterRequest) -> AppResult<NewLocalUser> {
    let email = req.email.unwrap_or_default();
    if !is_valid_email(&email) {
        return Err(AppError::validation("Valid email is required"));
    }

    let password = req.password.unwrap_or_default();
    if password.chars().count() < 8 {
        return Err(AppError::validation(
            "Password must be at least 8 characters",
        ));
    }

    // names are trimmed for the checks only and stored as sent
    let username = req.username.unwrap_or_default();
    if username.trim().chars().count() < 3 {
        return Err(AppError::validation(
            "Username must be at least 3 characters",
        ));
    }

    let first_name = req.first_name.unwrap_or_default();
    if first_name.trim().is_empty() {
        return Err(AppError::validation("First name is required"));
    }

    let last_name = req.last_name.unwrap_or_default();
    if last_name.trim().is_empty() {
        return Err(AppError::validation("Last name is required"));
    }

    Ok(NewLocalUser {
        email,
        password,
        username,
        first_name,
        last_name,
    })
}

pub fn validate_login(req: LoginRequest) -> AppResult<Credentials> {
    let email = req.email.unwrap_or_default();
    if !is_valid_email(&email) {
        return Err(AppError::validation("Valid email is required"));
    }
    let password = req.password.unwrap_or_default();
    if password.is_empty() {
        return Err(AppError::validation("Password is required"));
    }
    Ok(Credentials { email, password })
}

/// Resolves local credentials and OAuth profiles to canonical user records.
#[derive(Clone)]
pub struct IdentityResolver {
    users: Arc<dyn UserStore>,
    timeout: Duration,
}

fn upstream(op: &str, err: StoreError) -> AppError {
    match err {
        StoreError::Conflict => AppError::Unexpected(anyhow::anyhow!("{op}: unexpected conflict")),
        StoreError::Backend(e) => AppError::UpstreamUnavailable(format!("{op}: {e:#}")),
    }
}

impl IdentityResolver {
    pub fn new(users: Arc<dyn UserStore>, timeout: Duration) -> Self {
        Self { users, timeout }
    }

    /// Bounds a store call; a timeout surfaces as a backend failure.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(StoreError::Backend(anyhow::anyhow!(
                "{op} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_local_user(&self, input: NewLocalUser) -> AppResult<PublicUser> {
        let hash = password::hash_password_async(input.password).await?;
        let now = OffsetDateTime::now_utc();
        let user = User {
            user_id: Uuid::new_v4(),
            display_name: format!("{} {}", input.first_name, input.last_name),
            email: input.email,
            username: input.username,
            first_name: input.first_name,
            last_name: input.last_name,
            password_hash: Some(hash),
            provider: AuthProvider::Local,
            photo: None,
            created_at: now,
            updated_at: now,
        };

        match self.call("insert user", self.users.insert(&user)).await {
            Ok(()) => {
                info!(user_id = %user.user_id, "local user created");
                Ok(user.into())
            }
            Err(StoreError::Conflict) => {
                warn!("email already registered");
                Err(AppError::DuplicateEmail)
            }
            Err(e) => Err(upstream("insert user", e)),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.call("find user by email", self.users.find_by_email(email))
            .await
            .map_err(|e| upstream("find user by email", e))
    }

    pub async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<User>> {
        self.call("get user", self.users.get(user_id))
            .await
            .map_err(|e| upstream("get user", e))
    }

    /// Unknown email, password-less account and wrong password are indistinguishable.
    #[instrument(skip(self, creds), fields(email = %creds.email))]
    pub async fn authenticate(&self, creds: Credentials) -> AppResult<PublicUser> {
        let Some(user) = self.find_by_email(&creds.email).await? else {
            warn!("login unknown email");
            return Err(AppError::InvalidCredentials);
        };
        let Some(hash) = user.password_hash.clone() else {
            warn!(user_id = %user.user_id, "password login on oauth-only account");
            return Err(AppError::InvalidCredentials);
        };
        if !password::verify_password_async(creds.password, hash).await? {
            warn!(user_id = %user.user_id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }
        Ok(user.into())
    }

    /// Links by exact email match. The provider's email claim is trusted as-is.
    #[instrument(skip(self, profile), fields(email = %profile.email, provider = %profile.provider))]
    pub async fn find_or_create_oauth_user(&self, profile: OAuthProfile) -> AppResult<PublicUser> {
        let existing = match self.find_by_email(&profile.email).await? {
            Some(user) => user,
            None => {
                let user = new_oauth_user(&profile);
                match self.call("insert user", self.users.insert(&user)).await {
                    Ok(()) => {
                        info!(user_id = %user.user_id, "oauth user created");
                        return Ok(user.into());
                    }
                    // Lost a creation race with another callback; take the update path.
                    Err(StoreError::Conflict) => {
                        debug!("oauth user created concurrently, re-reading");
                        self.find_by_email(&profile.email).await?.ok_or_else(|| {
                            AppError::Unexpected(anyhow::anyhow!(
                                "email guard exists but user record is missing"
                            ))
                        })?
                    }
                    Err(e) => return Err(upstream("insert user", e)),
                }
            }
        };

        let changes = if existing.provider != profile.provider {
            info!(user_id = %existing.user_id, from = %existing.provider, "linking account to provider");
            UserChanges {
                provider: Some(profile.provider),
                photo: profile.photo.clone(),
                updated_at: OffsetDateTime::now_utc(),
            }
        } else {
            UserChanges::touch()
        };

        match self
            .call("update user", self.users.update(existing.user_id, changes))
            .await
        {
            Ok(Some(user)) => Ok(user.into()),
            Ok(None) => Err(AppError::Unexpected(anyhow::anyhow!(
                "user {} disappeared during update",
                existing.user_id
            ))),
            Err(e) => Err(upstream("update user", e)),
        }
    }
}

fn new_oauth_user(profile: &OAuthProfile) -> User {
    let now = OffsetDateTime::now_utc();
    let mut words = profile
        .display_name
        .as_deref()
        .unwrap_or_default()
        .split_whitespace();
    let first_from_display = words.next().unwrap_or_default().to_string();
    let last_from_display = words.next().unwrap_or_default().to_string();

    let first_name = profile.first_name.clone().unwrap_or(first_from_display);
    let last_name = profile.last_name.clone().unwrap_or(last_from_display);
    let display_name = profile
        .display_name
        .clone()
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| format!("{first_name} {last_name}").trim().to_string());

    User {
        user_id: Uuid::new_v4(),
        email: profile.email.clone(),
        username: profile.email.clone(),
        first_name,
        last_name,
        display_name,
        password_hash: None,
        provider: profile.provider,
        photo: profile.photo.clone(),
        created_at: now,
        updated_at: now,
    }
}
