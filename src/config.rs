use anyhow::Context;

const MICROSOFT_PLACEHOLDER_ID: &str = "your-microsoft-client-id-here";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Dynamodb,
}

impl Backend {
    fn from_env(var: &str, default: Backend) -> anyhow::Result<Self> {
        match std::env::var(var) {
            Ok(v) => match v.as_str() {
                "memory" => Ok(Backend::Memory),
                "dynamodb" => Ok(Backend::Dynamodb),
                other => anyhow::bail!("{var} must be `memory` or `dynamodb`, got `{other}`"),
            },
            Err(_) => Ok(default),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub backend: Backend,
    pub ttl_hours: i64,
    pub cookie_name: String,
    /// `Secure` cookies.
    pub production: bool,
}

#[derive(Debug, Clone)]
pub struct DynamoConfig {
    pub region: String,
    /// Local DynamoDB / LocalStack endpoint.
    pub endpoint: Option<String>,
    pub users_table: String,
    pub user_emails_table: String,
    pub files_table: String,
    pub sessions_table: String,
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub callback_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    /// Bounds the code exchange and the profile fetch together.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub client_url: String,
    pub oauth_failure_redirect: String,
    pub store_backend: Backend,
    pub store_timeout_secs: u64,
    pub session: SessionConfig,
    pub dynamo: DynamoConfig,
    pub google: Option<OAuthClientConfig>,
    pub microsoft: Option<OAuthClientConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let client_url =
            std::env::var("CLIENT_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let production = std::env::var("APP_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);

        let session = SessionConfig {
            backend: Backend::from_env("SESSION_STORE", Backend::Memory)?,
            ttl_hours: ttl_hours(std::env::var("SESSION_TTL_HOURS").ok().as_deref())?,
            cookie_name: std::env::var("SESSION_COOKIE_NAME").unwrap_or_else(|_| "sid".into()),
            production,
        };

        let dynamo = DynamoConfig {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".into()),
            endpoint: std::env::var("DYNAMODB_ENDPOINT").ok(),
            users_table: std::env::var("DYNAMODB_USERS_TABLE")
                .unwrap_or_else(|_| "proto-app-users".into()),
            user_emails_table: std::env::var("DYNAMODB_USER_EMAILS_TABLE")
                .unwrap_or_else(|_| "proto-app-user-emails".into()),
            files_table: std::env::var("DYNAMODB_FILES_TABLE")
                .unwrap_or_else(|_| "proto-app-files".into()),
            sessions_table: std::env::var("DYNAMODB_SESSIONS_TABLE")
                .unwrap_or_else(|_| "proto-app-sessions".into()),
        };

        let oauth_timeout_secs = std::env::var("OAUTH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(10);
        let google = oauth_from_env(
            "GOOGLE",
            oauth_timeout_secs,
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://openidconnect.googleapis.com/v1/userinfo",
        );
        let microsoft = oauth_from_env(
            "MICROSOFT",
            oauth_timeout_secs,
            "https://login.microsoftonline.com/common/oauth2/v2.0/authorize",
            "https://login.microsoftonline.com/common/oauth2/v2.0/token",
            "https://graph.microsoft.com/v1.0/me",
        )
        .filter(|c| c.client_id != MICROSOFT_PLACEHOLDER_ID);

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("APP_PORT")
                .unwrap_or_else(|_| "5000".into())
                .parse()?,
            oauth_failure_redirect: std::env::var("OAUTH_FAILURE_REDIRECT")
                .unwrap_or_else(|_| format!("{}/login", client_url.trim_end_matches('/'))),
            client_url,
            store_backend: Backend::from_env("STORE_BACKEND", Backend::Dynamodb)?,
            store_timeout_secs: std::env::var("STORE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5),
            session,
            dynamo,
            google,
            microsoft,
        })
    }

    /// Where the browser lands after a successful provider login.
    pub fn oauth_success_redirect(&self) -> String {
        format!("{}?auth=success", self.client_url)
    }
}

/// Session lifetime in hours, 24 when unset. Anything outside a year is rejected.
fn ttl_hours(raw: Option<&str>) -> anyhow::Result<i64> {
    let Some(raw) = raw else {
        return Ok(24);
    };
    let hours: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("SESSION_TTL_HOURS `{raw}` is not a number"))?;
    if !(1..=8760).contains(&hours) {
        anyhow::bail!("SESSION_TTL_HOURS must be between 1 and 8760, got {hours}");
    }
    Ok(hours)
}

/// Provider credentials are optional; a provider without an id and secret stays disabled.
fn oauth_from_env(
    prefix: &str,
    timeout_secs: u64,
    auth_url: &str,
    token_url: &str,
    profile_url: &str,
) -> Option<OAuthClientConfig> {
    let var = |name: &str| std::env::var(format!("{prefix}_{name}")).ok();
    let client_id = var("CLIENT_ID").filter(|v| !v.is_empty())?;
    let client_secret = var("CLIENT_SECRET").filter(|v| !v.is_empty())?;
    Some(OAuthClientConfig {
        client_id,
        client_secret,
        callback_url: var("CALLBACK_URL").unwrap_or_else(|| {
            format!(
                "http://localhost:5000/auth/{}/callback",
                prefix.to_lowercase()
            )
        }),
        auth_url: var("AUTH_URL").unwrap_or_else(|| auth_url.into()),
        token_url: var("TOKEN_URL").unwrap_or_else(|| token_url.into()),
        profile_url: var("PROFILE_URL").unwrap_or_else(|| profile_url.into()),
        timeout_secs,
    })
}
