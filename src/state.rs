use std::{sync::Arc, time::Duration};

use tower_sessions::MemoryStore;
use tracing::info;

use crate::auth::{
    oauth::OAuthProviders,
    repo::{DynamoUserStore, MemoryUserStore, UserStore},
    services::IdentityResolver,
    session::{DynamoSessionStore, SessionBackend, SessionManager},
};
use crate::config::{AppConfig, Backend, DynamoConfig, SessionConfig};
use crate::files::{
    repo::{DynamoFileStore, FileStore, MemoryFileStore},
    services::FileService,
};
use crate::storage;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub identity: IdentityResolver,
    pub sessions: SessionManager,
    pub files: FileService,
    pub oauth: Arc<OAuthProviders>,
    pub session_store: SessionBackend,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        let oauth = OAuthProviders::from_config(&config)?;

        let needs_dynamo = config.store_backend == Backend::Dynamodb
            || config.session.backend == Backend::Dynamodb;
        let client = if needs_dynamo {
            Some(storage::dynamo_client(&config.dynamo).await)
        } else {
            None
        };

        let (users, files): (Arc<dyn UserStore>, Arc<dyn FileStore>) =
            match (config.store_backend, &client) {
                (Backend::Dynamodb, Some(client)) => (
                    Arc::new(DynamoUserStore::new(
                        client.clone(),
                        &config.dynamo.users_table,
                        &config.dynamo.user_emails_table,
                    )),
                    Arc::new(DynamoFileStore::new(
                        client.clone(),
                        &config.dynamo.files_table,
                    )),
                ),
                _ => (
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(MemoryFileStore::new()),
                ),
            };

        let session_store = match (config.session.backend, client) {
            (Backend::Dynamodb, Some(client)) => SessionBackend::Dynamo(DynamoSessionStore::new(
                client,
                &config.dynamo.sessions_table,
            )),
            _ => SessionBackend::Memory(MemoryStore::default()),
        };

        info!(
            store = ?config.store_backend,
            sessions = ?config.session.backend,
            google = oauth.google.is_some(),
            microsoft = oauth.microsoft.is_some(),
            "state initialised"
        );

        Ok(Self::from_parts(config, users, files, session_store, oauth))
    }

    pub fn from_parts(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        files: Arc<dyn FileStore>,
        session_store: SessionBackend,
        oauth: OAuthProviders,
    ) -> Self {
        let timeout = Duration::from_secs(config.store_timeout_secs);
        let identity = IdentityResolver::new(users, timeout);
        let sessions = SessionManager::new(identity.clone(), config.session.ttl_hours);
        Self {
            files: FileService::new(files, timeout),
            identity,
            sessions,
            oauth: Arc::new(oauth),
            session_store,
            config: Arc::new(config),
        }
    }

    /// Everything in process memory; used by tests and local runs without AWS.
    pub fn in_memory(config: AppConfig, oauth: OAuthProviders) -> Self {
        Self::from_parts(
            config,
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryFileStore::new()),
            SessionBackend::Memory(MemoryStore::default()),
            oauth,
        )
    }

    /// Development defaults with in-memory backends and no OAuth providers.
    pub fn test_config() -> AppConfig {
        let client_url = "http://localhost:3000".to_string();
        AppConfig {
            host: "127.0.0.1".into(),
            port: 5000,
            oauth_failure_redirect: format!("{client_url}/login"),
            client_url,
            store_backend: Backend::Memory,
            store_timeout_secs: 5,
            session: SessionConfig {
                backend: Backend::Memory,
                ttl_hours: 24,
                cookie_name: "sid".into(),
                production: false,
            },
            dynamo: DynamoConfig {
                region: "us-east-1".into(),
                endpoint: None,
                users_table: "proto-app-users".into(),
                user_emails_table: "proto-app-user-emails".into(),
                files_table: "proto-app-files".into(),
                sessions_table: "proto-app-sessions".into(),
            },
            google: None,
            microsoft: None,
        }
    }
}
