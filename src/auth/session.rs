use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use time::OffsetDateTime;
use tower_sessions::{
    session::{Id, Record},
    session_store::{self, SessionStore},
    Expiry, MemoryStore, Session,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{csrf, repo_types::User, services::IdentityResolver},
    error::{AppError, AppResult},
    storage::{self, Item},
};

pub const USER_ID_KEY: &str = "user_id";
pub const CSRF_TOKEN_KEY: &str = "csrf_token";
pub const OAUTH_STATE_KEY: &str = "oauth_state";

fn session_err(e: tower_sessions::session::Error) -> AppError {
    AppError::UpstreamUnavailable(format!("session store: {e}"))
}

/// Binds sessions to principals and owns everything kept inside a session.
///
/// Every write stamps a fixed expiry of `ttl` from now. Reads never extend it.
#[derive(Clone)]
pub struct SessionManager {
    identity: IdentityResolver,
    ttl: time::Duration,
}

impl SessionManager {
    pub fn new(identity: IdentityResolver, ttl_hours: i64) -> Self {
        Self {
            identity,
            ttl: time::Duration::hours(ttl_hours),
        }
    }

    fn stamp_expiry(&self, session: &Session) {
        session.set_expiry(Some(Expiry::AtDateTime(
            OffsetDateTime::now_utc() + self.ttl,
        )));
    }

    /// Rotates the session id, drops stale CSRF/OAuth state and binds `user`.
    /// Returns the freshly issued CSRF token.
    pub async fn start(&self, session: &Session, user_id: Uuid) -> AppResult<String> {
        session.cycle_id().await.map_err(session_err)?;
        session
            .remove_value(CSRF_TOKEN_KEY)
            .await
            .map_err(session_err)?;
        session
            .remove_value(OAUTH_STATE_KEY)
            .await
            .map_err(session_err)?;
        session
            .insert(USER_ID_KEY, user_id)
            .await
            .map_err(session_err)?;

        let token = csrf::generate_token();
        session
            .insert(CSRF_TOKEN_KEY, &token)
            .await
            .map_err(session_err)?;
        self.stamp_expiry(session);

        info!(%user_id, "session started");
        Ok(token)
    }

    /// The user bound to this session, re-read from the store on every call.
    pub async fn current_principal(&self, session: &Session) -> AppResult<Option<User>> {
        let Some(user_id) = session
            .get::<Uuid>(USER_ID_KEY)
            .await
            .map_err(session_err)?
        else {
            return Ok(None);
        };

        let user = self.identity.find_by_id(user_id).await?;
        if user.is_none() {
            warn!(%user_id, "session references a missing user");
        }
        Ok(user)
    }

    /// Deletes the server-side record; the layer expires the cookie.
    pub async fn end(&self, session: &Session) -> AppResult<()> {
        session.flush().await.map_err(session_err)?;
        debug!("session ended");
        Ok(())
    }

    /// Current CSRF token, created on first use.
    pub async fn csrf_token(&self, session: &Session) -> AppResult<String> {
        if let Some(token) = session
            .get::<String>(CSRF_TOKEN_KEY)
            .await
            .map_err(session_err)?
        {
            return Ok(token);
        }
        let token = csrf::generate_token();
        session
            .insert(CSRF_TOKEN_KEY, &token)
            .await
            .map_err(session_err)?;
        self.stamp_expiry(session);
        Ok(token)
    }

    pub async fn set_oauth_state(&self, session: &Session, state: &str) -> AppResult<()> {
        session
            .insert(OAUTH_STATE_KEY, state)
            .await
            .map_err(session_err)?;
        self.stamp_expiry(session);
        Ok(())
    }

    /// Pending OAuth state; consumed so a callback can be used once.
    pub async fn take_oauth_state(&self, session: &Session) -> AppResult<Option<String>> {
        let state = session
            .remove::<String>(OAUTH_STATE_KEY)
            .await
            .map_err(session_err)?;
        if state.is_some() {
            self.stamp_expiry(session);
        }
        Ok(state)
    }
}

/// Session record storage selected by `SESSION_STORE`.
#[derive(Debug, Clone)]
pub enum SessionBackend {
    Memory(MemoryStore),
    Dynamo(DynamoSessionStore),
}

#[async_trait]
impl SessionStore for SessionBackend {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        match self {
            SessionBackend::Memory(s) => s.create(record).await,
            SessionBackend::Dynamo(s) => s.create(record).await,
        }
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        match self {
            SessionBackend::Memory(s) => s.save(record).await,
            SessionBackend::Dynamo(s) => s.save(record).await,
        }
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        match self {
            SessionBackend::Memory(s) => s.load(session_id).await,
            SessionBackend::Dynamo(s) => s.load(session_id).await,
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        match self {
            SessionBackend::Memory(s) => s.delete(session_id).await,
            SessionBackend::Dynamo(s) => s.delete(session_id).await,
        }
    }
}

/// One item per session: `id` (partition key), `data` (JSON), `expiresAt`
/// (epoch seconds, usable as the table's TTL attribute).
#[derive(Debug, Clone)]
pub struct DynamoSessionStore {
    client: Client,
    table: String,
}

impl DynamoSessionStore {
    pub fn new(client: Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }

    async fn put(&self, record: &Record, only_new: bool) -> Result<bool, session_store::Error> {
        let item = record_to_item(record)?;
        let mut req = self
            .client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item));
        if only_new {
            req = req.condition_expression("attribute_not_exists(id)");
        }
        match req.send().await {
            Ok(_) => Ok(true),
            Err(err)
                if only_new
                    && err
                        .as_service_error()
                        .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(backend(
                anyhow::Error::new(err).context("dynamodb put_item sessions"),
            )),
        }
    }
}

fn backend(e: anyhow::Error) -> session_store::Error {
    session_store::Error::Backend(format!("{e:#}"))
}

fn record_to_item(record: &Record) -> session_store::Result<Item> {
    let data = serde_json::to_string(&record.data)
        .map_err(|e| session_store::Error::Encode(e.to_string()))?;
    let mut item = Item::new();
    item.insert("id".into(), storage::s(record.id.to_string()));
    item.insert("data".into(), storage::s(data));
    item.insert(
        "expiresAt".into(),
        storage::n(record.expiry_date.unix_timestamp()),
    );
    Ok(item)
}

/// `None` once the record is past its expiry, even if DynamoDB has not reaped it yet.
fn record_from_item(item: &Item, now: OffsetDateTime) -> session_store::Result<Option<Record>> {
    let decode = |e: anyhow::Error| session_store::Error::Decode(format!("{e:#}"));

    let expires_at: i64 = storage::get_n(item, "expiresAt").map_err(decode)?;
    let expiry_date = OffsetDateTime::from_unix_timestamp(expires_at)
        .context("expiresAt out of range")
        .map_err(decode)?;
    if expiry_date <= now {
        return Ok(None);
    }

    let id: Id = storage::get_s(item, "id")
        .map_err(decode)?
        .parse()
        .map_err(|e| session_store::Error::Decode(format!("session id: {e}")))?;
    let raw = storage::get_s(item, "data").map_err(decode)?;
    let data: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)
        .map_err(|e| session_store::Error::Decode(e.to_string()))?;

    Ok(Some(Record {
        id,
        data,
        expiry_date,
    }))
}

#[async_trait]
impl SessionStore for DynamoSessionStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        while !self.put(record, true).await? {
            debug!("session id collision, regenerating");
            record.id = Id::default();
        }
        Ok(())
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.put(record, false).await.map(|_| ())
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let out = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", storage::s(session_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .context("dynamodb get_item sessions")
            .map_err(backend)?;
        match out.item() {
            Some(item) => record_from_item(item, OffsetDateTime::now_utc()),
            None => Ok(None),
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("id", storage::s(session_id.to_string()))
            .send()
            .await
            .context("dynamodb delete_item sessions")
            .map_err(backend)?;
        Ok(())
    }
}
