use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::{
    error::ProvideErrorMetadata,
    operation::transact_write_items::TransactWriteItemsError,
    types::{Put, ReturnValue, TransactWriteItem},
    Client,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::{AuthProvider, User, UserChanges};
use crate::storage::{self, Item};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A conditional write lost: the key it guards already exists.
    #[error("conditional write failed")]
    Conflict,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Credential store. `insert` must enforce email uniqueness atomically.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert(&self, user: &User) -> Result<(), StoreError>;
    async fn get(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Returns the updated record, `None` if the user does not exist.
    async fn update(&self, user_id: Uuid, changes: UserChanges)
        -> Result<Option<User>, StoreError>;
}

// ---- in-process store ----

#[derive(Default)]
struct MemoryUsers {
    by_id: HashMap<Uuid, User>,
    by_email: HashMap<String, Uuid>,
}

/// Map-backed store used by tests and `STORE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<MemoryUsers>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.by_email.contains_key(&user.email) || inner.by_id.contains_key(&user.user_id) {
            return Err(StoreError::Conflict);
        }
        inner.by_email.insert(user.email.clone(), user.user_id);
        inner.by_id.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.inner.read().await.by_id.get(&user_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_email
            .get(email)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn update(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(inner.by_id.get_mut(&user_id).map(|user| {
            changes.apply(user);
            user.clone()
        }))
    }
}

// ---- DynamoDB ----

/// Users live in `users_table` (partition key `userId`). Each email has a guard item in
/// `emails_table` (partition key `email`, attribute `userId`) written in the same
/// transaction as the user. The guard holds uniqueness and serves email lookups with
/// strongly consistent reads.
#[derive(Clone)]
pub struct DynamoUserStore {
    client: Client,
    users_table: String,
    emails_table: String,
}

impl DynamoUserStore {
    pub fn new(client: Client, users_table: &str, emails_table: &str) -> Self {
        Self {
            client,
            users_table: users_table.to_string(),
            emails_table: emails_table.to_string(),
        }
    }
}

fn user_to_item(user: &User) -> anyhow::Result<Item> {
    let mut item = Item::new();
    item.insert("userId".into(), storage::s(user.user_id.to_string()));
    item.insert("email".into(), storage::s(&user.email));
    item.insert("username".into(), storage::s(&user.username));
    item.insert("firstName".into(), storage::s(&user.first_name));
    item.insert("lastName".into(), storage::s(&user.last_name));
    item.insert("displayName".into(), storage::s(&user.display_name));
    item.insert(
        "password".into(),
        storage::opt_s(user.password_hash.as_deref()),
    );
    item.insert("provider".into(), storage::s(user.provider.as_str()));
    item.insert("photo".into(), storage::opt_s(user.photo.as_deref()));
    item.insert("createdAt".into(), storage::ts(user.created_at)?);
    item.insert("updatedAt".into(), storage::ts(user.updated_at)?);
    Ok(item)
}

fn user_from_item(item: &Item) -> anyhow::Result<User> {
    let raw_provider = storage::get_s(item, "provider")?;
    Ok(User {
        user_id: storage::get_s(item, "userId")?
            .parse()
            .context("userId is not a uuid")?,
        email: storage::get_s(item, "email")?,
        username: storage::get_s(item, "username")?,
        first_name: storage::get_opt_s(item, "firstName").unwrap_or_default(),
        last_name: storage::get_opt_s(item, "lastName").unwrap_or_default(),
        display_name: storage::get_opt_s(item, "displayName").unwrap_or_default(),
        password_hash: storage::get_opt_s(item, "password"),
        provider: AuthProvider::parse(&raw_provider)
            .with_context(|| format!("unknown provider `{raw_provider}`"))?,
        photo: storage::get_opt_s(item, "photo"),
        created_at: storage::get_ts(item, "createdAt")?,
        updated_at: storage::get_ts(item, "updatedAt")?,
    })
}

#[async_trait]
impl UserStore for DynamoUserStore {
    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let guard = Put::builder()
            .table_name(&self.emails_table)
            .item("email", storage::s(&user.email))
            .item("userId", storage::s(user.user_id.to_string()))
            .condition_expression("attribute_not_exists(email)")
            .build()
            .context("build email guard put")?;
        let record = Put::builder()
            .table_name(&self.users_table)
            .set_item(Some(user_to_item(user)?))
            .condition_expression("attribute_not_exists(userId)")
            .build()
            .context("build user put")?;

        let res = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(guard).build())
            .transact_items(TransactWriteItem::builder().put(record).build())
            .send()
            .await;

        let err = match res {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };
        let conflict = matches!(
            err.as_service_error(),
            Some(TransactWriteItemsError::TransactionCanceledException(cancel))
                if cancel
                    .cancellation_reasons()
                    .iter()
                    .any(|r| r.code() == Some("ConditionalCheckFailed"))
        );
        if conflict {
            return Err(StoreError::Conflict);
        }
        Err(StoreError::Backend(
            anyhow::Error::new(err).context("dynamodb transact_write_items users"),
        ))
    }

    async fn get(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.users_table)
            .key("userId", storage::s(user_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .context("dynamodb get_item users")?;
        Ok(out.item().map(user_from_item).transpose()?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let out = self
            .client
            .get_item()
            .table_name(&self.emails_table)
            .key("email", storage::s(email))
            .consistent_read(true)
            .send()
            .await
            .context("dynamodb get_item user emails")?;
        let Some(guard) = out.item() else {
            return Ok(None);
        };
        let user_id: Uuid = storage::get_s(guard, "userId")?
            .parse()
            .context("email guard userId is not a uuid")?;
        self.get(user_id).await
    }

    async fn update(
        &self,
        user_id: Uuid,
        changes: UserChanges,
    ) -> Result<Option<User>, StoreError> {
        let mut sets = vec!["updatedAt = :updatedAt".to_string()];
        let mut req = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("userId", storage::s(user_id.to_string()))
            .condition_expression("attribute_exists(userId)")
            .expression_attribute_values(":updatedAt", storage::ts(changes.updated_at)?)
            .return_values(ReturnValue::AllNew);
        if let Some(provider) = changes.provider {
            sets.push("#provider = :provider".into());
            req = req
                .expression_attribute_names("#provider", "provider")
                .expression_attribute_values(":provider", storage::s(provider.as_str()));
        }
        if let Some(photo) = &changes.photo {
            sets.push("photo = :photo".into());
            req = req.expression_attribute_values(":photo", storage::s(photo));
        }

        match req.update_expression(format!("SET {}", sets.join(", "))).send().await {
            Ok(out) => Ok(out.attributes().map(user_from_item).transpose()?),
            Err(err) if err.code() == Some("ConditionalCheckFailedException") => Ok(None),
            Err(err) => Err(StoreError::Backend(
                anyhow::Error::new(err).context("dynamodb update_item users"),
            )),
        }
    }
}
