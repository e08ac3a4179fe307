use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::files::repo_types::FileRecord;
use crate::storage::{self, Item};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn put(&self, file: &FileRecord) -> anyhow::Result<()>;
    async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<FileRecord>>;
    /// Deletes only when `user_id` owns the file. `false` if it is missing or foreign.
    async fn delete_owned(&self, file_id: Uuid, user_id: Uuid) -> anyhow::Result<bool>;
}

#[derive(Default)]
pub struct MemoryFileStore {
    files: RwLock<HashMap<Uuid, FileRecord>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn put(&self, file: &FileRecord) -> anyhow::Result<()> {
        self.files.write().await.insert(file.file_id, file.clone());
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<FileRecord>> {
        let mut out: Vec<FileRecord> = self
            .files
            .read()
            .await
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|f| f.uploaded_at);
        Ok(out)
    }

    async fn delete_owned(&self, file_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let mut files = self.files.write().await;
        match files.get(&file_id) {
            Some(f) if f.user_id == user_id => {
                files.remove(&file_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Partition key `fileId`; GSI `UserIdIndex` on `userId`.
#[derive(Clone)]
pub struct DynamoFileStore {
    client: Client,
    table: String,
}

const USER_ID_INDEX: &str = "UserIdIndex";

impl DynamoFileStore {
    pub fn new(client: Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

fn file_to_item(f: &FileRecord) -> anyhow::Result<Item> {
    let mut item = Item::new();
    item.insert("fileId".into(), storage::s(f.file_id.to_string()));
    item.insert("userId".into(), storage::s(f.user_id.to_string()));
    item.insert("slideId".into(), storage::s(&f.slide_id));
    item.insert("name".into(), storage::s(&f.name));
    item.insert("size".into(), storage::n(f.size));
    item.insert("type".into(), storage::s(&f.mime_type));
    item.insert("data".into(), storage::s(&f.data));
    item.insert("uploadedAt".into(), storage::ts(f.uploaded_at)?);
    Ok(item)
}

fn file_from_item(item: &Item) -> anyhow::Result<FileRecord> {
    Ok(FileRecord {
        file_id: storage::get_s(item, "fileId")?
            .parse()
            .context("fileId is not a uuid")?,
        user_id: storage::get_s(item, "userId")?
            .parse()
            .context("userId is not a uuid")?,
        slide_id: storage::get_s(item, "slideId")?,
        name: storage::get_s(item, "name")?,
        size: storage::get_n(item, "size")?,
        mime_type: storage::get_s(item, "type")?,
        data: storage::get_s(item, "data")?,
        uploaded_at: storage::get_ts(item, "uploadedAt")?,
    })
}

#[async_trait]
impl FileStore for DynamoFileStore {
    async fn put(&self, file: &FileRecord) -> anyhow::Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(file_to_item(file)?))
            .send()
            .await
            .context("dynamodb put_item files")?;
        Ok(())
    }

    async fn list_by_user(&self, user_id: Uuid) -> anyhow::Result<Vec<FileRecord>> {
        let mut out = Vec::new();
        let mut start_key = None;
        loop {
            let page = self
                .client
                .query()
                .table_name(&self.table)
                .index_name(USER_ID_INDEX)
                .key_condition_expression("userId = :userId")
                .expression_attribute_values(":userId", storage::s(user_id.to_string()))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .context("dynamodb query files by user")?;
            for item in page.items() {
                out.push(file_from_item(item)?);
            }
            match page.last_evaluated_key() {
                Some(key) => start_key = Some(key.clone()),
                None => break,
            }
        }
        out.sort_by_key(|f| f.uploaded_at);
        Ok(out)
    }

    async fn delete_owned(&self, file_id: Uuid, user_id: Uuid) -> anyhow::Result<bool> {
        let res = self
            .client
            .delete_item()
            .table_name(&self.table)
            .key("fileId", storage::s(file_id.to_string()))
            .condition_expression("userId = :userId")
            .expression_attribute_values(":userId", storage::s(user_id.to_string()))
            .send()
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_conditional_check_failed_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(anyhow::Error::new(err).context("dynamodb delete_item files")),
        }
    }
}
