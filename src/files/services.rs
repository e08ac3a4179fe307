use std::{future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{NewFile, SaveFileRequest},
    repo::FileStore,
    repo_types::FileRecord,
};
use crate::error::{AppError, AppResult};

pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

const ALLOWED_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
];

pub const NOT_FOUND_OR_FOREIGN: &str = "File not found or unauthorized";

fn non_empty_str(v: Option<Value>) -> Option<String> {
    match v {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    }
}

pub fn validate_upload(req: SaveFileRequest) -> AppResult<NewFile> {
    let slide_id = match req.slide_id {
        Some(Value::String(s)) if !s.is_empty() => s,
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        _ => return Err(AppError::validation("Slide ID is required")),
    };

    let name = non_empty_str(req.name)
        .ok_or_else(|| AppError::validation("Valid file name is required"))?;

    let size = req
        .size
        .as_ref()
        .and_then(Value::as_u64)
        .filter(|s| *s > 0)
        .ok_or_else(|| AppError::validation("Valid file size is required"))?;
    if size > MAX_FILE_SIZE {
        return Err(AppError::validation("File size exceeds 10MB limit"));
    }

    let mime_type = non_empty_str(req.mime_type)
        .ok_or_else(|| AppError::validation("Valid file type is required"))?;
    if !ALLOWED_TYPES.contains(&mime_type.as_str()) {
        return Err(AppError::validation(
            "File type not allowed. Allowed types: images, PDF, Word documents, and text files",
        ));
    }

    let data = non_empty_str(req.data)
        .ok_or_else(|| AppError::validation("Valid file data is required"))?;

    Ok(NewFile {
        slide_id,
        name,
        size,
        mime_type,
        data,
    })
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn FileStore>,
    timeout: Duration,
}

impl FileService {
    pub fn new(store: Arc<dyn FileStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(AppError::UpstreamUnavailable(format!("{op}: {e:#}"))),
            Err(_) => Err(AppError::UpstreamUnavailable(format!(
                "{op} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    #[instrument(skip(self, input), fields(slide_id = %input.slide_id, size = input.size))]
    pub async fn save(&self, user_id: Uuid, input: NewFile) -> AppResult<FileRecord> {
        let file = FileRecord {
            file_id: Uuid::new_v4(),
            user_id,
            slide_id: input.slide_id,
            name: input.name,
            size: input.size,
            mime_type: input.mime_type,
            data: input.data,
            uploaded_at: OffsetDateTime::now_utc(),
        };
        self.call("put file", self.store.put(&file)).await?;
        info!(file_id = %file.file_id, "file saved");
        Ok(file)
    }

    pub async fn list(&self, user_id: Uuid) -> AppResult<Vec<FileRecord>> {
        self.call("list files", self.store.list_by_user(user_id))
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, file_id: Uuid) -> AppResult<()> {
        if self
            .call("delete file", self.store.delete_owned(file_id, user_id))
            .await?
        {
            Ok(())
        } else {
            warn!("delete of missing or foreign file");
            Err(AppError::NotFound(NOT_FOUND_OR_FOREIGN.into()))
        }
    }
}
