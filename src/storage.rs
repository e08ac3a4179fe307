use std::collections::HashMap;

use anyhow::Context;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_dynamodb::{
    config::{Builder as DynamoConfigBuilder, Region},
    types::AttributeValue,
    Client,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::config::DynamoConfig;

pub type Item = HashMap<String, AttributeValue>;

/// Builds a DynamoDB client. A custom endpoint (DynamoDB Local, LocalStack) gets static
/// credentials so the default provider chain is not consulted.
pub async fn dynamo_client(cfg: &DynamoConfig) -> Client {
    let mut loader = defaults(BehaviorVersion::latest()).region(Region::new(cfg.region.clone()));
    if let Some(endpoint) = &cfg.endpoint {
        loader = loader
            .endpoint_url(endpoint)
            .credentials_provider(Credentials::new("local", "local", None, None, "static"));
    }
    let shared = loader.load().await;

    let mut conf = DynamoConfigBuilder::from(&shared);
    if let Some(endpoint) = &cfg.endpoint {
        conf = conf.endpoint_url(endpoint);
    }
    Client::from_conf(conf.build())
}

pub fn s(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn opt_s(value: Option<&str>) -> AttributeValue {
    match value {
        Some(v) => AttributeValue::S(v.to_string()),
        None => AttributeValue::Null(true),
    }
}

pub fn n(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn ts(value: OffsetDateTime) -> anyhow::Result<AttributeValue> {
    Ok(AttributeValue::S(value.format(&Rfc3339).context("format timestamp")?))
}

pub fn get_s(item: &Item, key: &str) -> anyhow::Result<String> {
    item.get(key)
        .and_then(|v| v.as_s().ok())
        .cloned()
        .with_context(|| format!("attribute `{key}` missing or not a string"))
}

/// `None` for a missing attribute or an explicit NULL.
pub fn get_opt_s(item: &Item, key: &str) -> Option<String> {
    item.get(key).and_then(|v| v.as_s().ok()).cloned()
}

pub fn get_n<T: std::str::FromStr>(item: &Item, key: &str) -> anyhow::Result<T> {
    item.get(key)
        .and_then(|v| v.as_n().ok())
        .and_then(|v| v.parse::<T>().ok())
        .with_context(|| format!("attribute `{key}` missing or not a number"))
}

pub fn get_ts(item: &Item, key: &str) -> anyhow::Result<OffsetDateTime> {
    let raw = get_s(item, key)?;
    OffsetDateTime::parse(&raw, &Rfc3339).with_context(|| format!("parse `{key}` as rfc3339"))
}
