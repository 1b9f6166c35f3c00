//! # Task Payloads
//!
//! Typed bodies for the five pipeline stages. The orchestration layer treats
//! payloads as opaque JSON; these types exist for producers and handlers that
//! want compile-time field checking.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::subjects::TaskKind;

/// Binds a payload type to its subject
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync {
    const KIND: TaskKind;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RssFetchTask {
    pub url: String,
    #[serde(alias = "source_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskPayload for RssFetchTask {
    const KIND: TaskKind = TaskKind::RssFetch;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleFetchTask {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl TaskPayload for ArticleFetchTask {
    const KIND: TaskKind = TaskKind::ArticleFetch;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizeTask {
    pub title: String,
    pub url: String,
    /// Kept as the producer sent it; feeds disagree on date formats
    pub published_at: String,
    /// Object-store key of the extracted article body
    pub content_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl TaskPayload for SummarizeTask {
    const KIND: TaskKind = TaskKind::Summarize;
}

/// Article ids arrive as numbers from the database and as strings from the API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArticleId {
    Numeric(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankTask {
    pub article_id: ArticleId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl TaskPayload for RankTask {
    const KIND: TaskKind = TaskKind::Rank;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareTask {
    pub article_title: String,
    pub article_url: String,
}

impl TaskPayload for ShareTask {
    const KIND: TaskKind = TaskKind::Share;
}
