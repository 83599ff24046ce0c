use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{
    normalize_id, Block, DatabaseSchema, DatabaseSummary, PageBody, PageSummary, PropertyValue,
    Record,
};
use crate::notion::convert::{block_from_json, block_to_json, kind_from_json, kind_to_json};
use crate::notion::convert::{plain_rich_text, plain_text, value_from_json, value_to_json};
use crate::notion::model::{CreatedObject, ListResp, PageResp, RetrieveDatabaseResp};
use crate::reconcile::{DatabaseDraft, PageDraft, PageMetadata, SchemaPatch};

pub mod convert;
pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";

/// Notion caps list payloads (children, page size) at 100 entries.
const MAX_BATCH: usize = 100;

/// Everything the engine needs from the remote workspace. Implemented by
/// [`NotionClient`] and by in-memory fakes in tests.
#[async_trait]
pub trait WorkspaceService: Send + Sync {
    async fn list_databases(&self, parent_page_id: &str) -> Result<Vec<DatabaseSummary>>;

    async fn get_database_schema(&self, database_id: &str) -> Result<DatabaseSchema>;

    async fn create_database(&self, draft: &DatabaseDraft) -> Result<String>;

    async fn patch_database_properties(&self, database_id: &str, patch: &SchemaPatch)
        -> Result<()>;

    async fn list_records(&self, database_id: &str) -> Result<Vec<Record>>;

    /// `None` when the record no longer exists.
    async fn get_record(&self, record_id: &str) -> Result<Option<Record>>;

    async fn create_record(
        &self,
        database_id: &str,
        properties: &[(String, PropertyValue)],
    ) -> Result<String>;

    async fn update_record(
        &self,
        record_id: &str,
        properties: &[(String, PropertyValue)],
    ) -> Result<()>;

    async fn list_pages(&self, parent_page_id: &str) -> Result<Vec<PageSummary>>;

    async fn get_page_body(&self, page_id: &str) -> Result<PageBody>;

    async fn create_page(&self, draft: &PageDraft, blocks: &[Block]) -> Result<String>;

    async fn replace_page_body(&self, page_id: &str, blocks: &[Block]) -> Result<()>;

    async fn update_page_metadata(&self, page_id: &str, metadata: &PageMetadata) -> Result<()>;
}

/// Non-success answer from the Notion API after retries.
#[derive(Debug, Error)]
#[error("notion error {status}: {body}")]
pub struct NotionApiError {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (0-based) when the server gave no
    /// `Retry-After`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(500).saturating_mul(2u32.saturating_pow(attempt));
        base.min(self.max_backoff)
    }
}

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
    retry: RetryPolicy,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn new(token: String, version: String) -> Result<Self> {
        let base_url = Url::parse(NOTION_API_BASE).context("invalid default Notion URL")?;
        Self::with_base_url(token, version, base_url)
    }

    pub fn with_base_url(token: String, version: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("notion-sync/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            token,
            version,
            retry: RetryPolicy::default(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = match &cfg.notion.base_url {
            Some(url) => Url::parse(url).context("invalid notion.base_url")?,
            None => Url::parse(NOTION_API_BASE).context("invalid default Notion URL")?,
        };
        let client =
            Self::with_base_url(cfg.notion.token.clone(), cfg.notion.version.clone(), base_url)?;
        Ok(client.with_retry(RetryPolicy {
            max_retries: cfg.notion.max_retries,
            max_backoff: Duration::from_secs(cfg.notion.max_backoff_seconds),
        }))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid Notion base URL")?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        builder.build().context("failed to build Notion request")
    }

    /// Send with retry on 429 and 5xx, honoring `Retry-After`.
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            let request = self.build_request(method.clone(), path, body)?;
            debug!(method = %request.method(), url = %request.url(), payload = ?body, "notion request");
            let res = self
                .http
                .execute(request)
                .await
                .context("failed to reach Notion")?;
            let status = res.status();
            if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                && attempt < self.retry.max_retries
            {
                let wait = res
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .map(|secs| Duration::from_secs(secs).min(self.retry.max_backoff))
                    .unwrap_or_else(|| self.retry.backoff(attempt));
                warn!(%status, attempt, wait_ms = wait.as_millis() as u64, "notion throttled or unavailable, retrying");
                sleep(wait).await;
                attempt += 1;
                continue;
            }
            if !status.is_success() {
                let body = res.text().await.unwrap_or_default();
                return Err(NotionApiError {
                    status: status.as_u16(),
                    body,
                }
                .into());
            }
            return res
                .json::<Value>()
                .await
                .context("invalid Notion response JSON");
        }
    }

    async fn send_as<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let value = self.send(method, path, body).await?;
        serde_json::from_value(value).with_context(|| format!("unexpected response shape from {path}"))
    }

    /// Collect every result of a cursor-paginated endpoint. POST endpoints
    /// take the cursor in the body, GET endpoints in the query string.
    async fn paginate(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: ListResp = match &body {
                Some(body) => {
                    let mut payload = body.as_object().cloned().unwrap_or_default();
                    payload.insert("page_size".into(), json!(MAX_BATCH));
                    if let Some(c) = &cursor {
                        payload.insert("start_cursor".into(), json!(c));
                    }
                    self.send_as(method.clone(), path, Some(&Value::Object(payload)))
                        .await?
                }
                None => {
                    let mut url = format!("{path}?page_size={MAX_BATCH}");
                    if let Some(c) = &cursor {
                        url.push_str("&start_cursor=");
                        url.push_str(c);
                    }
                    self.send_as(method.clone(), &url, None).await?
                }
            };
            out.extend(page.results);
            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }

    async fn retrieve_page(&self, page_id: &str) -> Result<PageResp> {
        self.send_as(Method::GET, &format!("v1/pages/{page_id}"), None)
            .await
    }

    async fn append_children(&self, block_id: &str, blocks: &[Block]) -> Result<()> {
        for chunk in blocks.chunks(MAX_BATCH) {
            let body = build_append_children_request(chunk);
            self.send(
                Method::PATCH,
                &format!("v1/blocks/{block_id}/children"),
                Some(&body),
            )
            .await?;
        }
        Ok(())
    }

    async fn children(&self, block_id: &str) -> Result<Vec<Value>> {
        self.paginate(Method::GET, &format!("v1/blocks/{block_id}/children"), None)
            .await
    }
}

fn record_from_page(page: &PageResp) -> Record {
    let properties: BTreeMap<String, PropertyValue> = page
        .properties
        .iter()
        .filter_map(|(name, v)| value_from_json(v).map(|pv| (name.clone(), pv)))
        .collect();
    Record {
        id: page.id.clone(),
        properties,
    }
}

#[async_trait]
impl WorkspaceService for NotionClient {
    async fn list_databases(&self, parent_page_id: &str) -> Result<Vec<DatabaseSummary>> {
        let results = self
            .paginate(
                Method::POST,
                "v1/search",
                Some(json!({ "filter": { "property": "object", "value": "database" } })),
            )
            .await?;
        let parent = normalize_id(parent_page_id);
        let mut out = Vec::new();
        for r in results {
            if r["archived"].as_bool().unwrap_or(false) || r["in_trash"].as_bool().unwrap_or(false)
            {
                continue;
            }
            let page_id = r["parent"]["page_id"].as_str();
            if page_id.map(normalize_id).as_deref() != Some(parent.as_str()) {
                continue;
            }
            let Some(id) = r["id"].as_str() else { continue };
            out.push(DatabaseSummary {
                id: id.to_string(),
                title: plain_text(r["title"].as_array().map(Vec::as_slice).unwrap_or_default()),
                parent_page_id: page_id.map(str::to_string),
            });
        }
        debug!(parent = %parent_page_id, count = out.len(), "listed databases");
        Ok(out)
    }

    async fn get_database_schema(&self, database_id: &str) -> Result<DatabaseSchema> {
        let db: RetrieveDatabaseResp = self
            .send_as(Method::GET, &format!("v1/databases/{database_id}"), None)
            .await
            .with_context(|| format!("failed to retrieve database {database_id}"))?;
        Ok(DatabaseSchema {
            id: db.id,
            title: plain_text(&db.title),
            properties: db
                .properties
                .iter()
                .map(|(name, v)| (name.clone(), kind_from_json(v)))
                .collect(),
        })
    }

    async fn create_database(&self, draft: &DatabaseDraft) -> Result<String> {
        let body = build_create_database_request(draft);
        let created: CreatedObject = self.send_as(Method::POST, "v1/databases", Some(&body)).await?;
        info!(title = %draft.title, id = %created.id, "created database");
        Ok(created.id)
    }

    async fn patch_database_properties(
        &self,
        database_id: &str,
        patch: &SchemaPatch,
    ) -> Result<()> {
        let body = build_patch_database_request(patch);
        self.send(
            Method::PATCH,
            &format!("v1/databases/{database_id}"),
            Some(&body),
        )
        .await?;
        Ok(())
    }

    async fn list_records(&self, database_id: &str) -> Result<Vec<Record>> {
        let results = self
            .paginate(
                Method::POST,
                &format!("v1/databases/{database_id}/query"),
                Some(json!({})),
            )
            .await?;
        results
            .into_iter()
            .map(|r| {
                let page: PageResp =
                    serde_json::from_value(r).context("unexpected record shape")?;
                Ok(record_from_page(&page))
            })
            .collect()
    }

    async fn get_record(&self, record_id: &str) -> Result<Option<Record>> {
        match self.retrieve_page(record_id).await {
            Ok(page) if page.archived || page.in_trash => Ok(None),
            Ok(page) => Ok(Some(record_from_page(&page))),
            Err(err)
                if err
                    .downcast_ref::<NotionApiError>()
                    .is_some_and(|e| e.status == 404) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn create_record(
        &self,
        database_id: &str,
        properties: &[(String, PropertyValue)],
    ) -> Result<String> {
        let body = build_create_record_request(database_id, properties);
        let created: CreatedObject = self.send_as(Method::POST, "v1/pages", Some(&body)).await?;
        Ok(created.id)
    }

    async fn update_record(
        &self,
        record_id: &str,
        properties: &[(String, PropertyValue)],
    ) -> Result<()> {
        let body = json!({ "properties": properties_json(properties) });
        self.send(Method::PATCH, &format!("v1/pages/{record_id}"), Some(&body))
            .await?;
        Ok(())
    }

    async fn list_pages(&self, parent_page_id: &str) -> Result<Vec<PageSummary>> {
        let mut out = Vec::new();
        for child in self.children(parent_page_id).await? {
            if child["type"] != "child_page" {
                continue;
            }
            let Some(id) = child["id"].as_str() else { continue };
            let page = self.retrieve_page(id).await?;
            if page.archived || page.in_trash {
                continue;
            }
            out.push(PageSummary {
                id: id.to_string(),
                parent_page_id: parent_page_id.to_string(),
                title: child["child_page"]["title"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
                icon: page.icon_emoji(),
                cover_url: page.cover_url(),
            });
        }
        Ok(out)
    }

    async fn get_page_body(&self, page_id: &str) -> Result<PageBody> {
        let mut body = PageBody::default();
        for child in self.children(page_id).await? {
            let rows = match (child["type"].as_str(), child["id"].as_str()) {
                (Some("table"), Some(id)) if child["has_children"].as_bool().unwrap_or(false) => {
                    self.children(id).await?
                }
                _ => Vec::new(),
            };
            match block_from_json(&child, &rows) {
                Some(block) => body.blocks.push(block),
                None => body.unsupported += 1,
            }
        }
        Ok(body)
    }

    async fn create_page(&self, draft: &PageDraft, blocks: &[Block]) -> Result<String> {
        let split = blocks.len().min(MAX_BATCH);
        let body = build_create_page_request(draft, &blocks[..split]);
        let created: CreatedObject = self.send_as(Method::POST, "v1/pages", Some(&body)).await?;
        self.append_children(&created.id, &blocks[split..]).await?;
        info!(title = %draft.title, id = %created.id, blocks = blocks.len(), "created page");
        Ok(created.id)
    }

    async fn replace_page_body(&self, page_id: &str, blocks: &[Block]) -> Result<()> {
        for child in self.children(page_id).await? {
            if child["type"] == "child_page" || child["type"] == "child_database" {
                continue;
            }
            if let Some(id) = child["id"].as_str() {
                self.send(Method::DELETE, &format!("v1/blocks/{id}"), None)
                    .await?;
            }
        }
        self.append_children(page_id, blocks).await
    }

    async fn update_page_metadata(&self, page_id: &str, metadata: &PageMetadata) -> Result<()> {
        let body = build_page_metadata_request(metadata);
        self.send(Method::PATCH, &format!("v1/pages/{page_id}"), Some(&body))
            .await?;
        Ok(())
    }
}

fn title_rich_text(title: &str) -> Value {
    Value::Array(plain_rich_text(title))
}

fn properties_json(properties: &[(String, PropertyValue)]) -> Value {
    let mut out = Map::new();
    for (name, value) in properties {
        out.insert(name.clone(), value_to_json(value));
    }
    Value::Object(out)
}

fn metadata_fields(out: &mut Map<String, Value>, icon: Option<&str>, cover_url: Option<&str>) {
    if let Some(icon) = icon {
        out.insert("icon".into(), json!({ "type": "emoji", "emoji": icon }));
    }
    if let Some(url) = cover_url {
        out.insert(
            "cover".into(),
            json!({ "type": "external", "external": { "url": url } }),
        );
    }
}

pub fn build_create_database_request(draft: &DatabaseDraft) -> Value {
    let mut properties = Map::new();
    for (name, kind) in &draft.properties {
        properties.insert(name.clone(), kind_to_json(kind));
    }
    json!({
        "parent": { "type": "page_id", "page_id": draft.parent_page_id },
        "title": title_rich_text(&draft.title),
        "properties": Value::Object(properties),
    })
}

/// Upserts carry the full property config, renames only a new name, and
/// removals are `null`.
pub fn build_patch_database_request(patch: &SchemaPatch) -> Value {
    let mut properties = Map::new();
    for (from, to) in &patch.renames {
        properties.insert(from.clone(), json!({ "name": to }));
    }
    for up in &patch.upserts {
        properties.insert(up.name.clone(), kind_to_json(&up.kind));
    }
    for name in &patch.removals {
        properties.insert(name.clone(), Value::Null);
    }
    json!({ "properties": Value::Object(properties) })
}

pub fn build_create_record_request(
    database_id: &str,
    properties: &[(String, PropertyValue)],
) -> Value {
    json!({
        "parent": { "database_id": database_id },
        "properties": properties_json(properties),
    })
}

pub fn build_create_page_request(draft: &PageDraft, blocks: &[Block]) -> Value {
    let mut body = Map::new();
    body.insert(
        "parent".into(),
        json!({ "type": "page_id", "page_id": draft.parent_page_id }),
    );
    body.insert(
        "properties".into(),
        json!({ "title": { "title": title_rich_text(&draft.title) } }),
    );
    metadata_fields(&mut body, draft.icon.as_deref(), draft.cover_url.as_deref());
    body.insert(
        "children".into(),
        Value::Array(blocks.iter().map(block_to_json).collect()),
    );
    Value::Object(body)
}

pub fn build_page_metadata_request(metadata: &PageMetadata) -> Value {
    let mut body = Map::new();
    metadata_fields(
        &mut body,
        metadata.icon.as_deref(),
        metadata.cover_url.as_deref(),
    );
    Value::Object(body)
}

pub fn build_append_children_request(blocks: &[Block]) -> Value {
    json!({ "children": blocks.iter().map(block_to_json).collect::<Vec<_>>() })
}
