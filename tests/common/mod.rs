#![allow(dead_code)]

use anyhow::{anyhow, Result};
use notion_sync::model::{
    normalize_id, Block, DatabaseSchema, DatabaseSummary, PageBody, PageSummary, PropertyKind,
    PropertyValue, Record,
};
use notion_sync::notion::WorkspaceService;
use notion_sync::reconcile::{DatabaseDraft, PageDraft, PageMetadata, SchemaPatch};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub const ROOT: &str = "root-page";

#[derive(Debug, Clone)]
struct MemDatabase {
    id: String,
    parent: String,
    title: String,
    properties: Vec<(String, PropertyKind)>,
}

#[derive(Debug, Clone)]
struct MemPage {
    id: String,
    parent: String,
    title: String,
    icon: Option<String>,
    cover_url: Option<String>,
    body: PageBody,
}

#[derive(Debug, Default)]
struct State {
    databases: Vec<MemDatabase>,
    records: HashMap<String, Vec<Record>>,
    pages: Vec<MemPage>,
}

/// In-memory workspace that records every call and can be told to fail one
/// kind of call.
#[derive(Default)]
pub struct MemoryWorkspace {
    state: Mutex<State>,
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn is_write(call: &str) -> bool {
    !(call.starts_with("list_") || call.starts_with("get_"))
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    async fn call(&self, name: &str, detail: impl Into<String>) -> Result<()> {
        self.calls
            .lock()
            .await
            .push(format!("{name} {}", detail.into()));
        if self.fail_on.lock().await.as_deref() == Some(name) {
            return Err(anyhow!("injected failure in {name}"));
        }
        Ok(())
    }

    pub async fn fail_on(&self, method: &str) {
        *self.fail_on.lock().await = Some(method.to_string());
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn writes(&self) -> Vec<String> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| is_write(c))
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    pub async fn seed_database(
        &self,
        title: &str,
        properties: Vec<(&str, PropertyKind)>,
    ) -> String {
        let id = new_id();
        self.state.lock().await.databases.push(MemDatabase {
            id: id.clone(),
            parent: ROOT.to_string(),
            title: title.to_string(),
            properties: properties
                .into_iter()
                .map(|(n, k)| (n.to_string(), k))
                .collect(),
        });
        id
    }

    pub async fn seed_record(&self, database_id: &str, properties: Vec<(&str, PropertyValue)>) {
        let record = Record {
            id: new_id(),
            properties: properties
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        };
        self.state
            .lock()
            .await
            .records
            .entry(database_id.to_string())
            .or_default()
            .push(record);
    }

    pub async fn seed_page(&self, title: &str, blocks: Vec<Block>) -> String {
        let id = new_id();
        self.state.lock().await.pages.push(MemPage {
            id: id.clone(),
            parent: ROOT.to_string(),
            title: title.to_string(),
            icon: None,
            cover_url: None,
            body: PageBody {
                blocks,
                unsupported: 0,
            },
        });
        id
    }

    pub async fn schema_by_title(&self, title: &str) -> Option<DatabaseSchema> {
        let state = self.state.lock().await;
        state
            .databases
            .iter()
            .find(|d| d.title == title)
            .map(|d| DatabaseSchema {
                id: d.id.clone(),
                title: d.title.clone(),
                properties: d.properties.clone(),
            })
    }

    pub async fn records_by_title(&self, title: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        let Some(db) = state.databases.iter().find(|d| d.title == title) else {
            return Vec::new();
        };
        state.records.get(&db.id).cloned().unwrap_or_default()
    }

    pub async fn page_body(&self, title: &str) -> Option<PageBody> {
        let state = self.state.lock().await;
        state
            .pages
            .iter()
            .find(|p| p.title == title)
            .map(|p| p.body.clone())
    }
}

#[async_trait::async_trait]
impl WorkspaceService for MemoryWorkspace {
    async fn list_databases(&self, parent_page_id: &str) -> Result<Vec<DatabaseSummary>> {
        self.call("list_databases", parent_page_id).await?;
        let parent = normalize_id(parent_page_id);
        let state = self.state.lock().await;
        Ok(state
            .databases
            .iter()
            .filter(|d| normalize_id(&d.parent) == parent)
            .map(|d| DatabaseSummary {
                id: d.id.clone(),
                title: d.title.clone(),
                parent_page_id: Some(d.parent.clone()),
            })
            .collect())
    }

    async fn get_database_schema(&self, database_id: &str) -> Result<DatabaseSchema> {
        self.call("get_database_schema", database_id).await?;
        let state = self.state.lock().await;
        let db = state
            .databases
            .iter()
            .find(|d| d.id == database_id)
            .ok_or_else(|| anyhow!("no database {database_id}"))?;
        Ok(DatabaseSchema {
            id: db.id.clone(),
            title: db.title.clone(),
            properties: db.properties.clone(),
        })
    }

    async fn create_database(&self, draft: &DatabaseDraft) -> Result<String> {
        self.call("create_database", &draft.title).await?;
        let id = new_id();
        self.state.lock().await.databases.push(MemDatabase {
            id: id.clone(),
            parent: draft.parent_page_id.clone(),
            title: draft.title.clone(),
            properties: draft.properties.clone(),
        });
        Ok(id)
    }

    async fn patch_database_properties(
        &self,
        database_id: &str,
        patch: &SchemaPatch,
    ) -> Result<()> {
        self.call("patch_database_properties", database_id).await?;
        let mut state = self.state.lock().await;
        let db = state
            .databases
            .iter_mut()
            .find(|d| d.id == database_id)
            .ok_or_else(|| anyhow!("no database {database_id}"))?;
        patch.apply_to(&mut db.properties);

        // dual relations grow their back-reference on the target database
        let mut back_refs = Vec::new();
        for upsert in &patch.upserts {
            if let PropertyKind::Relation {
                database_id: target,
                synced_property_name: Some(synced),
            } = &upsert.kind
            {
                back_refs.push((target.clone(), synced.clone(), upsert.name.clone()));
            }
        }
        for (target, synced, name) in back_refs {
            if let Some(db) = state.databases.iter_mut().find(|d| d.id == target) {
                if !db.properties.iter().any(|(n, _)| *n == synced) {
                    db.properties.push((
                        synced,
                        PropertyKind::Relation {
                            database_id: database_id.to_string(),
                            synced_property_name: Some(name),
                        },
                    ));
                }
            }
        }
        Ok(())
    }

    async fn list_records(&self, database_id: &str) -> Result<Vec<Record>> {
        self.call("list_records", database_id).await?;
        let state = self.state.lock().await;
        Ok(state.records.get(database_id).cloned().unwrap_or_default())
    }

    async fn get_record(&self, record_id: &str) -> Result<Option<Record>> {
        self.call("get_record", record_id).await?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .values()
            .flatten()
            .find(|r| r.id == record_id)
            .cloned())
    }

    async fn create_record(
        &self,
        database_id: &str,
        properties: &[(String, PropertyValue)],
    ) -> Result<String> {
        self.call("create_record", database_id).await?;
        let id = new_id();
        self.state
            .lock()
            .await
            .records
            .entry(database_id.to_string())
            .or_default()
            .push(Record {
                id: id.clone(),
                properties: properties.iter().cloned().collect(),
            });
        Ok(id)
    }

    async fn update_record(
        &self,
        record_id: &str,
        properties: &[(String, PropertyValue)],
    ) -> Result<()> {
        let names: Vec<&str> = properties.iter().map(|(n, _)| n.as_str()).collect();
        self.call("update_record", names.join(",")).await?;
        let mut state = self.state.lock().await;
        let record = state
            .records
            .values_mut()
            .flatten()
            .find(|r| r.id == record_id)
            .ok_or_else(|| anyhow!("no record {record_id}"))?;
        for (name, value) in properties {
            record.properties.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn list_pages(&self, parent_page_id: &str) -> Result<Vec<PageSummary>> {
        self.call("list_pages", parent_page_id).await?;
        let parent = normalize_id(parent_page_id);
        let state = self.state.lock().await;
        Ok(state
            .pages
            .iter()
            .filter(|p| normalize_id(&p.parent) == parent)
            .map(|p| PageSummary {
                id: p.id.clone(),
                parent_page_id: p.parent.clone(),
                title: p.title.clone(),
                icon: p.icon.clone(),
                cover_url: p.cover_url.clone(),
            })
            .collect())
    }

    async fn get_page_body(&self, page_id: &str) -> Result<PageBody> {
        self.call("get_page_body", page_id).await?;
        let state = self.state.lock().await;
        state
            .pages
            .iter()
            .find(|p| p.id == page_id)
            .map(|p| p.body.clone())
            .ok_or_else(|| anyhow!("no page {page_id}"))
    }

    async fn create_page(&self, draft: &PageDraft, blocks: &[Block]) -> Result<String> {
        self.call("create_page", &draft.title).await?;
        let id = new_id();
        self.state.lock().await.pages.push(MemPage {
            id: id.clone(),
            parent: draft.parent_page_id.clone(),
            title: draft.title.clone(),
            icon: draft.icon.clone(),
            cover_url: draft.cover_url.clone(),
            body: PageBody {
                blocks: blocks.to_vec(),
                unsupported: 0,
            },
        });
        Ok(id)
    }

    async fn replace_page_body(&self, page_id: &str, blocks: &[Block]) -> Result<()> {
        self.call("replace_page_body", page_id).await?;
        let mut state = self.state.lock().await;
        let page = state
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| anyhow!("no page {page_id}"))?;
        page.body = PageBody {
            blocks: blocks.to_vec(),
            unsupported: 0,
        };
        Ok(())
    }

    async fn update_page_metadata(&self, page_id: &str, metadata: &PageMetadata) -> Result<()> {
        self.call("update_page_metadata", page_id).await?;
        let mut state = self.state.lock().await;
        let page = state
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| anyhow!("no page {page_id}"))?;
        if metadata.icon.is_some() {
            page.icon = metadata.icon.clone();
        }
        if metadata.cover_url.is_some() {
            page.cover_url = metadata.cover_url.clone();
        }
        Ok(())
    }
}
