//! Plan/apply driver: fetches observed state, runs the three reconcilers and
//! executes plans phase by phase.
use anyhow::anyhow;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::SyncError;
use crate::matcher::match_page;
use crate::model::{
    normalize_id, DataSet, PageBody, PageSpec, PageSummary, PropertyKind, Record, SchemaSpec,
};
use crate::notion::convert::canonical_blocks;
use crate::notion::WorkspaceService;
use crate::reconcile::content::reconcile_content;
use crate::reconcile::pages::reconcile_pages;
use crate::reconcile::schema::{reconcile_schema, ObservedWorkspace, Resolution};
use crate::reconcile::{
    DbTarget, ItemFailure, Operation, Phase, Plan, PropertyUpsert, SchemaPatch, UpsertReason,
};

/// Everything a run wants to converge. Any part may be absent.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    pub schema: Option<SchemaSpec>,
    /// Schema consulted only to find the databases `data` writes to. Its
    /// properties and relations are never applied.
    pub lookup: Option<SchemaSpec>,
    pub data: Option<DataSet>,
    pub pages: Vec<PageSpec>,
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub concurrency: usize,
    /// Where databases are looked up by title when no schema is in the run.
    pub parent_page_id: Option<String>,
}

impl DriverSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            concurrency: cfg.apply.concurrency.max(1),
            parent_page_id: cfg.workspace.parent_page_id.clone(),
        }
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            parent_page_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Re-fetched state already matched; nothing was written.
    Unchanged,
    Failed(String),
    NotAttempted,
}

#[derive(Debug, Clone)]
pub struct OperationReport {
    pub phase: Phase,
    pub description: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub operations: Vec<OperationReport>,
    pub failures: Vec<ItemFailure>,
    pub interrupted: bool,
}

impl ApplyReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.operations.iter().filter(|o| pred(&o.outcome)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| *o == Outcome::Applied)
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|o| *o == Outcome::NotAttempted)
    }

    /// 2 when the run did not complete, 1 when items were rejected, else 0.
    pub fn exit_code(&self) -> u8 {
        if self.failed() > 0 || self.interrupted {
            2
        } else if !self.failures.is_empty() {
            1
        } else {
            0
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.operations.is_empty() {
            out.push_str("No changes. Workspace is up to date.\n");
        }
        for op in &self.operations {
            let _ = match &op.outcome {
                Outcome::Applied => writeln!(out, "  [applied] {}", op.description),
                Outcome::Unchanged => writeln!(out, "  [unchanged] {}", op.description),
                Outcome::Failed(err) => writeln!(out, "  [failed] {}: {}", op.description, err),
                Outcome::NotAttempted => writeln!(out, "  [not attempted] {}", op.description),
            };
        }
        if !self.operations.is_empty() {
            let _ = writeln!(
                out,
                "Applied {}, unchanged {}, failed {}, not attempted {}",
                self.applied(),
                self.count(|o| *o == Outcome::Unchanged),
                self.failed(),
                self.not_attempted()
            );
        }
        if self.interrupted {
            out.push_str("Interrupted before completion.\n");
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out, "Rejected items: {}", self.failures.len());
            for f in &self.failures {
                let _ = writeln!(out, "  {}: {}", f.subject, f.error);
            }
        }
        out
    }
}

struct ExecState {
    created: RwLock<HashMap<String, String>>,
    halted: Arc<AtomicBool>,
}

impl ExecState {
    async fn resolve(&self, target: &DbTarget) -> anyhow::Result<String> {
        match target {
            DbTarget::Existing(id) => Ok(id.clone()),
            DbTarget::Pending(db_key) => self
                .created
                .read()
                .await
                .get(db_key)
                .cloned()
                .ok_or_else(|| anyhow!("database '{db_key}' was not created earlier in this run")),
        }
    }
}

pub struct Driver<'a, S: ?Sized> {
    service: &'a S,
    settings: DriverSettings,
}

impl<'a, S: WorkspaceService + ?Sized> Driver<'a, S> {
    pub fn new(service: &'a S, settings: DriverSettings) -> Self {
        Self { service, settings }
    }

    fn concurrency(&self) -> usize {
        self.settings.concurrency.max(1)
    }

    /// Compute the plan. Reads remote state, never writes.
    #[instrument(skip_all)]
    pub async fn plan(&self, inputs: &Inputs) -> Result<Plan, SyncError> {
        let mut plan = Plan::default();

        let resolution = match (&inputs.schema, &inputs.lookup, &inputs.data) {
            (Some(schema), _, _) => {
                let titles = schema.databases.iter().map(|d| d.match_rule.value.as_str());
                let observed = self
                    .observe_workspace(&schema.parent_page_id, titles)
                    .await?;
                let outcome = reconcile_schema(schema, &observed)?;
                plan.schema = outcome.schema_ops;
                plan.relations = outcome.relation_ops;
                outcome.resolution
            }
            (None, Some(lookup), Some(data)) if !data.targets.is_empty() => {
                let titles = lookup.databases.iter().map(|d| d.match_rule.value.as_str());
                let observed = self
                    .observe_workspace(&lookup.parent_page_id, titles)
                    .await?;
                Resolution::by_schema(lookup, &observed)?
            }
            (None, None, Some(data)) if !data.targets.is_empty() => {
                let parent = self.settings.parent_page_id.as_deref().ok_or_else(|| {
                    SyncError::validation(
                        "ingesting without a schema file needs workspace.parent_page_id in the config",
                    )
                })?;
                let keys: Vec<&str> = data.targets.iter().map(|t| t.db_key.as_str()).collect();
                let observed = self.observe_workspace(parent, keys.iter().copied()).await?;
                Resolution::by_title(keys, &observed)?
            }
            _ => Resolution::default(),
        };

        if let Some(data) = &inputs.data {
            let records = self.observe_records(data, &resolution).await?;
            let outcome = reconcile_content(data, &resolution, &records);
            plan.records = outcome.operations;
            plan.failures.extend(outcome.failures);
        }

        if !inputs.pages.is_empty() {
            let pages: Vec<PageSpec> = inputs
                .pages
                .iter()
                .map(|p| PageSpec {
                    blocks: canonical_blocks(&p.blocks),
                    ..p.clone()
                })
                .collect();
            let (observed, bodies) = self.observe_pages(&pages).await?;
            let outcome = reconcile_pages(&pages, &observed, &bodies);
            plan.pages = outcome.operations;
            plan.failures.extend(outcome.failures);
        }

        info!(
            operations = plan.len(),
            failures = plan.failures.len(),
            "plan ready"
        );
        Ok(plan)
    }

    /// Plan, then execute.
    #[instrument(skip_all)]
    pub async fn apply(&self, inputs: &Inputs) -> Result<ApplyReport, SyncError> {
        let plan = self.plan(inputs).await?;
        Ok(self.execute(&plan).await)
    }

    /// Run a plan phase by phase. Lanes inside a phase run concurrently; the
    /// first remote error or an interrupt stops everything not yet started.
    #[instrument(skip_all, fields(operations = plan.len()))]
    pub async fn execute(&self, plan: &Plan) -> ApplyReport {
        let halted = Arc::new(AtomicBool::new(false));
        let watcher = {
            let halted = halted.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after in-flight operations");
                    halted.store(true, Ordering::SeqCst);
                }
            })
        };
        let state = ExecState {
            created: RwLock::new(HashMap::new()),
            halted: halted.clone(),
        };
        let mut report = ApplyReport {
            failures: plan.failures.clone(),
            ..Default::default()
        };

        for phase in Phase::ALL {
            let ops = plan.phase(phase);
            if ops.is_empty() {
                continue;
            }
            let mut lanes: Vec<Vec<(usize, &Operation)>> = Vec::new();
            let mut lane_of: HashMap<String, usize> = HashMap::new();
            for (idx, op) in ops.iter().enumerate() {
                let lane = *lane_of.entry(op.lane()).or_insert_with(|| {
                    lanes.push(Vec::new());
                    lanes.len() - 1
                });
                lanes[lane].push((idx, op));
            }
            debug!(phase = phase.as_str(), lanes = lanes.len(), "executing phase");

            let mut outcomes: Vec<(usize, Outcome)> = stream::iter(lanes)
                .map(|lane| self.run_lane(lane, &state))
                .buffer_unordered(self.concurrency())
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .flatten()
                .collect();
            outcomes.sort_by_key(|(idx, _)| *idx);
            for (idx, outcome) in outcomes {
                report.operations.push(OperationReport {
                    phase,
                    description: ops[idx].describe(),
                    outcome,
                });
            }
        }

        watcher.abort();
        report.interrupted = halted.load(Ordering::SeqCst) && report.failed() == 0;
        info!(
            applied = report.applied(),
            failed = report.failed(),
            not_attempted = report.not_attempted(),
            "apply finished"
        );
        report
    }

    async fn run_lane(
        &self,
        lane: Vec<(usize, &Operation)>,
        state: &ExecState,
    ) -> Vec<(usize, Outcome)> {
        let mut out = Vec::with_capacity(lane.len());
        for (idx, op) in lane {
            if state.halted.load(Ordering::SeqCst) {
                out.push((idx, Outcome::NotAttempted));
                continue;
            }
            match self.apply_one(op, state).await {
                Ok(true) => {
                    info!(op = %op.describe(), "applied");
                    out.push((idx, Outcome::Applied));
                }
                Ok(false) => {
                    info!(op = %op.describe(), "already satisfied, skipped");
                    out.push((idx, Outcome::Unchanged));
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(op = %op.describe(), error = %message, "operation failed, halting");
                    state.halted.store(true, Ordering::SeqCst);
                    out.push((idx, Outcome::Failed(message)));
                }
            }
        }
        out
    }

    /// Execute one operation against freshly fetched state. `Ok(false)` means
    /// the remote already satisfied it.
    ///
    /// Creates are written without a re-fetch: a database, record or page
    /// made elsewhere after planning is created a second time, and the next
    /// plan reports the duplicate as ambiguous.
    async fn apply_one(&self, op: &Operation, state: &ExecState) -> anyhow::Result<bool> {
        match op {
            Operation::CreateDatabase { db_key, draft } => {
                let id = self.service.create_database(draft).await?;
                state.created.write().await.insert(db_key.clone(), id);
                Ok(true)
            }
            Operation::PatchDatabaseProperties {
                database,
                mode,
                patch,
                ..
            } => {
                let id = state.resolve(database).await?;
                let current = self.service.get_database_schema(&id).await?;
                let patch = patch.rebase(*mode, &current);
                if patch.is_empty() {
                    return Ok(false);
                }
                self.service.patch_database_properties(&id, &patch).await?;
                Ok(true)
            }
            Operation::CreateRelationPair {
                from,
                property_name,
                to,
                synced_property_name,
                ..
            } => {
                let from_id = state.resolve(from).await?;
                let to_id = state.resolve(to).await?;
                let current = self.service.get_database_schema(&from_id).await?;
                if let Some(PropertyKind::Relation { database_id, .. }) =
                    current.property(property_name)
                {
                    if normalize_id(database_id) == normalize_id(&to_id) {
                        return Ok(false);
                    }
                }
                let patch = SchemaPatch {
                    upserts: vec![PropertyUpsert {
                        name: property_name.clone(),
                        kind: PropertyKind::Relation {
                            database_id: to_id,
                            synced_property_name: synced_property_name.clone(),
                        },
                        reason: UpsertReason::Added,
                    }],
                    ..Default::default()
                };
                self.service
                    .patch_database_properties(&from_id, &patch)
                    .await?;
                Ok(true)
            }
            Operation::CreateRecord {
                database,
                properties,
                ..
            } => {
                // not re-checked; see above
                let id = state.resolve(database).await?;
                self.service.create_record(&id, properties).await?;
                Ok(true)
            }
            Operation::UpdateRecord {
                record_id,
                properties,
                ..
            } => {
                let current = self
                    .service
                    .get_record(record_id)
                    .await?
                    .ok_or_else(|| anyhow!("record {record_id} no longer exists"))?;
                let changed: Vec<_> = properties
                    .iter()
                    .filter(|(name, value)| current.properties.get(name) != Some(value))
                    .cloned()
                    .collect();
                if changed.is_empty() {
                    return Ok(false);
                }
                self.service.update_record(record_id, &changed).await?;
                Ok(true)
            }
            Operation::CreatePage { draft, blocks } => {
                // not re-checked; see above
                self.service.create_page(draft, blocks).await?;
                Ok(true)
            }
            Operation::ReplacePageBody {
                page_id,
                blocks,
                metadata,
                ..
            } => {
                let mut wrote = false;
                if let Some(blocks) = blocks {
                    let current = self.service.get_page_body(page_id).await?;
                    if !current.matches(blocks) {
                        self.service.replace_page_body(page_id, blocks).await?;
                        wrote = true;
                    }
                }
                if let Some(metadata) = metadata {
                    self.service.update_page_metadata(page_id, metadata).await?;
                    wrote = true;
                }
                Ok(wrote)
            }
        }
    }

    /// Databases under `parent` plus the schemas of those whose title is one
    /// of `titles`.
    async fn observe_workspace<'t>(
        &self,
        parent: &str,
        titles: impl Iterator<Item = &'t str>,
    ) -> Result<ObservedWorkspace, SyncError> {
        let databases = self
            .service
            .list_databases(parent)
            .await
            .map_err(SyncError::Remote)?;
        let wanted: HashSet<&str> = titles.collect();
        let ids: Vec<String> = databases
            .iter()
            .filter(|d| wanted.contains(d.title.as_str()))
            .map(|d| d.id.clone())
            .collect();
        let schemas: Vec<(String, _)> = stream::iter(ids)
            .map(|id| async move {
                let schema = self.service.get_database_schema(&id).await?;
                Ok::<_, anyhow::Error>((id, schema))
            })
            .buffer_unordered(self.concurrency())
            .try_collect()
            .await
            .map_err(SyncError::Remote)?;
        debug!(
            databases = databases.len(),
            schemas = schemas.len(),
            "observed workspace"
        );
        Ok(ObservedWorkspace {
            databases,
            schemas: schemas.into_iter().collect(),
        })
    }

    async fn observe_records(
        &self,
        data: &DataSet,
        resolution: &Resolution,
    ) -> Result<HashMap<String, Vec<Record>>, SyncError> {
        let mut targets: Vec<(String, String)> = Vec::new();
        for t in &data.targets {
            if let Some(DbTarget::Existing(id)) = resolution.get(&t.db_key).map(|r| &r.target) {
                if !targets.iter().any(|(k, _)| *k == t.db_key) {
                    targets.push((t.db_key.clone(), id.clone()));
                }
            }
        }
        stream::iter(targets)
            .map(|(db_key, id)| async move {
                let records = self.service.list_records(&id).await?;
                debug!(db_key = %db_key, records = records.len(), "observed records");
                Ok::<_, anyhow::Error>((db_key, records))
            })
            .buffer_unordered(self.concurrency())
            .try_collect()
            .await
            .map_err(SyncError::Remote)
    }

    async fn observe_pages(
        &self,
        pages: &[PageSpec],
    ) -> Result<(Vec<PageSummary>, HashMap<String, PageBody>), SyncError> {
        let mut parents: Vec<&str> = Vec::new();
        for p in pages {
            if !parents
                .iter()
                .any(|q| normalize_id(q) == normalize_id(&p.parent_page_id))
            {
                parents.push(&p.parent_page_id);
            }
        }
        let observed: Vec<Vec<PageSummary>> = stream::iter(parents)
            .map(|parent| self.service.list_pages(parent))
            .buffer_unordered(self.concurrency())
            .try_collect()
            .await
            .map_err(SyncError::Remote)?;
        let observed: Vec<PageSummary> = observed.into_iter().flatten().collect();

        let matched: Vec<String> = pages
            .iter()
            .filter_map(|p| match_page(&observed, &p.parent_page_id, &p.title).ok().flatten())
            .map(|s| s.id.clone())
            .collect();
        let bodies: HashMap<String, PageBody> = stream::iter(matched)
            .map(|id| async move {
                let body = self.service.get_page_body(&id).await?;
                Ok::<_, anyhow::Error>((id, body))
            })
            .buffer_unordered(self.concurrency())
            .try_collect()
            .await
            .map_err(SyncError::Remote)?;
        Ok((observed, bodies))
    }
}
