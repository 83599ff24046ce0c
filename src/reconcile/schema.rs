//! Schema reconciliation: database specs and relation specs against the
//! databases observed under the parent page.
use anyhow::anyhow;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use super::{
    kinds_equivalent, union_options, DatabaseDraft, DbTarget, Operation, PropertyUpsert,
    SchemaPatch, UpsertReason,
};
use crate::error::SyncError;
use crate::matcher::match_database;
use crate::model::{
    normalize_id, DatabaseSchema, DatabaseSpec, DatabaseSummary, MatchBy, MatchRule, OnMissing,
    PropertyKind, SchemaSpec, UpdateMode,
};

/// Remote databases under the parent page, plus the schemas of those that
/// may match a spec.
#[derive(Debug, Clone, Default)]
pub struct ObservedWorkspace {
    pub databases: Vec<DatabaseSummary>,
    pub schemas: HashMap<String, DatabaseSchema>,
}

impl ObservedWorkspace {
    fn schema(&self, id: &str) -> Result<&DatabaseSchema, SyncError> {
        self.schemas
            .get(id)
            .ok_or_else(|| SyncError::Remote(anyhow!("schema of database {id} was not fetched")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDatabase {
    pub db_key: String,
    pub target: DbTarget,
    /// Property set as it will be once this run's schema operations land.
    pub properties: Vec<(String, PropertyKind)>,
}

impl ResolvedDatabase {
    pub fn property(&self, name: &str) -> Option<&PropertyKind> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| k)
    }
}

/// `db_key` → remote database (or pending creation) for one run.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    databases: Vec<ResolvedDatabase>,
}

impl Resolution {
    pub fn get(&self, db_key: &str) -> Option<&ResolvedDatabase> {
        self.databases.iter().find(|d| d.db_key == db_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedDatabase> {
        self.databases.iter()
    }

    /// Resolve keys with no schema file in play: a key names the remote
    /// database whose title equals it.
    pub fn by_title<'k>(
        keys: impl IntoIterator<Item = &'k str>,
        observed: &ObservedWorkspace,
    ) -> Result<Self, SyncError> {
        let rules = keys.into_iter().map(|key| {
            let rule = MatchRule {
                by: MatchBy::Title,
                value: key.to_string(),
            };
            (key, rule)
        });
        Self::existing(rules, observed)
    }

    /// Resolve keys through a schema's match rules without planning any
    /// change to it. Databases the schema would create stay unresolved.
    pub fn by_schema(spec: &SchemaSpec, observed: &ObservedWorkspace) -> Result<Self, SyncError> {
        let rules = spec
            .databases
            .iter()
            .map(|db| (db.db_key.as_str(), db.match_rule.clone()));
        Self::existing(rules, observed)
    }

    fn existing<'k>(
        rules: impl IntoIterator<Item = (&'k str, MatchRule)>,
        observed: &ObservedWorkspace,
    ) -> Result<Self, SyncError> {
        let mut out = Resolution::default();
        for (key, rule) in rules {
            if out.get(key).is_some() {
                continue;
            }
            if let Some(summary) = match_database(&observed.databases, &rule)? {
                let schema = observed.schema(&summary.id)?;
                out.databases.push(ResolvedDatabase {
                    db_key: key.to_string(),
                    target: DbTarget::Existing(summary.id.clone()),
                    properties: schema.properties.clone(),
                });
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaOutcome {
    pub schema_ops: Vec<Operation>,
    pub relation_ops: Vec<Operation>,
    pub resolution: Resolution,
}

pub fn reconcile_schema(
    spec: &SchemaSpec,
    observed: &ObservedWorkspace,
) -> Result<SchemaOutcome, SyncError> {
    let mut out = SchemaOutcome::default();

    // relation properties are never removed by a replace-mode diff
    let mut protected: HashMap<&str, HashSet<&str>> = HashMap::new();
    for rel in &spec.relations {
        protected
            .entry(rel.from_db.as_str())
            .or_default()
            .insert(rel.property_name.as_str());
        if let Some(synced) = &rel.synced_property_name {
            protected
                .entry(rel.to_db.as_str())
                .or_default()
                .insert(synced.as_str());
        }
    }
    let none = HashSet::new();

    for db in &spec.databases {
        match match_database(&observed.databases, &db.match_rule)? {
            None => {
                info!(db_key = %db.db_key, title = %db.title, "database not found, will create");
                let properties = creation_properties(db);
                out.schema_ops.push(Operation::CreateDatabase {
                    db_key: db.db_key.clone(),
                    draft: DatabaseDraft {
                        parent_page_id: spec.parent_page_id.clone(),
                        title: db.title.clone(),
                        properties: properties.clone(),
                    },
                });
                out.resolution.databases.push(ResolvedDatabase {
                    db_key: db.db_key.clone(),
                    target: DbTarget::Pending(db.db_key.clone()),
                    properties,
                });
            }
            Some(summary) => {
                let current = observed.schema(&summary.id)?;
                let keep = protected.get(db.db_key.as_str()).unwrap_or(&none);
                let patch = diff_properties(db, current, keep);
                let mut effective = current.properties.clone();
                patch.apply_to(&mut effective);
                if patch.is_empty() {
                    debug!(db_key = %db.db_key, "schema already converged");
                } else {
                    out.schema_ops.push(Operation::PatchDatabaseProperties {
                        db_key: db.db_key.clone(),
                        database: DbTarget::Existing(summary.id.clone()),
                        mode: db.update_mode,
                        patch,
                    });
                }
                out.resolution.databases.push(ResolvedDatabase {
                    db_key: db.db_key.clone(),
                    target: DbTarget::Existing(summary.id.clone()),
                    properties: effective,
                });
            }
        }
    }

    for rel in &spec.relations {
        let from = out.resolution.get(&rel.from_db);
        let to = out.resolution.get(&rel.to_db);
        let (from, to) = match (from, to) {
            (Some(from), Some(to)) => (from, to),
            _ => {
                let missing = if from.is_none() { &rel.from_db } else { &rel.to_db };
                match rel.on_missing {
                    OnMissing::Skip => {
                        warn!(relation = %rel.label(), db_key = %missing, "skipping relation, database is not part of this run");
                        continue;
                    }
                    OnMissing::Error => {
                        return Err(SyncError::RelationResolution {
                            relation: rel.label(),
                            db_key: missing.clone(),
                        })
                    }
                }
            }
        };
        if let DbTarget::Existing(to_id) = &to.target {
            if let Some(PropertyKind::Relation { database_id, .. }) =
                from.property(&rel.property_name)
            {
                if normalize_id(database_id) == normalize_id(to_id) {
                    debug!(relation = %rel.label(), "relation already present");
                    continue;
                }
            }
        }
        out.relation_ops.push(Operation::CreateRelationPair {
            from_key: rel.from_db.clone(),
            from: from.target.clone(),
            property_name: rel.property_name.clone(),
            to_key: rel.to_db.clone(),
            to: to.target.clone(),
            synced_property_name: rel.synced_property_name.clone(),
        });
    }

    Ok(out)
}

/// Declared properties for a new database. Notion requires exactly one title
/// property, so one is prepended when none is declared.
fn creation_properties(db: &DatabaseSpec) -> Vec<(String, PropertyKind)> {
    let mut properties = db.properties.clone();
    if properties.iter().any(|(_, k)| *k == PropertyKind::Title) {
        return properties;
    }
    let taken = |name: &str| properties.iter().any(|(n, _)| n == name);
    let name = ["Name", "Title"]
        .into_iter()
        .find(|n| !taken(n))
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} title", db.title));
    debug!(db_key = %db.db_key, property = %name, "no title property declared, adding one");
    properties.insert(0, (name, PropertyKind::Title));
    properties
}

/// Minimal patch turning `current` into what `db` asks for under its update
/// mode. Title properties and `protected` names are never removed.
pub fn diff_properties(
    db: &DatabaseSpec,
    current: &DatabaseSchema,
    protected: &HashSet<&str>,
) -> SchemaPatch {
    let mut patch = SchemaPatch::default();
    let replace = db.update_mode == UpdateMode::Replace;

    for (name, want) in &db.properties {
        let Some(have) = current.property(name) else {
            if *want == PropertyKind::Title {
                if let Some((remote_title, _)) = current
                    .properties
                    .iter()
                    .find(|(_, k)| *k == PropertyKind::Title)
                {
                    if replace {
                        patch.renames.push((remote_title.clone(), name.clone()));
                    } else {
                        warn!(db_key = %db.db_key, property = %name, remote = %remote_title, "title property has a different name remotely; leaving it under merge");
                    }
                    continue;
                }
            }
            patch.upserts.push(PropertyUpsert {
                name: name.clone(),
                kind: want.clone(),
                reason: UpsertReason::Added,
            });
            continue;
        };

        if !have.same_type(want) {
            if replace {
                patch.upserts.push(PropertyUpsert {
                    name: name.clone(),
                    kind: want.clone(),
                    reason: UpsertReason::Retyped,
                });
            } else {
                warn!(
                    db_key = %db.db_key,
                    property = %name,
                    remote = have.type_name(),
                    desired = want.type_name(),
                    "property type differs; leaving it under merge"
                );
            }
            continue;
        }

        match (want.options(), have.options()) {
            (Some(wanted), Some(existing)) if !replace => {
                if let Some(kind) = union_options(have, existing, wanted) {
                    patch.upserts.push(PropertyUpsert {
                        name: name.clone(),
                        kind,
                        reason: UpsertReason::OptionsChanged,
                    });
                }
            }
            (Some(wanted), Some(existing)) => {
                if !kinds_equivalent(have, want) {
                    let options = wanted
                        .iter()
                        .map(|w| {
                            let mut opt = w.clone();
                            if opt.color.is_none() {
                                opt.color = existing
                                    .iter()
                                    .find(|e| e.name == w.name)
                                    .and_then(|e| e.color.clone());
                            }
                            opt
                        })
                        .collect();
                    patch.upserts.push(PropertyUpsert {
                        name: name.clone(),
                        kind: super::with_options(want, options),
                        reason: UpsertReason::OptionsChanged,
                    });
                }
            }
            _ => {
                if replace && !kinds_equivalent(have, want) {
                    patch.upserts.push(PropertyUpsert {
                        name: name.clone(),
                        kind: want.clone(),
                        reason: UpsertReason::Retyped,
                    });
                }
            }
        }
    }

    if replace {
        for (name, kind) in &current.properties {
            if db.property(name).is_none()
                && *kind != PropertyKind::Title
                && !protected.contains(name.as_str())
            {
                patch.removals.push(name.clone());
            }
        }
    }
    patch
}
