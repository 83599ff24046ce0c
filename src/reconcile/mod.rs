//! Operation and plan types shared by the three reconcilers, plus the schema
//! patch algebra used both when planning and when re-checking before a write.
use serde::{Serialize, Serializer};
use std::fmt::Write as _;

use crate::error::ItemError;
use crate::model::{
    normalize_id, Block, DatabaseSchema, PropertyKind, PropertyValue, SelectOption, UpdateMode,
};

pub mod content;
pub mod pages;
pub mod schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Schema,
    Relations,
    Records,
    Pages,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Schema, Phase::Relations, Phase::Records, Phase::Pages];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Schema => "schema",
            Phase::Relations => "relations",
            Phase::Records => "records",
            Phase::Pages => "pages",
        }
    }
}

/// A database either already present remotely or created earlier in the
/// same run (known only by its `db_key` until then).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "ref", rename_all = "snake_case")]
pub enum DbTarget {
    Existing(String),
    Pending(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertReason {
    Added,
    Retyped,
    OptionsChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyUpsert {
    pub name: String,
    pub kind: PropertyKind,
    pub reason: UpsertReason,
}

/// Changes to a database's property set.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SchemaPatch {
    pub upserts: Vec<PropertyUpsert>,
    pub renames: Vec<(String, String)>,
    pub removals: Vec<String>,
}

impl SchemaPatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.renames.is_empty() && self.removals.is_empty()
    }

    /// Property set that results from applying this patch.
    pub fn apply_to(&self, properties: &mut Vec<(String, PropertyKind)>) {
        for (from, to) in &self.renames {
            if let Some(entry) = properties.iter_mut().find(|(n, _)| n == from) {
                entry.0 = to.clone();
            }
        }
        properties.retain(|(n, _)| !self.removals.contains(n));
        for up in &self.upserts {
            match properties.iter_mut().find(|(n, _)| *n == up.name) {
                Some(entry) => entry.1 = up.kind.clone(),
                None => properties.push((up.name.clone(), up.kind.clone())),
            }
        }
    }

    /// Drop whatever `current` already satisfies. Under merge, option lists
    /// are re-unioned with the options now present remotely.
    pub fn rebase(&self, mode: UpdateMode, current: &DatabaseSchema) -> SchemaPatch {
        let mut out = SchemaPatch::default();
        for up in &self.upserts {
            let Some(have) = current.property(&up.name) else {
                out.upserts.push(up.clone());
                continue;
            };
            if !have.same_type(&up.kind) {
                if mode == UpdateMode::Replace || up.reason == UpsertReason::Retyped {
                    out.upserts.push(up.clone());
                }
                continue;
            }
            match (mode, up.kind.options(), have.options()) {
                (UpdateMode::Merge, Some(want), Some(existing)) => {
                    if let Some(kind) = union_options(have, existing, want) {
                        out.upserts.push(PropertyUpsert {
                            name: up.name.clone(),
                            kind,
                            reason: UpsertReason::OptionsChanged,
                        });
                    }
                }
                _ => {
                    if !kinds_equivalent(have, &up.kind) {
                        out.upserts.push(up.clone());
                    }
                }
            }
        }
        out.renames = self
            .renames
            .iter()
            .filter(|(from, to)| current.property(from).is_some() && current.property(to).is_none())
            .cloned()
            .collect();
        out.removals = self
            .removals
            .iter()
            .filter(|n| current.property(n).is_some())
            .cloned()
            .collect();
        out
    }

    fn summary(&self) -> String {
        let mut parts = Vec::new();
        for up in &self.upserts {
            parts.push(match up.reason {
                UpsertReason::Added => format!("+{} ({})", up.name, up.kind.type_name()),
                UpsertReason::Retyped => format!("~{} (now {})", up.name, up.kind.type_name()),
                UpsertReason::OptionsChanged => format!("~{} (options)", up.name),
            });
        }
        for (from, to) in &self.renames {
            parts.push(format!("{from} → {to}"));
        }
        for name in &self.removals {
            parts.push(format!("-{name}"));
        }
        parts.join(", ")
    }
}

/// `have` with every option of `want` it lacks appended, or `None` when
/// nothing is missing. Existing options keep their position and color.
pub(crate) fn union_options(
    have: &PropertyKind,
    existing: &[SelectOption],
    want: &[SelectOption],
) -> Option<PropertyKind> {
    let missing: Vec<SelectOption> = want
        .iter()
        .filter(|w| !existing.iter().any(|e| e.name == w.name))
        .cloned()
        .collect();
    if missing.is_empty() {
        return None;
    }
    let mut options = existing.to_vec();
    options.extend(missing);
    Some(with_options(have, options))
}

pub(crate) fn with_options(kind: &PropertyKind, options: Vec<SelectOption>) -> PropertyKind {
    match kind {
        PropertyKind::MultiSelect { .. } => PropertyKind::MultiSelect { options },
        _ => PropertyKind::Select { options },
    }
}

/// Whether `have` (remote) already satisfies `want` (desired) exactly.
/// Unspecified option colors and number formats accept whatever is remote.
pub(crate) fn kinds_equivalent(have: &PropertyKind, want: &PropertyKind) -> bool {
    match (have, want) {
        (PropertyKind::Number { format: h }, PropertyKind::Number { format: w }) => {
            w.is_none() || h.as_deref().unwrap_or("number") == w.as_deref().unwrap_or("number")
        }
        (PropertyKind::Select { options: h }, PropertyKind::Select { options: w })
        | (PropertyKind::MultiSelect { options: h }, PropertyKind::MultiSelect { options: w }) => {
            h.len() == w.len()
                && h.iter().zip(w).all(|(h, w)| {
                    h.name == w.name && (w.color.is_none() || h.color == w.color)
                })
        }
        (
            PropertyKind::Relation {
                database_id: h, ..
            },
            PropertyKind::Relation {
                database_id: w, ..
            },
        ) => normalize_id(h) == normalize_id(w),
        _ => have.same_type(want),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseDraft {
    pub parent_page_id: String,
    pub title: String,
    pub properties: Vec<(String, PropertyKind)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageDraft {
    pub parent_page_id: String,
    pub title: String,
    pub icon: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
}

impl PageMetadata {
    pub fn is_empty(&self) -> bool {
        self.icon.is_none() && self.cover_url.is_none()
    }
}

/// One remote mutation. Constructing an operation never performs I/O.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateDatabase {
        db_key: String,
        draft: DatabaseDraft,
    },
    PatchDatabaseProperties {
        db_key: String,
        database: DbTarget,
        mode: UpdateMode,
        patch: SchemaPatch,
    },
    CreateRelationPair {
        from_key: String,
        from: DbTarget,
        property_name: String,
        to_key: String,
        to: DbTarget,
        synced_property_name: Option<String>,
    },
    CreateRecord {
        db_key: String,
        database: DbTarget,
        key: String,
        properties: Vec<(String, PropertyValue)>,
    },
    UpdateRecord {
        db_key: String,
        record_id: String,
        key: String,
        properties: Vec<(String, PropertyValue)>,
    },
    CreatePage {
        draft: PageDraft,
        blocks: Vec<Block>,
    },
    ReplacePageBody {
        page_id: String,
        title: String,
        blocks: Option<Vec<Block>>,
        metadata: Option<PageMetadata>,
    },
}

impl Operation {
    /// Operations sharing a lane touch the same remote entity and must run in
    /// order; distinct lanes within a phase may run concurrently.
    pub fn lane(&self) -> String {
        match self {
            Operation::CreateDatabase { db_key, .. }
            | Operation::PatchDatabaseProperties { db_key, .. }
            | Operation::CreateRecord { db_key, .. }
            | Operation::UpdateRecord { db_key, .. } => format!("db:{db_key}"),
            Operation::CreateRelationPair { .. } => "relations".to_string(),
            Operation::CreatePage { draft, .. } => {
                format!("page:{}/{}", normalize_id(&draft.parent_page_id), draft.title)
            }
            Operation::ReplacePageBody { page_id, .. } => format!("page:{}", normalize_id(page_id)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::CreateDatabase { db_key, draft } => {
                let names: Vec<&str> = draft.properties.iter().map(|(n, _)| n.as_str()).collect();
                format!(
                    "create database \"{}\" ({}) with {} properties: {}",
                    draft.title,
                    db_key,
                    names.len(),
                    names.join(", ")
                )
            }
            Operation::PatchDatabaseProperties { db_key, patch, .. } => {
                format!("patch database {}: {}", db_key, patch.summary())
            }
            Operation::CreateRelationPair {
                from_key,
                property_name,
                to_key,
                synced_property_name,
                ..
            } => {
                let mut s = format!("create relation {from_key}.{property_name} -> {to_key}");
                if let Some(synced) = synced_property_name {
                    let _ = write!(s, " (synced as {to_key}.{synced})");
                }
                s
            }
            Operation::CreateRecord {
                db_key,
                key,
                properties,
                ..
            } => format!(
                "create record {} in {} ({})",
                key,
                db_key,
                names(properties)
            ),
            Operation::UpdateRecord {
                db_key,
                key,
                properties,
                ..
            } => format!("update record {} in {}: {}", key, db_key, names(properties)),
            Operation::CreatePage { draft, blocks } => format!(
                "create page \"{}\" under {} ({} blocks)",
                draft.title,
                draft.parent_page_id,
                blocks.len()
            ),
            Operation::ReplacePageBody {
                title,
                blocks,
                metadata,
                ..
            } => {
                let mut parts = Vec::new();
                if let Some(blocks) = blocks {
                    parts.push(format!("replace body ({} blocks)", blocks.len()));
                }
                if let Some(meta) = metadata {
                    if meta.icon.is_some() {
                        parts.push("set icon".to_string());
                    }
                    if meta.cover_url.is_some() {
                        parts.push("set cover".to_string());
                    }
                }
                format!("update page \"{}\": {}", title, parts.join(", "))
            }
        }
    }
}

fn names(properties: &[(String, PropertyValue)]) -> String {
    properties
        .iter()
        .map(|(n, _)| n.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A record or page that could not be planned. The rest of the batch is
/// unaffected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub subject: String,
    #[serde(serialize_with = "display")]
    pub error: ItemError,
}

fn display<S: Serializer>(err: &ItemError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Ordered operations per phase plus itemized failures. No operations means
/// the workspace has converged.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub schema: Vec<Operation>,
    pub relations: Vec<Operation>,
    pub records: Vec<Operation>,
    pub pages: Vec<Operation>,
    pub failures: Vec<ItemFailure>,
}

impl Plan {
    pub fn phase(&self, phase: Phase) -> &[Operation] {
        match phase {
            Phase::Schema => &self.schema,
            Phase::Relations => &self.relations,
            Phase::Records => &self.records,
            Phase::Pages => &self.pages,
        }
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        Phase::ALL.into_iter().flat_map(move |p| self.phase(p).iter())
    }

    pub fn len(&self) -> usize {
        self.schema.len() + self.relations.len() + self.records.len() + self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str("No changes. Workspace is up to date.\n");
        } else {
            let _ = writeln!(out, "Plan: {} operation(s)", self.len());
            for phase in Phase::ALL {
                let ops = self.phase(phase);
                if ops.is_empty() {
                    continue;
                }
                let _ = writeln!(out, "[{}]", phase.as_str());
                for op in ops {
                    let _ = writeln!(out, "  {}", op.describe());
                }
            }
        }
        if !self.failures.is_empty() {
            let _ = writeln!(out, "Failures: {}", self.failures.len());
            for f in &self.failures {
                let _ = writeln!(out, "  {}: {}", f.subject, f.error);
            }
        }
        out
    }
}
