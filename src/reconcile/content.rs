//! Content reconciliation: desired records against the records observed in
//! each resolved database.
use std::collections::HashMap;
use tracing::debug;

use super::schema::Resolution;
use super::{union_options, ItemFailure, Operation, PropertyUpsert, SchemaPatch, UpsertReason};
use crate::coerce::Coercer;
use crate::error::ItemError;
use crate::matcher::match_record;
use crate::model::{DataSet, PropertyValue, Record, UpdateMode};

#[derive(Debug, Clone, Default)]
pub struct ContentOutcome {
    pub operations: Vec<Operation>,
    pub failures: Vec<ItemFailure>,
}

/// `observed` maps a `db_key` to the records currently in that database.
/// Databases pending creation have none.
pub fn reconcile_content(
    data: &DataSet,
    resolution: &Resolution,
    observed: &HashMap<String, Vec<Record>>,
) -> ContentOutcome {
    let mut out = ContentOutcome::default();
    let empty = Vec::new();

    for target in &data.targets {
        let Some(resolved) = resolution.get(&target.db_key) else {
            for record in &target.records {
                out.failures.push(ItemFailure {
                    subject: record.source.clone(),
                    error: ItemError::Invalid(format!(
                        "database '{}' does not exist and is not declared in a schema",
                        target.db_key
                    )),
                });
            }
            continue;
        };
        let existing = observed.get(&target.db_key).unwrap_or(&empty);
        let match_on = target.options.match_on.as_str();
        let mut coercer = Coercer::new(target.options.create_missing_select_options);
        let mut seen: Vec<PropertyValue> = Vec::new();
        let mut record_ops = Vec::new();

        for record in &target.records {
            let fail = |error: ItemError| ItemFailure {
                subject: record.source.clone(),
                error,
            };
            if record.field(match_on).is_none() {
                out.failures.push(fail(ItemError::Invalid(format!(
                    "missing match property '{match_on}'"
                ))));
                continue;
            }
            let values = match coercer.coerce_record(&record.fields, |name| resolved.property(name)) {
                Ok(values) => values,
                Err(err) => {
                    out.failures.push(fail(err.into()));
                    continue;
                }
            };
            let Some((_, key)) = values.iter().find(|(n, _)| n == match_on) else {
                continue;
            };
            if seen.contains(key) {
                out.failures.push(fail(ItemError::Invalid(format!(
                    "duplicate record for {match_on} = '{}'",
                    key.display()
                ))));
                continue;
            }
            seen.push(key.clone());

            match match_record(existing, match_on, key) {
                Err(err) => out.failures.push(fail(err.into())),
                Ok(None) => record_ops.push(Operation::CreateRecord {
                    db_key: target.db_key.clone(),
                    database: resolved.target.clone(),
                    key: key.display(),
                    properties: values.clone(),
                }),
                Ok(Some(current)) => {
                    let changed: Vec<(String, PropertyValue)> = values
                        .iter()
                        .filter(|(name, value)| current.properties.get(name) != Some(value))
                        .cloned()
                        .collect();
                    if changed.is_empty() {
                        debug!(db_key = %target.db_key, key = %key.display(), "record unchanged");
                    } else {
                        record_ops.push(Operation::UpdateRecord {
                            db_key: target.db_key.clone(),
                            record_id: current.id.clone(),
                            key: key.display(),
                            properties: changed,
                        });
                    }
                }
            }
        }

        let mut patch = SchemaPatch::default();
        for (property, added) in coercer.added_options() {
            let Some(kind) = resolved.property(property) else {
                continue;
            };
            let existing = kind.options().unwrap_or_default();
            if let Some(kind) = union_options(kind, existing, added) {
                patch.upserts.push(PropertyUpsert {
                    name: property.clone(),
                    kind,
                    reason: UpsertReason::OptionsChanged,
                });
            }
        }
        if !patch.is_empty() {
            out.operations.push(Operation::PatchDatabaseProperties {
                db_key: target.db_key.clone(),
                database: resolved.target.clone(),
                mode: UpdateMode::Merge,
                patch,
            });
        }
        out.operations.extend(record_ops);
    }
    out
}
