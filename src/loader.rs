//! Input files → desired-state specs: schema YAML, data YAML, CSV with a
//! column map, and a directory of Markdown pages with front matter.
use serde::Deserialize;
use serde_json::Value;
use serde_yaml::Mapping;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SyncError;
use crate::markdown::compile;
use crate::model::{
    normalize_id, DataSet, DatabaseSpec, IngestOptions, MatchBy, MatchRule, OnMissing, PageSpec,
    PropertyKind, RecordSpec, RelationSpec, SchemaSpec, SelectOption, TargetRecords, UpdateMode,
};

fn read(path: &Path) -> Result<String, SyncError> {
    fs::read_to_string(path).map_err(|e| SyncError::load(path.display(), e))
}

#[derive(Debug, Deserialize)]
struct RawSchema {
    #[serde(default)]
    workspace: Option<RawWorkspace>,
    #[serde(default)]
    databases: Vec<RawDatabase>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

#[derive(Debug, Deserialize)]
struct RawWorkspace {
    #[serde(default)]
    parent_page_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDatabase {
    db_key: String,
    title: String,
    #[serde(default, rename = "match")]
    match_rule: Option<MatchRule>,
    #[serde(default)]
    update_mode: UpdateMode,
    #[serde(default)]
    properties: Mapping,
}

#[derive(Debug, Deserialize)]
struct RawProperty {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    options: Vec<RawOption>,
}

/// Options may be bare names or `{name, color}` maps.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOption {
    Name(String),
    Full(SelectOption),
}

impl From<RawOption> for SelectOption {
    fn from(raw: RawOption) -> Self {
        match raw {
            RawOption::Name(name) => SelectOption::named(name),
            RawOption::Full(opt) => opt,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    from_db: String,
    property_name: String,
    to_db: String,
    #[serde(default)]
    synced_property_name: Option<String>,
    #[serde(default)]
    on_missing: OnMissing,
}

pub fn load_schema(path: &Path) -> Result<SchemaSpec, SyncError> {
    let text = read(path)?;
    parse_schema(&text, &path.display().to_string())
}

/// Parse and validate a schema document. `origin` names it in errors.
pub fn parse_schema(text: &str, origin: &str) -> Result<SchemaSpec, SyncError> {
    let raw: RawSchema = serde_yaml::from_str(text).map_err(|e| SyncError::load(origin, e))?;

    let parent_page_id = raw
        .workspace
        .and_then(|w| w.parent_page_id)
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| {
            SyncError::validation("A `parent_page_id` must be defined in the `workspace` section")
        })?;

    let mut keys = HashSet::new();
    let mut databases = Vec::with_capacity(raw.databases.len());
    for db in raw.databases {
        if db.db_key.trim().is_empty() {
            return Err(SyncError::validation("database with an empty db_key"));
        }
        if !keys.insert(db.db_key.clone()) {
            return Err(SyncError::validation(format!(
                "duplicate db_key '{}'",
                db.db_key
            )));
        }
        if db.title.trim().is_empty() {
            return Err(SyncError::validation(format!(
                "database '{}' has an empty title",
                db.db_key
            )));
        }

        let mut properties = Vec::with_capacity(db.properties.len());
        for (name, value) in db.properties {
            let name = name.as_str().map(str::to_string).ok_or_else(|| {
                SyncError::load(origin, format!("database '{}': property names must be strings", db.db_key))
            })?;
            let prop: RawProperty = serde_yaml::from_value(value).map_err(|e| {
                SyncError::load(origin, format!("database '{}', property '{name}': {e}", db.db_key))
            })?;
            let options = prop.options.into_iter().map(SelectOption::from).collect();
            let kind = PropertyKind::declared(&name, &prop.type_name, prop.format, options)
                .map_err(|msg| SyncError::validation(format!("database '{}': {msg}", db.db_key)))?;
            properties.push((name, kind));
        }
        let titles = properties
            .iter()
            .filter(|(_, k)| *k == PropertyKind::Title)
            .count();
        if titles > 1 {
            return Err(SyncError::validation(format!(
                "database '{}' declares {titles} title properties; at most one is allowed",
                db.db_key
            )));
        }

        let match_rule = db.match_rule.unwrap_or_else(|| MatchRule {
            by: MatchBy::Title,
            value: db.title.clone(),
        });
        databases.push(DatabaseSpec {
            db_key: db.db_key,
            title: db.title,
            match_rule,
            update_mode: db.update_mode,
            properties,
        });
    }

    let mut relations = Vec::with_capacity(raw.relations.len());
    for rel in raw.relations {
        if rel.from_db.trim().is_empty()
            || rel.to_db.trim().is_empty()
            || rel.property_name.trim().is_empty()
        {
            return Err(SyncError::validation(
                "relations need non-empty from_db, property_name and to_db",
            ));
        }
        relations.push(RelationSpec {
            from_db: rel.from_db,
            property_name: rel.property_name,
            to_db: rel.to_db,
            synced_property_name: rel.synced_property_name,
            on_missing: rel.on_missing,
        });
    }

    Ok(SchemaSpec {
        parent_page_id,
        databases,
        relations,
    })
}

#[derive(Debug, Default, Clone, Deserialize)]
struct RawDefaults {
    #[serde(default)]
    match_on: Option<String>,
    #[serde(default)]
    create_missing_select_options: Option<bool>,
}

impl RawDefaults {
    /// `self` overlaid on `fallback`, then on the built-in defaults.
    fn resolve(&self, fallback: &RawDefaults) -> IngestOptions {
        let base = IngestOptions::default();
        IngestOptions {
            match_on: self
                .match_on
                .clone()
                .or_else(|| fallback.match_on.clone())
                .unwrap_or(base.match_on),
            create_missing_select_options: self
                .create_missing_select_options
                .or(fallback.create_missing_select_options)
                .unwrap_or(base.create_missing_select_options),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    overrides: BTreeMap<String, RawDefaults>,
    #[serde(default)]
    data: Option<Mapping>,
}

/// Dispatch on the file extension. CSV input needs a column map.
pub fn load_data(path: &Path, map: Option<&Path>) -> Result<DataSet, SyncError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("yaml") | Some("yml") => {
            let text = read(path)?;
            parse_data(&text, &path.display().to_string())
        }
        Some("csv") => {
            let map = map.ok_or_else(|| {
                SyncError::validation("A map file (--map) is required for CSV ingestion")
            })?;
            load_csv(path, map)
        }
        _ => Err(SyncError::load(
            path.display(),
            "unsupported data file type (expected .yaml, .yml or .csv)",
        )),
    }
}

pub fn parse_data(text: &str, origin: &str) -> Result<DataSet, SyncError> {
    let raw: RawData = serde_yaml::from_str(text).map_err(|e| SyncError::load(origin, e))?;
    let data = raw
        .data
        .ok_or_else(|| SyncError::load(origin, "missing top-level `data` map"))?;
    let mut targets = Vec::with_capacity(data.len());
    for (key, records) in data {
        let db_key = key
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SyncError::load(origin, "`data` keys must be db_key strings"))?;
        let serde_yaml::Value::Sequence(items) = records else {
            return Err(SyncError::load(
                origin,
                format!("`data.{db_key}` must be a list of records"),
            ));
        };
        let options = raw
            .overrides
            .get(&db_key)
            .cloned()
            .unwrap_or_default()
            .resolve(&raw.defaults);
        let mut out = Vec::with_capacity(items.len());
        for (idx, item) in items.into_iter().enumerate() {
            let source = format!("{origin}:{db_key}[{idx}]");
            let serde_yaml::Value::Mapping(fields) = item else {
                return Err(SyncError::load(&source, "record must be a map"));
            };
            let mut values = Vec::with_capacity(fields.len());
            for (name, value) in fields {
                let name = name
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| SyncError::load(&source, "property names must be strings"))?;
                let value: Value =
                    serde_json::to_value(&value).map_err(|e| SyncError::load(&source, e))?;
                values.push((name, value));
            }
            out.push(RecordSpec {
                db_key: db_key.clone(),
                source,
                fields: values,
            });
        }
        targets.push(TargetRecords {
            db_key,
            options,
            records: out,
        });
    }
    Ok(DataSet { targets })
}

#[derive(Debug, Default, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum CellType {
    #[default]
    Text,
    Number,
    Checkbox,
    List,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    #[serde(rename = "as")]
    target: String,
    #[serde(default, rename = "type")]
    cell_type: CellType,
    #[serde(default)]
    separator: Option<String>,
}

/// `Header: Property` or `Header: {as: Property, type: ..., separator: ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawColumnSpec {
    Target(String),
    Full(RawColumn),
}

impl From<RawColumnSpec> for RawColumn {
    fn from(spec: RawColumnSpec) -> Self {
        match spec {
            RawColumnSpec::Target(target) => RawColumn {
                target,
                cell_type: CellType::Text,
                separator: None,
            },
            RawColumnSpec::Full(col) => col,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMap {
    target_db: String,
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    columns: Mapping,
}

fn cell_value(cell: &str, col: &RawColumn) -> Value {
    match col.cell_type {
        CellType::Text => Value::String(cell.to_string()),
        CellType::Number => cell
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(cell.to_string())),
        CellType::Checkbox => match cell.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "x" => Value::Bool(true),
            "false" | "no" | "0" => Value::Bool(false),
            _ => Value::String(cell.to_string()),
        },
        CellType::List => {
            let sep = col.separator.as_deref().unwrap_or(",");
            Value::Array(
                cell.split(sep)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        }
    }
}

/// Read a CSV through its column map. Empty cells are skipped and unmapped
/// columns ignored.
pub fn load_csv(data_path: &Path, map_path: &Path) -> Result<DataSet, SyncError> {
    let map_origin = map_path.display().to_string();
    let map: RawMap =
        serde_yaml::from_str(&read(map_path)?).map_err(|e| SyncError::load(&map_origin, e))?;
    if map.target_db.trim().is_empty() {
        return Err(SyncError::validation(format!(
            "{map_origin}: target_db must be non-empty"
        )));
    }
    let mut columns = Vec::with_capacity(map.columns.len());
    for (header, spec) in map.columns {
        let header = header
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SyncError::load(&map_origin, "column headers must be strings"))?;
        let spec: RawColumnSpec = serde_yaml::from_value(spec)
            .map_err(|e| SyncError::load(&map_origin, format!("column '{header}': {e}")))?;
        columns.push((header, RawColumn::from(spec)));
    }

    let origin = data_path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(data_path)
        .map_err(|e| SyncError::load(&origin, e))?;
    let headers = reader
        .headers()
        .map_err(|e| SyncError::load(&origin, e))?
        .clone();
    let mut indexed = Vec::with_capacity(columns.len());
    for (header, col) in &columns {
        let idx = headers.iter().position(|h| h == header).ok_or_else(|| {
            SyncError::load(&origin, format!("column '{header}' not found in CSV header"))
        })?;
        indexed.push((idx, col));
    }

    let mut records = Vec::new();
    for (row_no, row) in reader.records().enumerate() {
        let row = row.map_err(|e| SyncError::load(&origin, e))?;
        let fields = indexed
            .iter()
            .filter_map(|(idx, col)| {
                let cell = row.get(*idx).unwrap_or_default();
                (!cell.is_empty()).then(|| (col.target.clone(), cell_value(cell, col)))
            })
            .collect();
        records.push(RecordSpec {
            db_key: map.target_db.clone(),
            // header is line 1
            source: format!("{origin}:{}", row_no + 2),
            fields,
        });
    }
    debug!(path = %origin, rows = records.len(), "loaded csv");
    Ok(DataSet {
        targets: vec![TargetRecords {
            db_key: map.target_db.clone(),
            options: map.defaults.resolve(&RawDefaults::default()),
            records,
        }],
    })
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    parent_page_id: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    cover: Option<String>,
    #[serde(default)]
    cover_url: Option<String>,
}

/// Split a leading `---` YAML block off a Markdown document.
/// Returns `(front matter, body)`.
pub fn split_front_matter(text: &str) -> Result<(Option<&str>, &str), String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(after) = text.strip_prefix("---") else {
        return Ok((None, text));
    };
    let Some(rest) = after
        .strip_prefix("\r\n")
        .or_else(|| after.strip_prefix('\n'))
    else {
        return Ok((None, text));
    };
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Ok((Some(&rest[..offset]), &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    Err("unterminated front matter".into())
}

fn collect_markdown(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), SyncError> {
    let entries = fs::read_dir(dir).map_err(|e| SyncError::load(dir.display(), e))?;
    for entry in entries {
        let path = entry.map_err(|e| SyncError::load(dir.display(), e))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_markdown(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("md"))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Every `*.md` under `dir` (recursive, sorted by path), compiled.
pub fn load_pages(dir: &Path, default_parent: Option<&str>) -> Result<Vec<PageSpec>, SyncError> {
    if !dir.is_dir() {
        return Err(SyncError::load(dir.display(), "not a directory"));
    }
    let mut files = Vec::new();
    collect_markdown(dir, &mut files)?;
    files.sort();

    let mut seen = HashSet::new();
    let mut pages = Vec::with_capacity(files.len());
    for path in files {
        let text = read(&path)?;
        let (yaml, body) =
            split_front_matter(&text).map_err(|m| SyncError::load(path.display(), m))?;
        let fm: FrontMatter = match yaml {
            Some(y) if !y.trim().is_empty() => {
                serde_yaml::from_str(y).map_err(|e| SyncError::load(path.display(), e))?
            }
            _ => FrontMatter::default(),
        };
        let title = fm
            .title
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .ok_or_else(|| SyncError::load(path.display(), "cannot derive a page title"))?;
        let parent_page_id = fm
            .parent_page_id
            .filter(|p| !p.trim().is_empty())
            .or_else(|| default_parent.map(str::to_string))
            .ok_or_else(|| {
                SyncError::validation(format!(
                    "{}: no parent_page_id in front matter and no default parent",
                    path.display()
                ))
            })?;
        if !seen.insert((normalize_id(&parent_page_id), title.clone())) {
            return Err(SyncError::validation(format!(
                "duplicate page '{title}' under {parent_page_id} ({})",
                path.display()
            )));
        }
        pages.push(PageSpec {
            blocks: compile(body),
            source: path,
            title,
            parent_page_id,
            icon: fm.icon,
            cover_url: fm.cover_url.or(fm.cover),
        });
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Block;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    const SCHEMA: &str = r#"
version: "1"
workspace:
  parent_page_id: "root-page"
databases:
  - db_key: customers
    title: Customers
    properties:
      Name: { type: title }
      Status:
        type: select
        options: [Active, { name: Prospect, color: blue }]
      Revenue: { type: number, format: dollar }
  - db_key: orders
    title: Orders
    update_mode: replace
    match: { by: title, value: "Order Book" }
    properties:
      Order: { type: title }
relations:
  - from_db: orders
    property_name: Customer
    to_db: customers
    synced_property_name: Orders
"#;

    #[test]
    fn schema_keeps_property_order_and_defaults() {
        let spec = parse_schema(SCHEMA, "schema.yaml").unwrap();
        assert_eq!(spec.parent_page_id, "root-page");
        let customers = &spec.databases[0];
        let names: Vec<&str> = customers.properties.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Name", "Status", "Revenue"]);
        assert_eq!(customers.update_mode, UpdateMode::Merge);
        assert_eq!(customers.match_rule.value, "Customers");
        assert_eq!(
            customers.property("Status").unwrap().options().unwrap()[1],
            SelectOption {
                name: "Prospect".into(),
                color: Some("blue".into())
            }
        );
        assert_eq!(spec.databases[1].match_rule.value, "Order Book");
        assert_eq!(spec.relations[0].on_missing, OnMissing::Skip);
    }

    #[test]
    fn schema_requires_parent_page() {
        let err = parse_schema("databases: []\n", "s.yaml").unwrap_err();
        assert!(err.to_string().contains("parent_page_id"));
    }

    #[test]
    fn schema_rejects_duplicates_and_unknown_types() {
        let dup = "workspace: { parent_page_id: p }\ndatabases:\n  - { db_key: a, title: A }\n  - { db_key: a, title: B }\n";
        assert!(matches!(parse_schema(dup, "s"), Err(SyncError::Validation(m)) if m.contains("duplicate db_key")));
        let bad = "workspace: { parent_page_id: p }\ndatabases:\n  - db_key: a\n    title: A\n    properties:\n      X: { type: formula }\n";
        assert!(matches!(parse_schema(bad, "s"), Err(SyncError::Validation(m)) if m.contains("formula")));
        let two_titles = "workspace: { parent_page_id: p }\ndatabases:\n  - db_key: a\n    title: A\n    properties:\n      X: { type: title }\n      Y: { type: title }\n";
        assert!(matches!(parse_schema(two_titles, "s"), Err(SyncError::Validation(_))));
    }

    #[test]
    fn options_only_on_select_types() {
        let misplaced = "workspace: { parent_page_id: p }\ndatabases:\n  - db_key: a\n    title: A\n    properties:\n      Done: { type: checkbox, options: [done] }\n";
        assert!(matches!(
            parse_schema(misplaced, "s"),
            Err(SyncError::Validation(m)) if m.contains("'checkbox' does not take options")
        ));
        let fine = "workspace: { parent_page_id: p }\ndatabases:\n  - db_key: a\n    title: A\n    properties:\n      Tags: { type: multi_select, options: [x, { name: y, color: red }] }\n";
        let spec = parse_schema(fine, "s").unwrap();
        assert_eq!(
            spec.databases[0].property("Tags").and_then(PropertyKind::options).map(<[_]>::len),
            Some(2)
        );
    }

    #[test]
    fn malformed_yaml_is_a_load_error() {
        assert!(matches!(parse_schema("databases: [", "s"), Err(SyncError::Load { .. })));
    }

    #[test]
    fn data_yaml_applies_defaults_and_overrides() {
        let text = r#"
defaults:
  match_on: external_id
  create_missing_select_options: true
overrides:
  orders:
    match_on: order_no
data:
  customers:
    - { external_id: cust-001, Name: Acme, Tags: [a, b] }
  orders:
    - { order_no: 7, Total: 12.5 }
"#;
        let data = parse_data(text, "data.yaml").unwrap();
        assert_eq!(data.targets.len(), 2);
        let customers = &data.targets[0];
        assert_eq!(customers.options.match_on, "external_id");
        assert!(customers.options.create_missing_select_options);
        assert_eq!(customers.records[0].field("Tags"), Some(&serde_json::json!(["a", "b"])));
        assert_eq!(customers.records[0].source, "data.yaml:customers[0]");
        let orders = &data.targets[1];
        assert_eq!(orders.options.match_on, "order_no");
        assert!(orders.options.create_missing_select_options);
        assert_eq!(orders.records[0].field("Total"), Some(&serde_json::json!(12.5)));
    }

    #[test]
    fn csv_without_map_is_rejected() {
        let err = load_data(Path::new("rows.csv"), None).unwrap_err();
        assert!(matches!(err, SyncError::Validation(m) if m.contains("map file")));
    }

    #[test]
    fn csv_columns_follow_the_map() {
        let td = tempdir().unwrap();
        let csv_path = td.path().join("people.csv");
        fs::write(
            &csv_path,
            "Id,Full Name,Score,Active,Tags,Ignored\nc-1,Ada,9.5,yes,\"a; b\",zzz\nc-2,,x,no,,\n",
        )
        .unwrap();
        let map_path = td.path().join("map.yaml");
        fs::write(
            &map_path,
            r#"
target_db: people
defaults: { match_on: external_id }
columns:
  Id: external_id
  Full Name: { as: Name }
  Score: { as: Score, type: number }
  Active: { as: Active, type: checkbox }
  Tags: { as: Tags, type: list, separator: ";" }
"#,
        )
        .unwrap();
        let data = load_data(&csv_path, Some(&map_path)).unwrap();
        let target = &data.targets[0];
        assert_eq!(target.db_key, "people");
        let first = &target.records[0];
        assert_eq!(first.field("Name"), Some(&serde_json::json!("Ada")));
        assert_eq!(first.field("Score"), Some(&serde_json::json!(9.5)));
        assert_eq!(first.field("Active"), Some(&serde_json::json!(true)));
        assert_eq!(first.field("Tags"), Some(&serde_json::json!(["a", "b"])));
        assert!(first.field("Ignored").is_none());
        let second = &target.records[1];
        assert!(second.field("Name").is_none());
        // unparseable numbers stay strings so coercion reports them
        assert_eq!(second.field("Score"), Some(&serde_json::json!("x")));
        assert_eq!(second.source, format!("{}:3", csv_path.display()));
    }

    #[test]
    fn split_front_matter_handles_bom_and_absence() {
        let (fm, body) = split_front_matter("\u{feff}---\ntitle: T\n---\n# Hello\n\nThis is a test.").unwrap();
        assert_eq!(fm, Some("title: T\n"));
        assert_eq!(body, "# Hello\n\nThis is a test.");
        let (fm, body) = split_front_matter("# No front matter").unwrap();
        assert!(fm.is_none());
        assert_eq!(body, "# No front matter");
        assert!(split_front_matter("---\ntitle: T\n# never closed").is_err());
    }

    #[test]
    fn pages_load_sorted_with_fallbacks() {
        let td = tempdir().unwrap();
        fs::create_dir(td.path().join("sub")).unwrap();
        fs::write(
            td.path().join("b.md"),
            "---\ntitle: Second\nicon: \"📘\"\ncover: https://img/c.png\n---\n# Hi\n",
        )
        .unwrap();
        fs::write(td.path().join("sub").join("a.md"), "Body only\n").unwrap();
        fs::write(td.path().join("notes.txt"), "ignored").unwrap();

        let pages = load_pages(td.path(), Some("root")).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].title, "Second");
        assert_eq!(pages[0].cover_url.as_deref(), Some("https://img/c.png"));
        assert_eq!(pages[0].icon.as_deref(), Some("📘"));
        assert_eq!(pages[1].title, "a");
        assert_eq!(pages[1].parent_page_id, "root");
        assert!(matches!(pages[1].blocks[0], Block::Paragraph { .. }));
    }

    #[test]
    fn pages_without_parent_or_with_duplicates_fail() {
        let td = tempdir().unwrap();
        fs::write(td.path().join("a.md"), "x").unwrap();
        assert!(matches!(load_pages(td.path(), None), Err(SyncError::Validation(_))));

        fs::write(td.path().join("b.md"), "---\ntitle: a\n---\ny").unwrap();
        let err = load_pages(td.path(), Some("root")).unwrap_err();
        assert!(matches!(err, SyncError::Validation(m) if m.contains("duplicate page")));
    }

    #[test]
    fn schema_file_round_trips_through_disk() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SCHEMA.as_bytes()).unwrap();
        let spec = load_schema(file.path()).unwrap();
        assert_eq!(spec.databases.len(), 2);
        assert!(matches!(
            load_schema(Path::new("/definitely/missing.yaml")),
            Err(SyncError::Load { .. })
        ));
    }
}
