//! Desired-state specs, observed remote state and the typed values that flow
//! between them.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    #[default]
    Merge,
    Replace,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OnMissing {
    #[default]
    Skip,
    Error,
}

/// How a database spec finds its remote counterpart. Only title matching
/// exists today.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchRule {
    pub by: MatchBy,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchBy {
    Title,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectOption {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl SelectOption {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: None,
        }
    }
}

/// Property type plus its type-specific configuration. `Relation` and
/// `Other` only ever come from the remote side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyKind {
    Title,
    RichText,
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    Select {
        options: Vec<SelectOption>,
    },
    MultiSelect {
        options: Vec<SelectOption>,
    },
    Date,
    Files,
    Url,
    Email,
    PhoneNumber,
    Checkbox,
    Relation {
        database_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        synced_property_name: Option<String>,
    },
    Other {
        remote_type: String,
    },
}

impl PropertyKind {
    pub fn type_name(&self) -> &str {
        match self {
            PropertyKind::Title => "title",
            PropertyKind::RichText => "rich_text",
            PropertyKind::Number { .. } => "number",
            PropertyKind::Select { .. } => "select",
            PropertyKind::MultiSelect { .. } => "multi_select",
            PropertyKind::Date => "date",
            PropertyKind::Files => "files",
            PropertyKind::Url => "url",
            PropertyKind::Email => "email",
            PropertyKind::PhoneNumber => "phone_number",
            PropertyKind::Checkbox => "checkbox",
            PropertyKind::Relation { .. } => "relation",
            PropertyKind::Other { remote_type } => remote_type,
        }
    }

    pub fn options(&self) -> Option<&[SelectOption]> {
        match self {
            PropertyKind::Select { options } | PropertyKind::MultiSelect { options } => {
                Some(options)
            }
            _ => None,
        }
    }

    /// Same type, configuration ignored.
    pub fn same_type(&self, other: &PropertyKind) -> bool {
        self.type_name() == other.type_name()
    }

    /// Build a kind from a declared type string. Only the types a schema file
    /// may declare are accepted.
    pub fn declared(
        property: &str,
        type_name: &str,
        format: Option<String>,
        options: Vec<SelectOption>,
    ) -> Result<Self, String> {
        let had_options = !options.is_empty();
        let kind = match type_name {
            "title" => PropertyKind::Title,
            "rich_text" => PropertyKind::RichText,
            "number" => PropertyKind::Number { format },
            "select" => PropertyKind::Select { options },
            "multi_select" => PropertyKind::MultiSelect { options },
            "date" => PropertyKind::Date,
            "files" => PropertyKind::Files,
            "url" => PropertyKind::Url,
            "email" => PropertyKind::Email,
            "phone_number" => PropertyKind::PhoneNumber,
            "checkbox" => PropertyKind::Checkbox,
            "relation" => {
                return Err(format!(
                    "property '{property}': relations are declared under `relations`, not as a property type"
                ))
            }
            other => return Err(format!("property '{property}': unknown property type '{other}'")),
        };
        if let Some(opts) = kind.options() {
            let mut seen = std::collections::HashSet::new();
            for opt in opts {
                if !seen.insert(opt.name.as_str()) {
                    return Err(format!(
                        "property '{property}': duplicate option '{}'",
                        opt.name
                    ));
                }
            }
        } else if had_options {
            return Err(format!(
                "property '{property}': type '{type_name}' does not take options"
            ));
        }
        Ok(kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSpec {
    pub db_key: String,
    pub title: String,
    pub match_rule: MatchRule,
    pub update_mode: UpdateMode,
    pub properties: Vec<(String, PropertyKind)>,
}

impl DatabaseSpec {
    pub fn property(&self, name: &str) -> Option<&PropertyKind> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| k)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSpec {
    pub from_db: String,
    pub property_name: String,
    pub to_db: String,
    pub synced_property_name: Option<String>,
    pub on_missing: OnMissing,
}

impl RelationSpec {
    pub fn label(&self) -> String {
        format!("{}.{} -> {}", self.from_db, self.property_name, self.to_db)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaSpec {
    pub parent_page_id: String,
    pub databases: Vec<DatabaseSpec>,
    pub relations: Vec<RelationSpec>,
}

impl SchemaSpec {
    pub fn database(&self, db_key: &str) -> Option<&DatabaseSpec> {
        self.databases.iter().find(|d| d.db_key == db_key)
    }
}

/// One desired record. `source` locates it in the input for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSpec {
    pub db_key: String,
    pub source: String,
    pub fields: Vec<(String, Value)>,
}

impl RecordSpec {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Ingestion settings for one target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub match_on: String,
    pub create_missing_select_options: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            match_on: "external_id".into(),
            create_missing_select_options: false,
        }
    }
}

/// Records grouped by target database, in input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataSet {
    pub targets: Vec<TargetRecords>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetRecords {
    pub db_key: String,
    pub options: IngestOptions,
    pub records: Vec<RecordSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    pub source: PathBuf,
    pub title: String,
    pub parent_page_id: String,
    pub icon: Option<String>,
    pub cover_url: Option<String>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub id: String,
    pub title: String,
    pub parent_page_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    pub id: String,
    pub title: String,
    pub properties: Vec<(String, PropertyKind)>,
}

impl DatabaseSchema {
    pub fn property(&self, name: &str) -> Option<&PropertyKind> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| k)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSummary {
    pub id: String,
    pub parent_page_id: String,
    pub title: String,
    pub icon: Option<String>,
    pub cover_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateValue {
    pub start: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRef {
    pub url: String,
    pub name: String,
}

/// A coerced, typed property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Title(String),
    RichText(String),
    Number(f64),
    Select(String),
    MultiSelect(Vec<String>),
    Date(DateValue),
    Files(Vec<FileRef>),
    Url(String),
    Email(String),
    PhoneNumber(String),
    Checkbox(bool),
}

impl PropertyValue {
    /// Short human-readable rendering used in plan output and match keys.
    pub fn display(&self) -> String {
        match self {
            PropertyValue::Title(s)
            | PropertyValue::RichText(s)
            | PropertyValue::Select(s)
            | PropertyValue::Url(s)
            | PropertyValue::Email(s)
            | PropertyValue::PhoneNumber(s) => s.clone(),
            PropertyValue::Number(n) => n.to_string(),
            PropertyValue::MultiSelect(v) => v.join(", "),
            PropertyValue::Date(d) => match &d.end {
                Some(end) => format!("{} → {}", d.start, end),
                None => d.start.clone(),
            },
            PropertyValue::Files(files) => files
                .iter()
                .map(|f| f.url.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            PropertyValue::Checkbox(b) => b.to_string(),
        }
    }
}

/// Inline text run of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Span {
    Text {
        content: String,
        bold: bool,
        italic: bool,
        code: bool,
    },
    Link {
        content: String,
        url: String,
    },
}

impl Span {
    pub fn plain(content: impl Into<String>) -> Self {
        Span::Text {
            content: content.into(),
            bold: false,
            italic: false,
            code: false,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Span::Text { content, .. } | Span::Link { content, .. } => content,
        }
    }
}

/// A typed content block, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Heading { level: u8, spans: Vec<Span> },
    Paragraph { spans: Vec<Span> },
    BulletedItem { spans: Vec<Span> },
    NumberedItem { spans: Vec<Span> },
    Code { language: String, text: String },
    Table { rows: Vec<Vec<Vec<Span>>> },
    Image { url: String, caption: Option<String> },
    Divider,
    Callout { spans: Vec<Span> },
}

impl Block {
    pub fn kind(&self) -> &'static str {
        match self {
            Block::Heading { .. } => "heading",
            Block::Paragraph { .. } => "paragraph",
            Block::BulletedItem { .. } => "bulleted_item",
            Block::NumberedItem { .. } => "numbered_item",
            Block::Code { .. } => "code",
            Block::Table { .. } => "table",
            Block::Image { .. } => "image",
            Block::Divider => "divider",
            Block::Callout { .. } => "callout",
        }
    }
}

/// Observed page body. Remote blocks with no `Block` counterpart are only
/// counted; any of them means the body differs from every compiled page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageBody {
    pub blocks: Vec<Block>,
    pub unsupported: usize,
}

impl PageBody {
    pub fn matches(&self, blocks: &[Block]) -> bool {
        self.unsupported == 0 && self.blocks == blocks
    }
}

/// Canonical form of a remote id: dashes stripped, lowercase.
pub fn normalize_id(id: &str) -> String {
    id.chars()
        .filter(|c| *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}
