//! Domain types ⇄ Notion API JSON.
use serde_json::{json, Map, Value};

use crate::coerce::normalize_date;
use crate::markdown::merge_text;
use crate::model::{Block, DateValue, FileRef, PropertyKind, PropertyValue, SelectOption, Span};

/// Notion rejects rich text objects longer than this.
const MAX_TEXT_LEN: usize = 2000;

const CALLOUT_EMOJI: &str = "💡";

const LANGUAGES: &[&str] = &[
    "abap", "arduino", "bash", "basic", "c", "clojure", "coffeescript", "c++", "c#", "css",
    "dart", "diff", "docker", "elixir", "elm", "erlang", "flow", "fortran", "f#", "gherkin",
    "glsl", "go", "graphql", "groovy", "haskell", "html", "java", "javascript", "json", "julia",
    "kotlin", "latex", "less", "lisp", "livescript", "lua", "makefile", "markdown", "markup",
    "matlab", "mermaid", "nix", "objective-c", "ocaml", "pascal", "perl", "php", "plain text",
    "powershell", "prolog", "protobuf", "python", "r", "reason", "ruby", "rust", "sass", "scala",
    "scheme", "scss", "shell", "sql", "swift", "toml", "typescript", "vb.net", "verilog", "vhdl",
    "visual basic", "webassembly", "xml", "yaml",
];

/// Map a fence info string to a language Notion accepts. Unknown or empty
/// tags become "plain text".
pub fn notion_language(tag: &str) -> &'static str {
    let tag = tag.trim().to_ascii_lowercase();
    let alias = match tag.as_str() {
        "sh" | "zsh" => "shell",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "py" => "python",
        "rs" => "rust",
        "yml" => "yaml",
        "md" => "markdown",
        "cpp" => "c++",
        "csharp" | "cs" => "c#",
        "dockerfile" => "docker",
        "text" | "txt" | "plaintext" => "plain text",
        other => other,
    };
    LANGUAGES
        .iter()
        .find(|l| **l == alias)
        .copied()
        .unwrap_or("plain text")
}

fn language_from_notion(language: &str) -> String {
    if language == "plain text" {
        String::new()
    } else {
        language.to_string()
    }
}

/// The blocks as Notion will store them, so a compiled page compares equal
/// to its observed copy once published.
pub fn canonical_blocks(blocks: &[Block]) -> Vec<Block> {
    blocks
        .iter()
        .map(|b| match b {
            Block::Code { language, text } => Block::Code {
                language: language_from_notion(notion_language(language)),
                text: text.clone(),
            },
            other => other.clone(),
        })
        .collect()
}

fn chunks(content: &str) -> Vec<String> {
    if content.chars().count() <= MAX_TEXT_LEN {
        return vec![content.to_string()];
    }
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(MAX_TEXT_LEN)
        .map(|c| c.iter().collect())
        .collect()
}

pub fn plain_rich_text(content: &str) -> Vec<Value> {
    if content.is_empty() {
        return Vec::new();
    }
    chunks(content)
        .into_iter()
        .map(|c| json!({ "type": "text", "text": { "content": c } }))
        .collect()
}

pub fn spans_to_rich_text(spans: &[Span]) -> Vec<Value> {
    let mut out = Vec::new();
    for span in spans {
        match span {
            Span::Text {
                content,
                bold,
                italic,
                code,
            } => {
                for c in chunks(content) {
                    out.push(json!({
                        "type": "text",
                        "text": { "content": c },
                        "annotations": { "bold": bold, "italic": italic, "code": code },
                    }));
                }
            }
            Span::Link { content, url } => {
                for c in chunks(content) {
                    out.push(json!({
                        "type": "text",
                        "text": { "content": c, "link": { "url": url } },
                    }));
                }
            }
        }
    }
    out
}

pub fn spans_from_rich_text(items: &[Value]) -> Vec<Span> {
    let mut spans = Vec::new();
    for item in items {
        let content = item["text"]["content"]
            .as_str()
            .or_else(|| item["plain_text"].as_str())
            .unwrap_or_default()
            .to_string();
        if let Some(url) = item["text"]["link"]["url"].as_str() {
            spans.push(Span::Link {
                content,
                url: url.to_string(),
            });
            continue;
        }
        let flag = |name: &str| item["annotations"][name].as_bool().unwrap_or(false);
        spans.push(Span::Text {
            content,
            bold: flag("bold"),
            italic: flag("italic"),
            code: flag("code"),
        });
    }
    merge_text(spans)
}

/// Concatenated plain text of a rich text array.
pub fn plain_text(items: &[Value]) -> String {
    items
        .iter()
        .filter_map(|i| i["plain_text"].as_str().or_else(|| i["text"]["content"].as_str()))
        .collect()
}

fn options_json(options: &[SelectOption]) -> Value {
    Value::Array(
        options
            .iter()
            .map(|o| match &o.color {
                Some(color) => json!({ "name": o.name, "color": color }),
                None => json!({ "name": o.name }),
            })
            .collect(),
    )
}

/// Property schema object for database create/update payloads.
pub fn kind_to_json(kind: &PropertyKind) -> Value {
    match kind {
        PropertyKind::Number { format } => {
            json!({ "number": { "format": format.as_deref().unwrap_or("number") } })
        }
        PropertyKind::Select { options } => json!({ "select": { "options": options_json(options) } }),
        PropertyKind::MultiSelect { options } => {
            json!({ "multi_select": { "options": options_json(options) } })
        }
        PropertyKind::Relation {
            database_id,
            synced_property_name,
        } => match synced_property_name {
            Some(synced) => json!({
                "relation": {
                    "database_id": database_id,
                    "type": "dual_property",
                    "dual_property": { "synced_property_name": synced },
                }
            }),
            None => json!({
                "relation": {
                    "database_id": database_id,
                    "type": "single_property",
                    "single_property": {},
                }
            }),
        },
        other => {
            let mut obj = Map::new();
            obj.insert(other.type_name().to_string(), json!({}));
            Value::Object(obj)
        }
    }
}

pub fn kind_from_json(prop: &Value) -> PropertyKind {
    let typ = prop["type"].as_str().unwrap_or_default();
    let config = &prop[typ];
    let options = || -> Vec<SelectOption> {
        config["options"]
            .as_array()
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| {
                        Some(SelectOption {
                            name: o["name"].as_str()?.to_string(),
                            color: o["color"].as_str().map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };
    match typ {
        "title" => PropertyKind::Title,
        "rich_text" => PropertyKind::RichText,
        "number" => PropertyKind::Number {
            format: config["format"].as_str().map(str::to_string),
        },
        "select" => PropertyKind::Select { options: options() },
        "multi_select" => PropertyKind::MultiSelect { options: options() },
        "date" => PropertyKind::Date,
        "files" => PropertyKind::Files,
        "url" => PropertyKind::Url,
        "email" => PropertyKind::Email,
        "phone_number" => PropertyKind::PhoneNumber,
        "checkbox" => PropertyKind::Checkbox,
        "relation" => PropertyKind::Relation {
            database_id: config["database_id"].as_str().unwrap_or_default().to_string(),
            synced_property_name: config["dual_property"]["synced_property_name"]
                .as_str()
                .map(str::to_string),
        },
        other => PropertyKind::Other {
            remote_type: other.to_string(),
        },
    }
}

/// Property value object for page create/update payloads.
pub fn value_to_json(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Title(s) => json!({ "title": plain_rich_text(s) }),
        PropertyValue::RichText(s) => json!({ "rich_text": plain_rich_text(s) }),
        PropertyValue::Number(n) => json!({ "number": n }),
        PropertyValue::Select(name) => json!({ "select": { "name": name } }),
        PropertyValue::MultiSelect(names) => json!({
            "multi_select": names.iter().map(|n| json!({ "name": n })).collect::<Vec<_>>()
        }),
        PropertyValue::Date(d) => json!({ "date": { "start": d.start, "end": d.end } }),
        PropertyValue::Files(files) => json!({
            "files": files
                .iter()
                .map(|f| json!({ "name": f.name, "type": "external", "external": { "url": f.url } }))
                .collect::<Vec<_>>()
        }),
        PropertyValue::Url(s) => json!({ "url": s }),
        PropertyValue::Email(s) => json!({ "email": s }),
        PropertyValue::PhoneNumber(s) => json!({ "phone_number": s }),
        PropertyValue::Checkbox(b) => json!({ "checkbox": b }),
    }
}

/// Observed property value. Empty scalars (null number, select, date, url …)
/// and kinds with no `PropertyValue` counterpart are `None`.
pub fn value_from_json(prop: &Value) -> Option<PropertyValue> {
    let typ = prop["type"].as_str()?;
    let v = &prop[typ];
    let string = || v.as_str().map(str::to_string);
    match typ {
        "title" => Some(PropertyValue::Title(plain_text(v.as_array()?))),
        "rich_text" => Some(PropertyValue::RichText(plain_text(v.as_array()?))),
        "number" => v.as_f64().map(PropertyValue::Number),
        "select" => v["name"].as_str().map(|n| PropertyValue::Select(n.to_string())),
        "multi_select" => Some(PropertyValue::MultiSelect(
            v.as_array()?
                .iter()
                .filter_map(|o| o["name"].as_str().map(str::to_string))
                .collect(),
        )),
        "date" => {
            let start = v["start"].as_str()?;
            Some(PropertyValue::Date(DateValue {
                start: normalize_date(start).unwrap_or_else(|| start.to_string()),
                end: v["end"]
                    .as_str()
                    .map(|e| normalize_date(e).unwrap_or_else(|| e.to_string())),
            }))
        }
        "files" => Some(PropertyValue::Files(
            v.as_array()?
                .iter()
                .filter_map(|f| {
                    let url = f["external"]["url"]
                        .as_str()
                        .or_else(|| f["file"]["url"].as_str())?;
                    Some(FileRef {
                        url: url.to_string(),
                        name: f["name"].as_str().unwrap_or(url).to_string(),
                    })
                })
                .collect(),
        )),
        "url" => string().map(PropertyValue::Url),
        "email" => string().map(PropertyValue::Email),
        "phone_number" => string().map(PropertyValue::PhoneNumber),
        "checkbox" => v.as_bool().map(PropertyValue::Checkbox),
        _ => None,
    }
}

fn block(typ: &str, body: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("object".into(), json!("block"));
    obj.insert("type".into(), json!(typ));
    obj.insert(typ.to_string(), body);
    Value::Object(obj)
}

pub fn block_to_json(b: &Block) -> Value {
    match b {
        Block::Heading { level, spans } => block(
            &format!("heading_{}", (*level).clamp(1, 3)),
            json!({ "rich_text": spans_to_rich_text(spans) }),
        ),
        Block::Paragraph { spans } => {
            block("paragraph", json!({ "rich_text": spans_to_rich_text(spans) }))
        }
        Block::BulletedItem { spans } => block(
            "bulleted_list_item",
            json!({ "rich_text": spans_to_rich_text(spans) }),
        ),
        Block::NumberedItem { spans } => block(
            "numbered_list_item",
            json!({ "rich_text": spans_to_rich_text(spans) }),
        ),
        Block::Code { language, text } => block(
            "code",
            json!({ "rich_text": plain_rich_text(text), "language": notion_language(language) }),
        ),
        Block::Table { rows } => {
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            let children: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let mut cells: Vec<Value> = row
                        .iter()
                        .map(|cell| Value::Array(spans_to_rich_text(cell)))
                        .collect();
                    cells.resize(width, Value::Array(Vec::new()));
                    block("table_row", json!({ "cells": cells }))
                })
                .collect();
            block(
                "table",
                json!({
                    "table_width": width,
                    "has_column_header": true,
                    "has_row_header": false,
                    "children": children,
                }),
            )
        }
        Block::Image { url, caption } => block(
            "image",
            json!({
                "type": "external",
                "external": { "url": url },
                "caption": plain_rich_text(caption.as_deref().unwrap_or_default()),
            }),
        ),
        Block::Divider => block("divider", json!({})),
        Block::Callout { spans } => block(
            "callout",
            json!({
                "rich_text": spans_to_rich_text(spans),
                "icon": { "type": "emoji", "emoji": CALLOUT_EMOJI },
            }),
        ),
    }
}

/// Observed block → `Block`. `rows` carries the `table_row` children of a
/// table block. Types this tool never writes yield `None`.
pub fn block_from_json(value: &Value, rows: &[Value]) -> Option<Block> {
    let typ = value["type"].as_str()?;
    let body = &value[typ];
    let rich = || {
        spans_from_rich_text(body["rich_text"].as_array().map(Vec::as_slice).unwrap_or_default())
    };
    let b = match typ {
        "heading_1" => Block::Heading { level: 1, spans: rich() },
        "heading_2" => Block::Heading { level: 2, spans: rich() },
        "heading_3" => Block::Heading { level: 3, spans: rich() },
        "paragraph" => Block::Paragraph { spans: rich() },
        "bulleted_list_item" => Block::BulletedItem { spans: rich() },
        "numbered_list_item" => Block::NumberedItem { spans: rich() },
        "code" => Block::Code {
            language: language_from_notion(body["language"].as_str().unwrap_or("plain text")),
            text: plain_text(body["rich_text"].as_array()?),
        },
        "table" => Block::Table {
            rows: rows
                .iter()
                .filter_map(|r| r["table_row"]["cells"].as_array())
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| spans_from_rich_text(c.as_array().map(Vec::as_slice).unwrap_or_default()))
                        .collect()
                })
                .collect(),
        },
        "image" => {
            let url = body["external"]["url"]
                .as_str()
                .or_else(|| body["file"]["url"].as_str())?;
            let caption = body["caption"]
                .as_array()
                .map(|c| plain_text(c))
                .filter(|c| !c.is_empty());
            Block::Image {
                url: url.to_string(),
                caption,
            }
        }
        "divider" => Block::Divider,
        "callout" => Block::Callout { spans: rich() },
        _ => return None,
    };
    Some(b)
}
