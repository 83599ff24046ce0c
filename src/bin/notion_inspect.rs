use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use notion_sync::config;
use notion_sync::model::PropertyKind;
use notion_sync::notion::{NotionClient, WorkspaceService};
use serde_yaml::{Mapping, Value};

/// Print a remote database as a schema-file entry, to bootstrap a schema.
#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Database ID to inspect
    #[arg(long)]
    db_id: String,

    /// db_key to use in the printed entry
    #[arg(long, default_value = "inspected")]
    db_key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let client = NotionClient::from_config(&cfg)?;

    let schema = client.get_database_schema(&args.db_id).await?;

    let mut properties = Mapping::new();
    let mut skipped = Vec::new();
    for (name, kind) in &schema.properties {
        match kind {
            PropertyKind::Relation { database_id, .. } => {
                skipped.push(format!("{name}: relation to {database_id}"))
            }
            PropertyKind::Other { remote_type } => {
                skipped.push(format!("{name}: unsupported type {remote_type}"))
            }
            _ => {
                properties.insert(Value::from(name.as_str()), serde_yaml::to_value(kind)?);
            }
        }
    }

    let mut db = Mapping::new();
    db.insert("db_key".into(), args.db_key.into());
    db.insert("title".into(), schema.title.clone().into());
    db.insert("properties".into(), Value::Mapping(properties));
    let mut doc = Mapping::new();
    doc.insert(
        "databases".into(),
        Value::Sequence(vec![Value::Mapping(db)]),
    );

    println!("# database {}", schema.id);
    print!("{}", serde_yaml::to_string(&doc)?);
    for line in skipped {
        println!("# not representable as a property: {line}");
    }
    Ok(())
}
