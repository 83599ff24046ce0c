use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use notion_sync::config::{self, Config};
use notion_sync::driver::{Driver, DriverSettings, Inputs};
use notion_sync::error::SyncError;
use notion_sync::loader;
use notion_sync::notion::NotionClient;

#[derive(Debug, Parser)]
#[command(author, version, about = "Converge a Notion workspace onto declarative files")]
struct Args {
    /// Path to YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Maximum concurrent lanes while applying (overrides apply.concurrency)
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or update databases and relations from a schema file
    ApplySchema { schema_file: PathBuf },
    /// Upsert records from a YAML data file or a CSV file plus column map
    Ingest {
        data_file: PathBuf,
        #[arg(long)]
        map: Option<PathBuf>,
        /// Find databases through this schema's match rules instead of by
        /// title; the schema itself is not applied
        #[arg(long)]
        schema: Option<PathBuf>,
    },
    /// Publish a directory of markdown files as pages
    PublishPages {
        directory: PathBuf,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Print the operations a run would perform without writing anything
    Plan {
        #[arg(long)]
        schema: Option<PathBuf>,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        map: Option<PathBuf>,
        #[arg(long)]
        pages: Option<PathBuf>,
        #[arg(long)]
        parent: Option<String>,
        /// Emit the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn inputs(&self, cfg: &Config) -> Result<Inputs, SyncError> {
        let default_parent = cfg.workspace.parent_page_id.as_deref();
        let mut inputs = Inputs::default();
        match self {
            Command::ApplySchema { schema_file } => {
                inputs.schema = Some(loader::load_schema(schema_file)?);
            }
            Command::Ingest {
                data_file,
                map,
                schema,
            } => {
                inputs.lookup = schema.as_deref().map(loader::load_schema).transpose()?;
                inputs.data = Some(loader::load_data(data_file, map.as_deref())?);
            }
            Command::PublishPages { directory, parent } => {
                let parent = parent.as_deref().or(default_parent);
                inputs.pages = loader::load_pages(directory, parent)?;
            }
            Command::Plan {
                schema,
                data,
                map,
                pages,
                parent,
                ..
            } => {
                if schema.is_none() && data.is_none() && pages.is_none() {
                    return Err(SyncError::validation(
                        "plan needs at least one of --schema, --data or --pages",
                    ));
                }
                inputs.schema = schema.as_deref().map(loader::load_schema).transpose()?;
                inputs.data = data
                    .as_deref()
                    .map(|d| loader::load_data(d, map.as_deref()))
                    .transpose()?;
                if let Some(dir) = pages {
                    let parent = parent.as_deref().or(default_parent);
                    inputs.pages = loader::load_pages(dir, parent)?;
                }
            }
        }
        Ok(inputs)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(%err, "run aborted");
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<u8, SyncError> {
    let mut cfg = config::load(Some(&args.config))
        .map_err(|err| SyncError::load(args.config.display(), err))?;
    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(SyncError::validation("--concurrency must be > 0"));
        }
        cfg.apply.concurrency = concurrency;
    }

    let inputs = args.command.inputs(&cfg)?;
    let client = NotionClient::from_config(&cfg)
        .map_err(|err| SyncError::validation(format!("{err:#}")))?;
    let driver = Driver::new(&client, DriverSettings::from_config(&cfg));

    match args.command {
        Command::Plan { json, .. } => {
            let plan = driver.plan(&inputs).await?;
            if json {
                let out = serde_json::to_string_pretty(&plan)
                    .map_err(|err| SyncError::validation(err.to_string()))?;
                println!("{out}");
            } else {
                print!("{}", plan.render());
            }
            Ok(if plan.failures.is_empty() { 0 } else { 1 })
        }
        _ => {
            let report = driver.apply(&inputs).await?;
            print!("{}", report.render());
            Ok(report.exit_code())
        }
    }
}
