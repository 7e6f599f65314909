use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use datasync::config::ConfigLoader;
use datasync::datasource::{DataSourceKind, NewDataSource};
use datasync::sync::NewSyncTask;
use datasync::{Engine, db, telemetry};

#[derive(Parser)]
#[command(name = "datasync", version, about = "Copy records from external data sources into local tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending configuration store migrations
    Migrate,
    /// Manage and inspect data sources
    #[command(subcommand)]
    Sources(SourcesCommand),
    /// Manage and run sync tasks
    #[command(subcommand)]
    Tasks(TasksCommand),
}

#[derive(Subcommand)]
enum SourcesCommand {
    List,
    /// Register a data source
    Add {
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        kind: DataSourceKind,
        #[command(flatten)]
        params: JsonInput,
        #[arg(long)]
        disabled: bool,
    },
    Remove {
        id: Uuid,
    },
    /// Probe connection parameters without registering them
    Test {
        #[arg(long = "type")]
        kind: DataSourceKind,
        #[command(flatten)]
        params: JsonInput,
    },
    Tables {
        id: Uuid,
    },
    Describe {
        id: Uuid,
        table: String,
    },
    /// Run a statement against a data source
    Query {
        id: Uuid,
        statement: String,
        /// JSON array of positional parameters
        #[arg(long)]
        params: Option<String>,
    },
}

#[derive(Subcommand)]
enum TasksCommand {
    List,
    /// Create a task from a JSON definition
    Add {
        #[command(flatten)]
        definition: JsonInput,
    },
    Remove {
        id: Uuid,
    },
    Status {
        id: Uuid,
    },
    /// Run a task once. Schedulers call this on each tick.
    Run {
        id: Uuid,
    },
}

/// Inline JSON or a path to a JSON file
#[derive(Args)]
struct JsonInput {
    #[arg(long, conflicts_with = "file")]
    json: Option<String>,
    #[arg(long)]
    file: Option<PathBuf>,
}

impl JsonInput {
    fn read(&self) -> Result<JsonValue> {
        let raw = match (&self.json, &self.file) {
            (Some(json), _) => json.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?,
            (None, None) => return Ok(JsonValue::Object(Default::default())),
        };
        serde_json::from_str(&raw).context("parsing JSON input")
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;
    tracing::debug!(config = %config.redacted_json()?, "Loaded configuration");

    let conn = db::init_pool(&config)
        .await
        .context("connecting to the configuration store")?;
    db::run_migrations(&conn).await?;
    if matches!(cli.command, Command::Migrate) {
        println!("Migrations applied");
        return Ok(());
    }

    let engine = Engine::init(&config, conn)
        .await
        .context("initializing sync engine")?;
    let outcome = dispatch(&engine, cli.command).await;
    engine.shutdown().await;
    outcome
}

async fn dispatch(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Migrate => Ok(()),
        Command::Sources(cmd) => sources(engine, cmd).await,
        Command::Tasks(cmd) => tasks(engine, cmd).await,
    }
}

async fn sources(engine: &Engine, command: SourcesCommand) -> Result<()> {
    match command {
        SourcesCommand::List => print_json(&engine.list_data_sources().await),
        SourcesCommand::Add {
            name,
            kind,
            params,
            disabled,
        } => {
            let mut new = NewDataSource::new(name, kind, params.read()?);
            new.enabled = !disabled;
            print_json(&engine.create_data_source(new).await?)
        }
        SourcesCommand::Remove { id } => {
            engine.delete_data_source(id).await?;
            println!("Removed data source {}", id);
            Ok(())
        }
        SourcesCommand::Test { kind, params } => {
            let result = engine.test_connection(kind, params.read()?).await;
            print_json(&result)?;
            if !result.success {
                bail!("connection test failed");
            }
            Ok(())
        }
        SourcesCommand::Tables { id } => print_json(&engine.list_tables(id).await?),
        SourcesCommand::Describe { id, table } => {
            print_json(&engine.describe_table(id, &table).await?)
        }
        SourcesCommand::Query {
            id,
            statement,
            params,
        } => {
            let params: Vec<JsonValue> = match params {
                Some(raw) => serde_json::from_str(&raw).context("parsing --params")?,
                None => Vec::new(),
            };
            print_json(&engine.execute_query(id, &statement, &params).await?)
        }
    }
}

async fn tasks(engine: &Engine, command: TasksCommand) -> Result<()> {
    match command {
        TasksCommand::List => print_json(&engine.get_all_tasks().await),
        TasksCommand::Add { definition } => {
            let new: NewSyncTask = serde_json::from_value(definition.read()?)
                .context("invalid task definition")?;
            print_json(&engine.create_task(new).await?)
        }
        TasksCommand::Remove { id } => {
            engine.delete_task(id).await?;
            println!("Removed sync task {}", id);
            Ok(())
        }
        TasksCommand::Status { id } => {
            match engine.get_task_status(id).await {
                Some(status) => println!("{}", status.as_str()),
                None => println!("unknown"),
            }
            Ok(())
        }
        TasksCommand::Run { id } => {
            let result = engine.run_task(id).await?;
            print_json(&result)?;
            if !result.is_success() {
                bail!("sync run failed");
            }
            Ok(())
        }
    }
}
