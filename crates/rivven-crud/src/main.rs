//! rivven-crud - schema-driven CRUD over SQL Server
//!
//! Usage:
//!   rivven-crud fields
//!   rivven-crud --connection '{"server":"db","database":"shop"}' discover
//!   rivven-crud describe sales.orders Create
//!   rivven-crud execute sales.orders Read --params '{"where_clause":"total > 50"}'
//!
//! Connection parameters come from `--connection` or `RIVVEN_CRUD_CONNECTION`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use rivven_crud::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rivven-crud")]
#[command(about = "Schema-driven CRUD over relational tables and views")]
#[command(version)]
struct Cli {
    /// Connection parameters as a JSON object
    #[arg(long, global = true, env = "RIVVEN_CRUD_CONNECTION", hide_env_values = true)]
    connection: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the connection configuration fields
    Fields,

    /// List every relation and the operations it supports
    Discover,

    /// Show the parameter contract of one operation on one relation
    Describe {
        /// Relation full name (schema.table)
        class: String,

        /// Operation (Create, Read, Update, Delete)
        operation: Operation,
    },

    /// Execute one operation on one relation
    Execute {
        /// Relation full name (schema.table)
        class: String,

        /// Operation (Create, Read, Update, Delete)
        operation: Operation,

        /// Parameters as a JSON object
        #[arg(short, long, default_value = "{}")]
        params: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Commands::Fields = cli.command {
        println!("{}", serde_json::to_string_pretty(&rivven_crud::spec::connection_fields())?);
        return Ok(());
    }

    let raw = cli
        .connection
        .as_deref()
        .context("connection parameters required (--connection or RIVVEN_CRUD_CONNECTION)")?;
    let config = CrudConnectorConfig::from_json(raw)?;
    let connector = CrudConnector::builder().build()?;

    let result = run(&connector, &config, cli.command).await;
    connector.unload().await;
    result
}

async fn run(
    connector: &CrudConnector,
    config: &CrudConnectorConfig,
    command: Commands,
) -> anyhow::Result<()> {
    match command {
        Commands::Fields => {}
        Commands::Discover => {
            let table = connector.discover(config).await?;
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
        Commands::Describe { class, operation } => {
            let contract = connector.describe(config, &class, operation).await?;
            println!("{}", serde_json::to_string_pretty(&contract)?);
        }
        Commands::Execute {
            class,
            operation,
            params,
        } => {
            let params: serde_json::Map<String, serde_json::Value> =
                serde_json::from_str(&params).context("--params must be a JSON object")?;

            match connector.execute(config, &class, operation, &params).await? {
                ExecutionOutcome::Stream(records) => {
                    let mut records = records.into_json();
                    while let Some(record) = records.next().await {
                        println!("{}", serde_json::to_string(&record?)?);
                    }
                }
                ExecutionOutcome::Rows(rows) => {
                    let rows: Vec<_> = rows.iter().map(Row::to_json).collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }
    Ok(())
}
