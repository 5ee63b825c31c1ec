//! PoloDB command-line client
//!
//! Starts a server for the given database, runs one request against it and
//! prints the response as JSON.
//!
//! Usage: polodb-cli [OPTIONS] <COMMAND>
//!
//! Commands:
//!   find <COLLECTION> [QUERY]   Find documents matching a JSON query
//!   raw <COLLECTION> <BODY>     Send a JSON body as-is

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use polodb_client::{ClientConfig, PoloDbClient, StorageTarget};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "polodb-cli")]
#[command(about = "Query a PoloDB database through a local server", long_about = None)]
struct Args {
    /// Database path, or "memory"
    #[arg(short, long, default_value = "memory")]
    db: String,

    /// Server executable (overrides POLODB_EXECUTABLE)
    #[arg(short, long)]
    executable: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Find documents in a collection
    Find {
        collection: String,
        /// Query document as JSON
        query: Option<String>,
    },
    /// Send a JSON body, MessagePack-encoded, without wrapping it
    Raw { collection: String, body: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polodb_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(executable) = args.executable {
        config.executable_path = executable;
    }
    if let Some(ms) = args.timeout_ms {
        config.request_timeout_ms = Some(ms);
    }

    let client = PoloDbClient::open(StorageTarget::from(args.db.as_str()), config).await?;
    let result = run(&client, args.command).await;

    if let Err(e) = client.dispose().await {
        tracing::warn!("Failed to stop server: {}", e);
    }

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run(client: &PoloDbClient, command: Cmd) -> anyhow::Result<Value> {
    match command {
        Cmd::Find { collection, query } => {
            let query: Option<Value> = query
                .map(|q| serde_json::from_str(&q))
                .transpose()
                .context("query is not valid JSON")?;
            Ok(client.find(&collection, query.as_ref()).await?)
        }
        Cmd::Raw { collection, body } => {
            let body: Value = serde_json::from_str(&body).context("body is not valid JSON")?;
            let payload = polodb_client::protocol::encode_payload(&body)?;
            let response = client.issue(&collection, &payload).await?;
            Ok(polodb_client::protocol::decode_payload(&response)?)
        }
    }
}
