//! history_dump - print the sensor history views without running the daemon.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use insect_watch::{
    history::DEFAULT_LOG_LIMIT, InMemorySnapshotStore, RestSnapshotStore, SensorHistory,
    SnapshotStore, StoreCredentials,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum View {
    /// Most recent record per device.
    Latest,
    /// Newest records per device, newest first.
    Logs,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Read the Client/Server sensor history views")]
struct Args {
    /// Which view to print.
    #[arg(value_enum, default_value_t = View::Latest)]
    view: View,

    /// Credentials JSON holding the database URL and auth token.
    #[arg(long, env = "INSECT_WATCH_CREDENTIALS", conflicts_with = "snapshot")]
    credentials: Option<PathBuf>,

    /// Read from a local JSON export instead of the live database.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Records per device for the logs view.
    #[arg(long, default_value_t = DEFAULT_LOG_LIMIT)]
    limit: usize,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let store: Arc<dyn SnapshotStore> = match (&args.snapshot, &args.credentials) {
        (Some(path), _) => Arc::new(InMemorySnapshotStore::from_file(path)?),
        (None, Some(path)) => {
            let credentials = StoreCredentials::load(path)?;
            Arc::new(RestSnapshotStore::new(
                &credentials,
                Duration::from_secs(args.timeout_secs),
            ))
        }
        (None, None) => {
            return Err(anyhow!(
                "pass --credentials (or INSECT_WATCH_CREDENTIALS) or --snapshot"
            ))
        }
    };
    let history = SensorHistory::new(store);

    let value = match args.view {
        View::Latest => serde_json::to_value(history.latest_view()?)?,
        View::Logs => serde_json::to_value(history.logs_view(args.limit)?)?,
    };
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    println!("{}", rendered);
    Ok(())
}
