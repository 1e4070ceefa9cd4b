//! valued - send events to the Valued ingestion API from the command line
//!
//! Event data is given as a JSON object (`--json`) and/or dotted key paths
//! (`--data user.id=42`). Values that parse as JSON are used as such,
//! anything else is sent as a string.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/valued/config.toml (~/.config/valued/config.toml)
//! - Logs: $XDG_STATE_HOME/valued/valued.log (~/.local/state/valued/valued.log)

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use parking_lot::Mutex;
use std::sync::Arc;
use valued_core::{
    normalize, normalize_map, Client, Config, Connection, Environment, Event, Map, Strategy,
    DEFAULT_ENDPOINT,
};

#[derive(Parser)]
#[command(name = "valued")]
#[command(about = "Send events to the Valued ingestion API")]
#[command(version)]
struct Args {
    /// Verbose output (also writes the log file)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the event JSON instead of sending it
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and the resolved dispatch strategy
    Status,

    /// Track an action event
    Action {
        /// Action key, e.g. `user.created`
        key: String,

        #[command(flatten)]
        data: DataArgs,
    },

    /// Track a page view
    Pageview {
        /// Page URL
        url: String,

        #[command(flatten)]
        data: DataArgs,
    },

    /// Send a sync event
    Sync {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Sync user attributes (data is nested under `user`)
    SyncUser {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Sync customer attributes (data is nested under `customer`)
    SyncCustomer {
        #[command(flatten)]
        data: DataArgs,
    },
}

#[derive(ClapArgs)]
struct DataArgs {
    /// Event data as a JSON object
    #[arg(long)]
    json: Option<String>,

    /// Event field as PATH=VALUE (repeatable)
    #[arg(short = 'd', long = "data", value_name = "PATH=VALUE")]
    fields: Vec<String>,
}

impl DataArgs {
    fn to_map(&self) -> Result<Map> {
        let mut data = match &self.json {
            Some(json) => {
                let value: serde_json::Value =
                    serde_json::from_str(json).context("--json is not valid JSON")?;
                if !value.is_object() {
                    bail!("--json must be a JSON object");
                }
                normalize_map(&value)
            }
            None => Map::new(),
        };

        for field in &self.fields {
            let (path, raw) = field
                .split_once('=')
                .with_context(|| format!("expected PATH=VALUE, got {:?}", field))?;
            let value = serde_json::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
            data = data.merge(&Map::from_path(path, normalize(&value)));
        }

        Ok(data)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(valued_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match &args.command {
        Command::Status => cmd_status(&config),
        command => cmd_send(&config, command, args.dry_run),
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Valued Client Configuration");
    println!("===========================");
    println!();

    let client = &config.client;
    println!("Config file:     {}", Config::config_path().display());
    println!(
        "Token:           {}",
        if client.is_ready() { "<set>" } else { "<not set>" }
    );
    println!(
        "Endpoint:        {}",
        client.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    );
    println!("Timeout:         {}s", client.timeout_secs);

    let env = Environment::detect();
    println!(
        "Environment:     {}",
        env.as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<not set>".to_string())
    );
    println!(
        "Dispatch:        {:?}",
        config.dispatch.strategy(env.as_ref())
    );
    println!("Log file:        {}", Config::log_path().display());

    if !client.is_ready() {
        println!();
        println!("No token configured. Set VALUED_TOKEN or add to config.toml:");
        println!();
        println!("  [client]");
        println!("  token = \"vt_live_xxxxxxxxxxxx\"");
    }

    Ok(())
}

fn cmd_send(config: &Config, command: &Command, dry_run: bool) -> Result<()> {
    // Events are captured on this thread, then printed or posted here
    let captured: Arc<Mutex<Option<Event>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&captured);
    let client = Client::builder()
        .callback(move |event: &Event| *slot.lock() = Some(event.clone()))
        .strategy(Strategy::Synchronous)
        .build()?;

    match command {
        Command::Status => return Ok(()),
        Command::Action { key, data } => client.action(key, &data.to_map()?)?,
        Command::Pageview { url, data } => client.pageview(url, &data.to_map()?)?,
        Command::Sync { data } => client.sync(&data.to_map()?)?,
        Command::SyncUser { data } => client.sync_user(&data.to_map()?)?,
        Command::SyncCustomer { data } => client.sync_customer(&data.to_map()?)?,
    }

    let Some(event) = captured.lock().take() else {
        bail!("no event was produced");
    };

    if dry_run {
        println!("{}", event.to_json()?);
        return Ok(());
    }

    let token = config
        .client
        .token
        .as_deref()
        .filter(|_| config.client.is_ready())
        .context("no token configured (set VALUED_TOKEN or client.token in config.toml)")?;
    let endpoint = config.client.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
    let connection = Connection::with_timeout(token, endpoint, config.client.timeout())?;

    tracing::info!(category = %event.category(), %endpoint, "Sending event");
    let status = connection.post(&event)?;
    if !status.is_success() {
        bail!("server rejected event: {}", status);
    }

    println!("Sent {} event ({})", event.category(), status);
    Ok(())
}
