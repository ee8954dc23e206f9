//! Operator CLI: store and read API tokens in the vault, inspect derived
//! lifecycle dates, and run the historic sync.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{info, Level};

use hrsync::config::{AppConfig, DEFAULT_CONFIG_PATH};
use hrsync::directory::JsonDirectory;
use hrsync::lifecycle::derive_lifecycle;
use hrsync::sync::{load_status_table, run_from_config};
use hrsync::telemetry::init_tracing;
use hrsync::vault::{self, DEFAULT_STORE_PATH};

#[derive(Parser)]
#[command(name = "hrsync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HRIS employment history sync and token vault", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a secret under a fresh key and store it by name
    Encrypt {
        /// Base name; stored as `<name>_key` and `<name>_token`
        #[arg(short, long)]
        name: String,

        /// Secret store file
        #[arg(short, long, env = "HRSYNC_STORE", default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,

        /// Secret value (read from the first line of stdin when omitted)
        secret: Option<String>,
    },

    /// Decrypt a stored secret and print it
    Decrypt {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, env = "HRSYNC_STORE", default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,

        /// Refuse tokens issued more than this many seconds ago
        #[arg(long, value_name = "SECS")]
        max_age: Option<u32>,
    },

    /// List the secret names held in a store with their issue times
    List {
        #[arg(short, long, env = "HRSYNC_STORE", default_value = DEFAULT_STORE_PATH)]
        store: PathBuf,
    },

    /// Print derived lifecycle dates from exported status and directory files
    Reconstruct {
        /// Employment-status table export (JSON, or XML by `.xml` extension)
        #[arg(long)]
        statuses: PathBuf,

        /// Directory report export (JSON)
        #[arg(long)]
        directory: PathBuf,

        /// Only show this employee
        #[arg(long)]
        employee: Option<String>,
    },

    /// Run the historic sync described by the config file
    Sync {
        #[arg(short, long, env = "HRSYNC_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn read_secret_from_stdin() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read secret from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };

    match cli.command {
        Commands::Encrypt {
            name,
            store,
            secret,
        } => {
            init_tracing(cli.json, level);
            let secret = match secret {
                Some(secret) => secret,
                None => read_secret_from_stdin()?,
            };
            vault::encrypt_to_config(&secret, &name, &store)
                .with_context(|| format!("failed to store secret '{name}'"))?;
            println!("stored {name}_key and {name}_token in {}", store.display());
        }
        Commands::Decrypt {
            name,
            store,
            max_age,
        } => {
            init_tracing(cli.json, level);
            let secret = match max_age {
                Some(secs) => vault::decrypt_from_config_within(
                    &name,
                    &store,
                    Duration::seconds(i64::from(secs)),
                ),
                None => vault::decrypt_from_config(&name, &store),
            }
            .with_context(|| format!("failed to read secret '{name}'"))?;
            println!("{secret}");
        }
        Commands::List { store } => {
            init_tracing(cli.json, level);
            for name in vault::list_secrets(&store)? {
                let issued_at = vault::secret_issued_at(&name, &store)?;
                println!("{name}\t{}", issued_at.to_rfc3339());
            }
        }
        Commands::Reconstruct {
            statuses,
            directory,
            employee,
        } => {
            init_tracing(cli.json, level);
            let directory = JsonDirectory::load(&directory)?;
            let records = load_status_table(&statuses)?;
            let mut output = Vec::new();
            for record in records
                .iter()
                .filter(|record| employee.as_ref().map_or(true, |id| &record.employee_id == id))
            {
                let dates = derive_lifecycle(record, &directory)?;
                output.push(json!({ "id": record.employee_id, "lifecycle": dates }));
            }
            if let (Some(id), true) = (&employee, output.is_empty()) {
                bail!("employee {id} not found in {}", statuses.display());
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Sync { config } => {
            let app_config = AppConfig::load(&config)
                .with_context(|| format!("failed to load config {}", config.display()))?;
            let level = if cli.verbose {
                Level::DEBUG
            } else {
                app_config.logging.level()?
            };
            init_tracing(cli.json || app_config.logging.json, level);
            let report = run_from_config(&app_config)?;
            info!(
                employees = report.employees,
                recognition_updated = report.recognition_updated,
                "historic sync complete"
            );
        }
    }

    Ok(())
}
