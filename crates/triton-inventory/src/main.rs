//! triton-ansible-inventory - Ansible dynamic inventory for Triton
//!
//! ## Usage
//!
//! ```bash
//! # Inventory every configured profile
//! triton-ansible-inventory --list
//!
//! # Use it from Ansible
//! ansible -i triton-ansible-inventory all -m ping
//! ```
//!
//! Logs go to stderr; set `LLEVEL` (or `RUST_LOG`) to e.g. `debug`.

use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use triton_inventory::{
    KEY_ID_OVERRIDE_VAR, ProfileWalker, TritonConnector, home_dir, load_all_profiles,
    resolve_config_dir,
};

/// Log filter variable, checked before `RUST_LOG`
const LOG_LEVEL_VAR: &str = "LLEVEL";

/// Ansible dynamic inventory for Triton
#[derive(Parser, Debug)]
#[command(name = "triton-ansible-inventory")]
#[command(about = "Ansible dynamic inventory built from Triton instances", long_about = None)]
#[command(override_usage = "triton-ansible-inventory [--list|--host=HOST]")]
struct Cli {
    /// Output all hosts info, works as inventory script.
    #[arg(long)]
    list: bool,

    /// Output specific host info, works as inventory script.
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
}

/// What the command line asks for
#[derive(Debug, PartialEq, Eq)]
enum Action {
    /// Print the inventory document
    List,
    /// Print `message` and exit with `code`
    Exit {
        message: String,
        to_stderr: bool,
        code: u8,
    },
}

impl Action {
    fn exit(message: impl Into<String>, to_stderr: bool, code: u8) -> Self {
        Self::Exit {
            message: message.into(),
            to_stderr,
            code,
        }
    }
}

/// Decide what to do from the parsed command line
fn decide(parsed: Result<Cli, clap::Error>) -> Action {
    let cli = match parsed {
        Ok(cli) => cli,
        Err(e) => {
            // --help lands here too, and is not an error
            let failed = e.use_stderr();
            return Action::exit(e.render().to_string(), failed, u8::from(failed));
        }
    };
    debug!(?cli, "Parsed options");

    if cli.list && cli.host.is_some() {
        let message = format!(
            "Only one of --list or --host is allowed\n{}",
            Cli::command().render_help()
        );
        return Action::exit(message, true, 1);
    }

    if let Some(host) = cli.host {
        // Ansible only asks per host when _meta is missing; --list always has it
        return Action::exit(format!("--host {} is not supported, use --list", host), true, 1);
    }

    if !cli.list {
        return Action::exit(Cli::command().render_usage().to_string(), true, 0);
    }

    Action::List
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // stdout carries the inventory, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env(LOG_LEVEL_VAR)
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match decide(Cli::try_parse()) {
        Action::List => {
            list().await?;
            Ok(ExitCode::SUCCESS)
        }
        Action::Exit {
            message,
            to_stderr,
            code,
        } => {
            let message = message.trim_end();
            if to_stderr {
                eprintln!("{}", message);
            } else {
                println!("{}", message);
            }
            Ok(ExitCode::from(code))
        }
    }
}

/// Print the inventory of every profile
///
/// Always prints a well-formed document, even when no profile could be read.
async fn list() -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let home = home_dir().unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to the working directory as home");
        cwd.clone()
    });

    let config_dir = resolve_config_dir(&cwd, &home);
    let profiles = load_all_profiles(&config_dir).unwrap_or_else(|e| {
        error!(dir = %config_dir.display(), error = %e, "Unable to load profiles");
        Vec::new()
    });
    debug!(count = profiles.len(), "Profiles to inventory");

    let key_id_override = std::env::var(KEY_ID_OVERRIDE_VAR)
        .ok()
        .filter(|k| !k.is_empty());
    let connector = TritonConnector::new(ssh_dir(&home));

    let (inventory, reports) = ProfileWalker::new(&connector)
        .with_key_id_override(key_id_override)
        .walk_all(&profiles)
        .await;

    println!("{}", inventory.to_json()?);

    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    debug!(
        profiles = reports.len(),
        failed,
        hosts = inventory.host_count(),
        groups = inventory.children().len(),
        "Inventory complete"
    );
    Ok(())
}

fn ssh_dir(home: &std::path::Path) -> PathBuf {
    home.join(".ssh")
}
