//! Flotilla CLI - Declarative chart deployment orchestrator

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;
mod error;
mod exit_codes;

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(author = "Flotilla Contributors")]
#[command(version)]
#[command(about = "Declarative chart deployment orchestrator", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

/// Document inputs shared by every command
#[derive(Args, Debug, Clone)]
pub struct DocumentArgs {
    /// YAML files holding chart, chart group and manifest documents
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Value file(s) merged over matching documents
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Point overrides (kind:document:path.to.field=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Manifest to use when the documents declare several
    #[arg(long)]
    pub target_manifest: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate documents against their schemas and the manifest structure
    Validate {
        #[command(flatten)]
        documents: DocumentArgs,

        /// Output validation results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the overridden, fully resolved manifest
    Resolve {
        #[command(flatten)]
        documents: DocumentArgs,

        /// Output as JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Sync the manifest onto the cluster
    Apply {
        #[command(flatten)]
        documents: DocumentArgs,

        /// Directory holding the release ledger
        #[arg(long, env = "FLOTILLA_STATE_DIR", default_value = ".flotilla")]
        state_dir: PathBuf,

        /// Wait for every chart's resources to be ready
        #[arg(long)]
        wait: bool,

        /// Timeout in seconds for charts that declare none
        #[arg(long, env = "FLOTILLA_TIMEOUT", default_value_t = 900)]
        timeout: u64,

        /// Pass dry run to the release service; skip actions, waits, tests and pruning
        #[arg(long)]
        dry_run: bool,

        /// Uninstall prefixed releases the manifest no longer declares
        #[arg(long)]
        prune: bool,

        /// Skip pre-upgrade lifecycle actions
        #[arg(long)]
        disable_update_pre: bool,

        /// Skip post-upgrade lifecycle actions
        #[arg(long)]
        disable_update_post: bool,

        /// Consecutive quiet readiness passes required
        #[arg(long, default_value_t = 1)]
        wait_attempts: u32,

        /// Seconds between readiness passes
        #[arg(long, default_value_t = 1)]
        wait_attempt_sleep: u64,

        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Validate { documents, json } => commands::validate::run(&documents, json),

        Commands::Resolve { documents, json } => commands::resolve::run(&documents, json),

        Commands::Apply {
            documents,
            state_dir,
            wait,
            timeout,
            dry_run,
            prune,
            disable_update_pre,
            disable_update_post,
            wait_attempts,
            wait_attempt_sleep,
            json,
        } => {
            let options = commands::apply::ApplyOptions {
                state_dir,
                wait,
                timeout,
                dry_run,
                prune,
                disable_update_pre,
                disable_update_post,
                wait_attempts,
                wait_attempt_sleep,
                json,
            };
            commands::apply::run(&documents, &options).await
        }
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
