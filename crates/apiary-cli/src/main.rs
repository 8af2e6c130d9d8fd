//! Apiary CLI - dependency-aware deployment of Kubernetes manifest bundles

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod context;
mod display;
mod error;
mod exit_codes;

use commands::Selection;
use commands::apply::Target;
use context::Context;

#[derive(Parser)]
#[command(name = "apiary")]
#[command(author = "Apiary Contributors")]
#[command(version)]
#[command(about = "Dependency-aware deployment of Kubernetes manifest bundles", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Configuration file (defaults to ./apiary.yaml when present)
    #[arg(short, long, global = true, env = "APIARY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an alveolus and its dependencies in order
    Apply {
        #[command(flatten)]
        selection: Selection,

        /// Target namespace (overrides kube.namespace)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Send every write as a server-side dry run
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete the objects of an alveolus and its dependencies, in reverse order
    Delete {
        #[command(flatten)]
        selection: Selection,

        /// Target namespace (overrides kube.namespace)
        #[arg(short, long)]
        namespace: Option<String>,

        /// Send every write as a server-side dry run
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the apply plan without contacting the cluster
    Plan {
        #[command(flatten)]
        selection: Selection,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the alveoli found in the bundles
    List {
        /// Bundle directory, or a directory of bundles
        #[arg(short, long = "bundle")]
        bundles: Vec<PathBuf>,
    },

    /// Watch the custom resource and run a plan for every change
    Operator {
        /// Bundle directory, or a directory of bundles
        #[arg(short, long = "bundle")]
        bundles: Vec<PathBuf>,
    },
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> error::Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Apply {
            selection,
            namespace,
            dry_run,
        } => commands::apply::run(config, &selection, &Target { namespace, dry_run }).await,

        Commands::Delete {
            selection,
            namespace,
            dry_run,
        } => commands::delete::run(config, &selection, &Target { namespace, dry_run }).await,

        Commands::Plan { selection, json } => {
            let ctx = Context::load(config, &selection.bundles)?;
            commands::plan::run(&ctx, &selection, json)
        }

        Commands::List { bundles } => commands::list::run(&Context::load(config, &bundles)?),

        Commands::Operator { bundles } => commands::operator::run(Context::load(config, &bundles)?).await,
    }
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(exit_codes::USAGE_ERROR);
        }
    };

    init_tracing(cli.debug);

    if let Err(err) = dispatch(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
    std::process::exit(exit_codes::SUCCESS);
}
