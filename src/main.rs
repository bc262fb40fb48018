use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use finchart::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for finchart::AppCommand {
    fn from(cmd: Commands) -> finchart::AppCommand {
        match cmd {
            Commands::Modules => finchart::AppCommand::Modules,
            Commands::Show {
                label,
                symbol,
                start,
                end,
                range,
                provider,
                compare,
                json,
                rows,
            } => finchart::AppCommand::Show(finchart::ShowArgs {
                label,
                symbol,
                start,
                end,
                range,
                provider,
                compare,
                json,
                rows,
            }),
            Commands::Dashboard { prefetch } => finchart::AppCommand::Dashboard { prefetch },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// List the available chart modules
    Modules,
    /// Fetch and display the chart for a module
    Show {
        /// Module label as listed by `modules`
        label: String,
        /// Ticker symbol, overriding the module default
        #[arg(short, long)]
        symbol: Option<String>,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Range preset ending at the end date: 1M, 3M, 6M, 1Y, 2Y, 5Y
        #[arg(short, long)]
        range: Option<String>,
        /// Data provider id
        #[arg(short, long)]
        provider: Option<String>,
        /// Comma-separated symbols to compare, replacing the module's set
        #[arg(long)]
        compare: Option<String>,
        /// Print the module view as JSON
        #[arg(long)]
        json: bool,
        /// Number of trailing data rows to print
        #[arg(long)]
        rows: Option<usize>,
    },
    /// Interactive session that keeps fetched data cached between views
    Dashboard {
        /// Fetch every module's default data before the first prompt
        #[arg(long)]
        prefetch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => finchart::cli::setup::setup(),
        Some(cmd) => finchart::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
