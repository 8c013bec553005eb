use clap::{Parser, Subcommand};
use sublimit_core::{clock::system_clock, ledger::SqliteLedger};

mod commands;
use commands::{
    handle_ledger_command, handle_plans_command, handle_recover_command,
    utils::{load_config, print_error, CliResult},
    LedgerCommands, RecoverOptions,
};

#[derive(Parser)]
#[command(name = "sublimit-cli")]
#[command(about = "Sublimit CLI - inspect signatures, plans and the request ledger")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; defaults to $SUBLIMIT_CONFIG, then config/config.toml
    #[arg(long, global = true)]
    config: Option<String>,

    /// Ledger database URL, overriding the config file
    #[arg(long, global = true, env = "DATABASE_URL")]
    database: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover the address that produced a signature
    Recover {
        /// Hex signature, with or without 0x
        signature: String,

        /// Signed message; defaults to [signing].message
        #[arg(short, long)]
        message: Option<String>,

        /// Fail unless the signature belongs to this address
        #[arg(short, long)]
        signer: Option<String>,
    },

    /// Request ledger inspection and maintenance
    #[command(subcommand)]
    Ledger(LedgerCommands),

    /// Tabulate configured plans
    Plans,
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Recover { signature, message, signer } => {
            handle_recover_command(&config, RecoverOptions { signature, message, signer })?;
        }

        Commands::Ledger(ledger_command) => {
            let database_url = cli.database.unwrap_or_else(|| config.ledger.database_url.clone());
            let ledger = SqliteLedger::connect(&database_url, system_clock()).await?;
            handle_ledger_command(ledger_command, ledger).await?;
        }

        Commands::Plans => handle_plans_command(&config)?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}
