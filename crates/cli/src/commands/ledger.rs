use super::utils::{print_info, print_success, CliResult};
use clap::Subcommand;
use prettytable::{row, Table};
use sublimit_core::{
    identity::Identity,
    ledger::{RequestLedger, SqliteLedger, WindowUsage},
};

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Show request counts per window for an address
    Usage {
        address: String,
    },

    /// List every address the ledger has recorded
    Users,

    /// Delete entries older than the longest window, for all users
    Prune,
}

pub async fn handle_ledger_command(
    command: LedgerCommands,
    ledger: SqliteLedger,
) -> CliResult<()> {
    match command {
        LedgerCommands::Usage { address } => {
            let user = Identity::parse(&address)?;
            let usage = ledger.usage(&user).await?;
            print_info(&format!("Usage for {user}"));
            usage_table(&usage).printstd();
        }

        LedgerCommands::Users => {
            let users = ledger.users().await?;
            if users.is_empty() {
                print_info("No users recorded");
            }
            for user in users {
                println!("{user}");
            }
        }

        LedgerCommands::Prune => {
            let removed = ledger.evict_all_stale().await?;
            print_success(&format!("Removed {removed} stale entries"));
        }
    }

    Ok(())
}

fn usage_table(usage: &[WindowUsage]) -> Table {
    let mut table = Table::new();
    table.add_row(row!["Window", "Length (s)", "Requests"]);
    for entry in usage {
        table.add_row(row![entry.window, entry.duration.as_secs(), entry.count]);
    }
    table
}
