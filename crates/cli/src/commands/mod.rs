pub mod ledger;
pub mod plans;
pub mod recover;
pub mod utils;

pub use ledger::{handle_ledger_command, LedgerCommands};
pub use plans::handle_plans_command;
pub use recover::{handle_recover_command, RecoverOptions};
