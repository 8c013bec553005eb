use sublimit_core::{
    config::AppConfig,
    identity::{Identity, IdentityError},
    ledger::LedgerError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Signature was produced by {recovered}, not {claimed}")]
    SignerMismatch { claimed: Identity, recovered: Identity },
}

pub type CliResult<T> = Result<T, CliError>;

/// Loads `path`, or the default location when none is given.
///
/// # Errors
/// Returns [`CliError::Config`] if the file cannot be parsed or fails validation.
pub fn load_config(path: Option<&str>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .map_err(|e| CliError::Config(e.to_string()))?;

    config.validate().map_err(CliError::Config)?;
    Ok(config)
}

pub fn print_success(message: &str) {
    println!("[SUCCESS] {message}");
}

pub fn print_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn print_info(message: &str) {
    println!("[INFO] {message}");
}
