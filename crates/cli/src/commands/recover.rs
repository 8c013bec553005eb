use super::utils::{print_info, print_success, CliError, CliResult};
use sublimit_core::{
    config::AppConfig,
    identity::{Identity, IdentityResolver},
};

pub struct RecoverOptions {
    pub signature: String,
    /// Overrides `[signing].message`.
    pub message: Option<String>,
    /// Address the signature is expected to come from.
    pub signer: Option<String>,
}

/// Recovers the signer and, when `claimed` is given, checks it matches.
///
/// # Errors
/// - [`CliError::Identity`] for a malformed signature or claimed address
/// - [`CliError::SignerMismatch`] when the signature belongs to someone else
pub fn recover_signer(
    message: &str,
    signature: &str,
    claimed: Option<&str>,
) -> CliResult<Identity> {
    let resolver = IdentityResolver::new(message);
    let recovered = resolver.recover_hex(signature)?;

    if let Some(claimed) = claimed {
        let claimed = resolver.normalize(claimed)?;
        if claimed != recovered {
            return Err(CliError::SignerMismatch { claimed, recovered });
        }
    }
    Ok(recovered)
}

pub fn handle_recover_command(config: &AppConfig, options: RecoverOptions) -> CliResult<()> {
    let message = options.message.as_deref().unwrap_or(&config.signing.message);
    print_info(&format!("Message: {message:?}"));

    let identity = recover_signer(message, &options.signature, options.signer.as_deref())?;
    println!("{identity}");

    if options.signer.is_some() {
        print_success("Signature matches the claimed signer");
    }
    Ok(())
}
