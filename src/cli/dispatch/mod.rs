//! Command-line argument dispatch and server initialization.
//!
//! This module maps validated CLI arguments to the appropriate action, such
//! as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::enrollment;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let enrollment = enrollment::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        signing_key: enrollment.signing_key,
        session_ttl_seconds: enrollment.session_ttl_seconds,
        code_ttl_seconds: enrollment.code_ttl_seconds,
        code_length: enrollment.code_length,
        resend_cooldown_seconds: enrollment.resend_cooldown_seconds,
        max_code_attempts: enrollment.max_code_attempts,
        sweep_interval_seconds: enrollment.sweep_interval_seconds,
        frontend_base_url: enrollment.frontend_base_url,
        notifier_url: enrollment.notifier_url,
    }))
}
