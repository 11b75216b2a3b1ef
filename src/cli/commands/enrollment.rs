//! CLI arguments for the enrollment pipeline.

use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_NOTIFIER_URL: &str = "notifier-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_code_args(command);
    with_service_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("HMAC key for step tokens (base64url or raw, at least 32 bytes)")
                .env("MATRICULA_SIGNING_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Absolute registration session TTL in seconds")
                .env("MATRICULA_SESSION_TTL_SECONDS")
                .default_value("2700")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_code_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("code-ttl-seconds")
                .long("code-ttl-seconds")
                .help("Verification code TTL in seconds")
                .env("MATRICULA_CODE_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("code-length")
                .long("code-length")
                .help("Verification code length in digits")
                .env("MATRICULA_CODE_LENGTH")
                .default_value("6")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("resend-cooldown-seconds")
                .long("resend-cooldown-seconds")
                .help("Cooldown between code issuances per channel")
                .env("MATRICULA_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("max-code-attempts")
                .long("max-code-attempts")
                .help("Failed attempts before a code is burned")
                .env("MATRICULA_MAX_CODE_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32)),
        )
}

fn with_service_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("sweep-interval-seconds")
                .long("sweep-interval-seconds")
                .help("Interval for the expired-session sweeper")
                .env("MATRICULA_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL allowed by CORS")
                .env("MATRICULA_FRONTEND_BASE_URL")
                .default_value("https://app.matricula.dev"),
        )
        .arg(
            Arg::new(ARG_NOTIFIER_URL)
                .long(ARG_NOTIFIER_URL)
                .help("Webhook receiving code deliveries; codes are logged locally when unset")
                .env("MATRICULA_NOTIFIER_URL"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub signing_key: String,
    pub session_ttl_seconds: i64,
    pub code_ttl_seconds: i64,
    pub code_length: usize,
    pub resend_cooldown_seconds: i64,
    pub max_code_attempts: i32,
    pub sweep_interval_seconds: u64,
    pub frontend_base_url: String,
    pub notifier_url: Option<String>,
}

impl Options {
    /// Collect enrollment options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            signing_key: matches
                .get_one::<String>(ARG_SIGNING_KEY)
                .cloned()
                .context("missing required argument: --signing-key")?,
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .unwrap_or(2700),
            code_ttl_seconds: matches
                .get_one::<i64>("code-ttl-seconds")
                .copied()
                .unwrap_or(600),
            code_length: matches.get_one::<usize>("code-length").copied().unwrap_or(6),
            resend_cooldown_seconds: matches
                .get_one::<i64>("resend-cooldown-seconds")
                .copied()
                .unwrap_or(60),
            max_code_attempts: matches
                .get_one::<i32>("max-code-attempts")
                .copied()
                .unwrap_or(5),
            sweep_interval_seconds: matches
                .get_one::<u64>("sweep-interval-seconds")
                .copied()
                .unwrap_or(300),
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .unwrap_or_else(|| "https://app.matricula.dev".to_string()),
            notifier_url: matches.get_one::<String>(ARG_NOTIFIER_URL).cloned(),
        })
    }
}
