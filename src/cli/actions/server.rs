use crate::{
    api,
    enroll::{codes::CodePolicy, EnrollConfig},
    notify::{HttpNotifier, LogNotifier, Notifier},
};
use anyhow::Result;
use secrecy::SecretString;
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
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

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let signing_key = SecretString::from(args.signing_key);

    let enroll_config = EnrollConfig::new()
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_code_policy(
            CodePolicy::new()
                .with_ttl_seconds(args.code_ttl_seconds)
                .with_length(args.code_length)
                .with_resend_cooldown_seconds(args.resend_cooldown_seconds)
                .with_max_attempts(args.max_code_attempts),
        );

    let notifier: Arc<dyn Notifier> = match &args.notifier_url {
        Some(url) => Arc::new(HttpNotifier::new(url)?),
        None => {
            info!("No notifier URL configured; verification codes will be logged");
            Arc::new(LogNotifier)
        }
    };

    api::new(
        args.port,
        args.dsn,
        signing_key,
        enroll_config,
        notifier,
        &args.frontend_base_url,
        args.sweep_interval_seconds,
    )
    .await
}
