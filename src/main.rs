use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use inbox_responder::channels::{EmailConfig, ImapSmtpMailbox, MailboxClient};
use inbox_responder::config::ResponderConfig;
use inbox_responder::context::AppContext;
use inbox_responder::llm::{LlmConfig, create_generator};
use inbox_responder::pipeline::{InboxPoller, spawn_inbox_poller};
use inbox_responder::store::{LibSqlLedger, ProcessingLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage. Fails only if one is already set.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ResponderConfig::from_env().context("invalid responder configuration")?;
    setup_logging(config.log_dir.as_deref());

    let email_config = EmailConfig::from_env().context("invalid email configuration")?;
    let llm_config = LlmConfig::from_env().context("invalid LLM configuration")?;

    eprintln!("📬 Inbox Responder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} ({})", email_config.imap_host, email_config.mailbox);
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Ledger: {}", config.db_path.display());
    eprintln!("   Poll interval: {}s\n", config.poll_interval.as_secs());

    // ── Ledger ───────────────────────────────────────────────────────────
    let ledger = LibSqlLedger::new_local(&config.db_path)
        .await
        .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?;

    if let Some(keep_days) = config.ledger_keep_days {
        match ledger.prune_entries(keep_days).await {
            Ok(removed) => info!(removed, keep_days, "Ledger maintenance done"),
            Err(e) => warn!(error = %e, "Ledger prune failed, continuing"),
        }
    }
    info!(entries = ledger.count_entries().await.unwrap_or(0), "Ledger ready");

    // ── Collaborators ────────────────────────────────────────────────────
    let mailbox = ImapSmtpMailbox::new(email_config);
    let rules = config.rules(mailbox.from_address())?;
    let mailbox: Arc<dyn MailboxClient> = Arc::new(mailbox);
    let generator = create_generator(&llm_config)?;
    let ctx = AppContext::new(mailbox, generator, Arc::new(ledger));

    let poller = Arc::new(InboxPoller::new(
        ctx,
        rules,
        config.reply_style.clone(),
        config.poller_config(),
    ));
    let (handle, shutdown) = spawn_inbox_poller(poller);

    // ── Shutdown ─────────────────────────────────────────────────────────
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested, finishing in-flight batch"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
    }
    shutdown.trigger();

    if let Err(e) = handle.await {
        error!(error = %e, "Poller task ended abnormally");
    }
    info!("Goodbye");
    Ok(())
}

/// Stderr logging, plus a log file when `INBOX_LOG_DIR` is set.
fn setup_logging(log_dir: Option<&Path>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::never(dir, "inbox-responder.log");
            let file_layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}
