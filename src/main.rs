use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use vendbot::api::{ApiState, api_routes};
use vendbot::bot::Dispatcher;
use vendbot::channels::{ChannelManager, CliChannel, TelegramChannel, Transport};
use vendbot::config::BotConfig;
use vendbot::notify::{Notifier, TransportNotifier};
use vendbot::scenes;
use vendbot::store::{LibSqlRepository, Repository};
use vendbot::store::model::Role;
use vendbot::workflow::{EventRouter, SessionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("Invalid configuration")?;

    // Stderr always; a daily rolling file as well when a log dir is set.
    // The guard flushes the file writer and must outlive the runtime.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "vendbot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    eprintln!("🥤 VendBot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Status API: http://0.0.0.0:{}/api/health", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let repo: Arc<dyn Repository> = Arc::new(
        LibSqlRepository::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    for external_id in &config.admin_ids {
        repo.upsert_user(external_id, external_id, &[Role::Admin])
            .await
            .with_context(|| format!("Failed to seed admin {external_id}"))?;
    }
    if !config.admin_ids.is_empty() {
        eprintln!("   Admins seeded: {}", config.admin_ids.join(", "));
    }

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if config.cli_enabled {
        channels.add(Box::new(CliChannel::default()));
        eprintln!("   CLI: enabled (/help for commands, !token to press a button)");
    }

    if let Some(token) = &config.telegram_token {
        let allowed = config.telegram_allowed_users.clone();
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if allowed.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                allowed.join(", ")
            }
        );
        channels.add(Box::new(TelegramChannel::new(token.clone(), allowed)));
    }

    if channels.is_empty() {
        anyhow::bail!("No channel enabled: set TELEGRAM_BOT_TOKEN or VENDBOT_CLI=1");
    }

    let channels = Arc::new(channels);
    let transport: Arc<dyn Transport> = Arc::clone(&channels) as Arc<dyn Transport>;
    let notifier: Arc<dyn Notifier> = Arc::new(TransportNotifier::new(Arc::clone(&transport)));

    for (name, health) in channels.health_check_all().await {
        if let Err(e) = health {
            tracing::warn!(channel = %name, "Health check failed: {e}");
        }
    }

    // ── Workflow engine ──────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new());
    let registry = scenes::registry();
    eprintln!("   Workflows: {} registered", registry.count());

    let router = Arc::new(EventRouter::new(
        registry,
        Arc::clone(&sessions),
        Arc::clone(&repo),
        transport,
        notifier,
        config.handler_timeout,
    ));

    // ── Status API ───────────────────────────────────────────────────────
    let app = api_routes(ApiState {
        sessions,
        repo: Arc::clone(&repo),
    });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("Failed to bind status API port {}", config.http_port))?;
    tokio::spawn(async move {
        tracing::info!("Status API started");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Status API stopped: {e}");
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let stream = channels
        .start_all()
        .await
        .context("Failed to start channels")?;
    eprintln!("   Channels: {}\n", channels.names().join(", "));

    let dispatcher = Dispatcher::new(router, repo);
    dispatcher.run(stream).await;

    channels.shutdown_all().await?;
    tracing::info!("{} stopped", config.name);
    Ok(())
}
