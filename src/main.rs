//! Herald binary — scheduled Slack message dispatch.
//!
//! `start` runs the dispatch loop and the health/OAuth HTTP surface;
//! the remaining subcommands are one-shot operator tools against the same
//! database.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use herald::config::HeraldConfig;
use herald::delivery::{DeliveryClient, SlackDelivery};
use herald::dispatch::DispatchEngine;
use herald::http;
use herald::oauth::{
    CredentialProvider, OauthManager, StaticCredentialProvider, DEFAULT_SCOPES,
};
use herald::slack::{ChatApi, SlackApiClient};
use herald::store::{MessageStore, NewMessage, SqliteMessageStore};

#[derive(Parser)]
#[command(name = "herald", version, about = "Scheduled Slack message dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch loop and the HTTP surface.
    Start,
    /// Execute a single dispatch run and exit.
    RunOnce,
    /// Queue a message for future delivery.
    Schedule {
        /// Destination channel (name, #name, @user, or platform id).
        #[arg(long)]
        channel: String,
        /// Message text.
        #[arg(long)]
        body: String,
        /// Delivery time, RFC 3339 (e.g. 2026-09-01T09:00:00Z).
        #[arg(long)]
        at: String,
    },
    /// List all scheduled messages.
    List,
    /// Dispatch one message immediately, ignoring its scheduled time.
    SendNow {
        /// Message id.
        #[arg(long)]
        id: i64,
    },
    /// Print the OAuth authorization URL.
    AuthUrl,
}

/// Wired application components.
struct App {
    store: Arc<SqliteMessageStore>,
    engine: Arc<DispatchEngine>,
    oauth: Option<Arc<OauthManager>>,
}

/// Build the store, credential provider, delivery client, and engine from
/// configuration.
///
/// Credential precedence: an explicit bot token wins; otherwise the OAuth
/// installation store serves the newest credential.
async fn build_app(config: &HeraldConfig) -> Result<App> {
    let store = Arc::new(
        SqliteMessageStore::open(std::path::Path::new(&config.paths.database))
            .await
            .context("failed to open message database")?,
    );

    let api: Arc<dyn ChatApi> = Arc::new(SlackApiClient::new());

    let oauth = if config.slack.oauth_configured() {
        // oauth_configured() guarantees all three values.
        let client_id = config.slack.client_id.clone().unwrap_or_default();
        let client_secret = config.slack.client_secret.clone().unwrap_or_default();
        let redirect_uri = config.slack.redirect_uri().unwrap_or_default();
        Some(Arc::new(
            OauthManager::new(
                store.pool().clone(),
                Arc::clone(&api),
                client_id,
                client_secret,
                redirect_uri,
            )
            .await
            .context("failed to initialise oauth manager")?,
        ))
    } else {
        None
    };

    let credentials: Arc<dyn CredentialProvider> = match (&config.slack.bot_token, &oauth) {
        (Some(token), _) => Arc::new(StaticCredentialProvider::from_token(token.clone())),
        (None, Some(manager)) => Arc::clone(manager) as Arc<dyn CredentialProvider>,
        (None, None) => anyhow::bail!("no credential path configured"),
    };

    let delivery: Arc<dyn DeliveryClient> = Arc::new(SlackDelivery::new(api, credentials));
    let engine = Arc::new(DispatchEngine::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        delivery,
    ));

    Ok(App {
        store,
        engine,
        oauth,
    })
}

async fn run_start(config: HeraldConfig) -> Result<()> {
    config.validate_credentials()?;
    let app = build_app(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_state = http::AppState {
        oauth: app.oauth.clone(),
    };
    let addr = config.http.socket_addr()?;
    let http_task = tokio::spawn(http::serve(addr, http_state, shutdown_rx.clone()));

    let engine = Arc::clone(&app.engine);
    let period = Duration::from_secs(config.dispatch.interval_secs.max(1));
    let loop_rx = shutdown_rx.clone();
    let loop_task = tokio::spawn(async move { engine.run_loop(period, loop_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = loop_task.await;
    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "http surface exited with error"),
        Err(e) => error!(error = %e, "http task panicked"),
    }

    info!("herald stopped");
    Ok(())
}

fn load_config() -> Result<HeraldConfig> {
    HeraldConfig::load().context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Start => {
            // Production logging needs the logs dir, so config loads before
            // the subscriber; the chosen path is logged right after.
            let config = load_config()?;
            let _guard =
                herald::logging::init_production(std::path::Path::new(&config.paths.logs_dir))?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                config_path = %HeraldConfig::config_path().display(),
                "herald starting"
            );
            run_start(config).await
        }
        Command::RunOnce => {
            herald::logging::init_cli();
            let config = load_config()?;
            config.validate_credentials()?;
            let app = build_app(&config).await?;
            let report = app.engine.run_once().await?;
            println!(
                "attempted {} sent {} failed {}",
                report.attempted, report.sent, report.failed
            );
            Ok(())
        }
        Command::Schedule { channel, body, at } => {
            herald::logging::init_cli();
            let config = load_config()?;
            let scheduled_time: DateTime<Utc> = at
                .parse()
                .with_context(|| format!("invalid --at timestamp: {at}"))?;
            let store = build_app_store_only(&config).await?;
            let message = store
                .insert(NewMessage {
                    body,
                    channel,
                    scheduled_time,
                })
                .await?;
            println!(
                "scheduled message {} for {} at {}",
                message.id, message.channel, message.scheduled_time
            );
            Ok(())
        }
        Command::List => {
            herald::logging::init_cli();
            let config = load_config()?;
            let store = build_app_store_only(&config).await?;
            for m in store.list().await? {
                println!(
                    "{:>6}  {:<8}  {}  {}  {}",
                    m.id,
                    m.status.as_str(),
                    m.scheduled_time,
                    m.channel,
                    m.body
                );
            }
            Ok(())
        }
        Command::SendNow { id } => {
            herald::logging::init_cli();
            let config = load_config()?;
            config.validate_credentials()?;
            let app = build_app(&config).await?;
            let outcome = app.engine.dispatch_one(id).await?;
            println!("message {id} -> {}", outcome.as_str());
            Ok(())
        }
        Command::AuthUrl => {
            herald::logging::init_cli();
            let config = load_config()?;
            let app = build_app(&config).await?;
            let oauth = app
                .oauth
                .context("oauth is not configured; set SLACK_CLIENT_ID, SLACK_CLIENT_SECRET, HERALD_REDIRECT_BASE_URL")?;
            let (url, _state) = oauth.authorize_url(DEFAULT_SCOPES).await?;
            println!("{url}");
            Ok(())
        }
    }
}

/// Open just the message store, for subcommands that never deliver.
async fn build_app_store_only(config: &HeraldConfig) -> Result<SqliteMessageStore> {
    SqliteMessageStore::open(std::path::Path::new(&config.paths.database))
        .await
        .context("failed to open message database")
}
