mod api;
mod config;
mod dispatch;
mod model;
mod notify;
mod push;
mod schedule;
mod scheduler;
mod store;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use push::webpush::WebPushClient;
use push::{PushTransport, SendOptions};
use scheduler::{ReminderEngine, Scheduler, SoleInstance, spawn_cleanup};
use store::FileStore;

#[derive(Parser)]
#[command(
    name = "hydromate",
    version,
    about = "Hydration reminders over Web Push"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.hydromate/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder server
    Run,
    /// Scaffold ~/.hydromate/ and generate a VAPID key pair
    Init,
    /// Report scheduler status from a running server
    Status {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        #[arg(long, env = "HYDROMATE_API_KEY")]
        token: Option<String>,
    },
    /// Switch the accelerated test ticker on or off
    TestMode {
        #[arg(value_enum)]
        state: Toggle,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        #[arg(long, env = "HYDROMATE_API_KEY")]
        token: Option<String>,
    },
    /// Fire one manual due-check-and-dispatch cycle
    Trigger {
        /// Use the accelerated rules and the diagnostic test payload
        #[arg(long)]
        test: bool,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        #[arg(long, env = "HYDROMATE_API_KEY")]
        token: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => {
            config::init_config_dir().await?;
            tracing::info!("Initialized ~/.hydromate/");
        }
        Commands::Run => run(&cli.config).await?,
        Commands::Status { url, token } => {
            let status = api_get(&url, "/api/status", token.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::TestMode { state, url, token } => {
            let path = match state {
                Toggle::On => "/api/scheduler/start-test",
                Toggle::Off => "/api/scheduler/stop",
            };
            let status = api_post(&url, path, token.as_deref(), None).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Trigger { test, url, token } => {
            let summary = api_post(
                &url,
                "/api/scheduler/trigger",
                token.as_deref(),
                Some(serde_json::json!({ "test": test })),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;
    let zone = cfg.reminders.zone()?;

    if cfg.server.api_key.is_none() {
        if is_localhost(&cfg.server.bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{}'. Set [server] api_key.",
                cfg.server.bind
            );
        }
    }

    let store = Arc::new(FileStore::new(cfg.store.base_dir.clone(), zone)?);

    // Missing VAPID keys fail here, once, not on every send.
    let client = WebPushClient::new(&cfg.push)?;
    let push_public_key = client.public_key().to_string();
    let transport: Arc<dyn PushTransport> = Arc::new(client);

    let engine = Arc::new(ReminderEngine::new(
        store.clone(),
        transport,
        SendOptions {
            ttl_seconds: cfg.push.ttl_seconds,
            urgency: cfg.push.urgency,
        },
    ));
    let scheduler = Arc::new(Scheduler::new(
        engine,
        Arc::new(SoleInstance),
        cfg.reminders.production_locked,
    ));
    scheduler.start();

    let cleanup_cancel = CancellationToken::new();
    let cleanup = spawn_cleanup(
        store.clone(),
        u32::from(cfg.reminders.cleanup_hour),
        cleanup_cancel.clone(),
    );

    let state = api::AppState {
        store,
        scheduler: scheduler.clone(),
        name: "hydromate".to_string(),
        api_key: cfg.server.api_key.clone(),
        push_public_key,
        test_accounts: Arc::new(cfg.reminders.test_accounts.clone()),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    tracing::info!("hydromate listening on {}", cfg.server.bind);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;

    // An in-flight tick finishes; no new ones start.
    scheduler.stop();
    cleanup_cancel.cancel();
    cleanup.await.ok();
    Ok(())
}

// --- Operational commands over the running server's API ---

async fn api_get(url: &str, path: &str, token: Option<&str>) -> Result<Value> {
    let client = reqwest::Client::new();
    let mut request = client.get(format!("{url}{path}"));
    if let Some(t) = token {
        request = request.header("Authorization", format!("Bearer {t}"));
    }
    parse_response(request.send().await?).await
}

async fn api_post(
    url: &str,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<Value> {
    let client = reqwest::Client::new();
    let mut request = client.post(format!("{url}{path}"));
    if let Some(body) = &body {
        request = request.json(body);
    }
    if let Some(t) = token {
        request = request.header("Authorization", format!("Bearer {t}"));
    }
    parse_response(request.send().await?).await
}

async fn parse_response(response: reqwest::Response) -> Result<Value> {
    if !response.status().is_success() {
        anyhow::bail!("API error: {} {}", response.status(), response.text().await?);
    }
    Ok(response.json().await?)
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
