use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, bail};

use nextmove_bridge::harness::{DirectoryIntake, FileAsicHandler};
use nextmove_bridge::model::NextMoveOutMessage;
use nextmove_bridge::{BridgeConfig, DpePlugin, DpeStrategy, SendOutcome, spawn_poll_loop};

const USAGE: &str = "usage: nextmove-bridge poll | send <message.json> [bundle.zip]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str);
    if !matches!(command, Some("poll") | Some("send")) {
        bail!(USAGE);
    }

    let config = BridgeConfig::from_env().context("loading configuration")?;

    let inbox = std::env::var("NEXTMOVE_BRIDGE_INBOX")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./inbox"));
    let bundle = match command {
        Some("send") => args.get(2).map(PathBuf::from),
        _ => None,
    };

    let plugin = DpePlugin::connect(
        &config,
        Arc::new(FileAsicHandler::new(bundle)),
        Arc::new(DirectoryIntake::new(&inbox)),
    )?;

    eprintln!("📨 NextMove bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Queue: {}", config.queue_name);
    eprintln!("   Container: {}", config.container_name);

    match command {
        Some("poll") => {
            eprintln!("   Inbox: {}", inbox.display());
            eprintln!(
                "   Polling every {}s (batch {}, wait {}s). Ctrl-C to stop.\n",
                config.poll_interval.as_secs(),
                config.batch_size,
                config.receive_wait.as_secs()
            );

            let strategy: Arc<dyn DpeStrategy> = Arc::new(plugin);
            let (handle, shutdown) = spawn_poll_loop(strategy, config.poll_interval);

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested");
            shutdown.store(true, Ordering::Relaxed);
            handle.abort();
            let _ = handle.await;
        }
        Some("send") => {
            let Some(path) = args.get(1) else {
                bail!(USAGE);
            };
            let raw = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {path}"))?;
            let message: NextMoveOutMessage =
                serde_json::from_slice(&raw).with_context(|| format!("parsing {path}"))?;

            match plugin.send(&message).await? {
                SendOutcome::Published { attachment_bytes } => eprintln!(
                    "   Sent {} ({} attachment bytes)",
                    message.message_id,
                    attachment_bytes.unwrap_or(0)
                ),
                SendOutcome::Rejected => bail!("ASiC packaging failed for {}", message.message_id),
            }
        }
        _ => bail!(USAGE),
    }

    Ok(())
}
