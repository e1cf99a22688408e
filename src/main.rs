//! Parlor - Discord-XMPP chat bridge
//!
//! Relays messages between one Discord channel and one XMPP multi-user chat
//! room, carrying Discord replies over as `>` quotes and back.

mod bridge;
mod common;
mod config;
mod discord;
mod muc;
mod protocol;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serenity::prelude::GatewayIntents;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use bridge::{run_xmpp_to_discord, Relay};
use config::{get_config_path, load_and_validate};
use discord::{build_http, DiscordChannel, MessageResolver, RelayHandler};
use muc::{MucChannels, MucClient, XmppHandle};
use protocol::xmpp::{connect_and_join, SessionSettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Parlor v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  XMPP account: {}", config.xmpp.account);
    info!("  XMPP server: {}", config.xmpp.server);
    info!("  Room: {} as {}", config.xmpp.room, config.xmpp.nick);
    info!("  Discord channel: {}", config.discord.channel);

    let relay = Arc::new(Relay::new(&config));
    let resolver = Arc::new(MessageResolver::new(
        config.discord.enable_markdown.unwrap_or(false),
        config.discord.resolve_emojis.unwrap_or(true),
    ));

    // ============================================================
    // XMPP session
    // ============================================================
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let settings = SessionSettings::from_config(&config.xmpp);
    let session = connect_and_join(&settings).await.map_err(|e| {
        error!("Failed to join {}: {}", settings.room, e);
        e
    })?;
    info!("XMPP session established as {}", session.bound_jid);

    let muc_client = MucClient::new(
        settings,
        MucChannels {
            event_tx,
            outgoing_rx,
            shutdown_rx,
        },
    );
    let mut xmpp_task = tokio::spawn(muc_client.run_with_reconnect(session));

    // ============================================================
    // Discord client
    // ============================================================
    let intents =
        GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT | GatewayIntents::GUILDS;
    let handler = RelayHandler::new(
        relay.clone(),
        XmppHandle::new(outgoing_tx),
        resolver.clone(),
    );
    let mut client =
        serenity::client::ClientBuilder::new_with_http(build_http(&config.discord.token)?, intents)
            .event_handler(handler)
            .await
            .map_err(|e| {
                error!("Failed to create Discord client: {}", e);
                e
            })?;

    let discord_channel = DiscordChannel::new(
        client.http.clone(),
        client.cache.clone(),
        relay.channel(),
        resolver,
    );
    let shard_manager = client.shard_manager.clone();

    info!("Starting Discord bot...");
    let discord_task = tokio::spawn(async move { client.start().await });

    let forward_to_discord = tokio::spawn(run_xmpp_to_discord(
        relay,
        event_rx,
        Arc::new(discord_channel),
    ));

    // ============================================================
    // Run until a signal or a task ends
    // ============================================================
    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - leaving the room...");
            true
        }
        result = discord_task => {
            match result {
                Ok(Ok(())) => warn!("Discord client stopped"),
                Ok(Err(e)) => error!("Discord client error: {}", e),
                Err(e) => error!("Discord task panicked: {}", e),
            }
            false
        }
        _ = &mut xmpp_task => false,
        _ = forward_to_discord => false,
    };

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed (XMPP client already exited): {}", e);
    }
    shard_manager.shutdown_all().await;

    if !xmpp_task.is_finished() {
        match tokio::time::timeout(Duration::from_secs(5), xmpp_task).await {
            Ok(Ok(())) => info!("Left the room"),
            Ok(Err(e)) => warn!("XMPP task panicked: {}", e),
            Err(_) => warn!("Leaving the room timed out"),
        }
    }

    if !shutdown {
        anyhow::bail!("a relay task stopped unexpectedly");
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
