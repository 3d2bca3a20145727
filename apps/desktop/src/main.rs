use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use client_core::{load_settings, ChannelSyncClient, ClientEvent, PostSyncStatus};
use serde_json::json;
use shared::domain::{Team, TeamId, UserId};
use storage::{MemoryStateStore, StateStore, StoreState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Opens one channel by name against a message store and prints what was synced.
#[derive(Parser, Debug)]
struct Args {
    /// Overrides `server_url` from sync.toml and the environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    team_id: String,
    #[arg(long)]
    team_name: String,
    #[arg(long)]
    channel: String,
    /// Pages of older posts to load after the first sync.
    #[arg(long, default_value_t = 0)]
    older_pages: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let args = Args::parse();

    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if args.token.is_some() {
        settings.auth_token = args.token;
    }

    let state = StoreState::default()
        .with_current_user(UserId::new(args.user_id))
        .with_team(Team {
            id: TeamId::new(args.team_id),
            name: args.team_name.clone(),
            display_name: args.team_name.clone(),
        });
    let store = Arc::new(MemoryStateStore::new(state));
    let client = ChannelSyncClient::from_settings(&settings, store.clone())?;
    let mut events = client.subscribe_events();
    info!(server_url = %settings.server_url, "desktop: connecting");

    let opened = client
        .handle_select_channel_by_name(&args.channel, Some(&args.team_name))
        .await?;
    let channel_id = opened.activation.channel_id.clone();
    opened.activation.marks.settled().await;
    let Some(post_sync) = opened.post_sync else {
        return Err(anyhow!("channel {channel_id} was not stored locally"));
    };
    if post_sync.await? == PostSyncStatus::Failed {
        return Err(anyhow!("could not load posts for channel {channel_id}"));
    }

    for _ in 0..args.older_pages {
        match client.load_older_posts(&channel_id).await {
            PostSyncStatus::Applied { .. } => {}
            status => {
                warn!(?status, "desktop: stopped paging back");
                break;
            }
        }
    }
    let unread_version = client.load_unread_channel_posts().await;

    while let Ok(event) = events.try_recv() {
        if let ClientEvent::PostSyncFailed { channel_id, message, .. } = event {
            warn!(%channel_id, %message, "desktop: post sync failed");
        }
    }

    let snapshot = store.snapshot();
    let summary = json!({
        "channel_id": channel_id,
        "posts": snapshot.post_ids_in_channel(&channel_id).len(),
        "latest_post_at": snapshot.latest_post_create_at(&channel_id),
        "last_synced_at": snapshot.sync_cursor(&channel_id),
        "unread_channels": snapshot.unread_channel_ids(),
        "unread_sweep_version": unread_version,
        "store_version": snapshot.version(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
