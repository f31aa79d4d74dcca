//! Duel ladder service
//!
//! Keeps the shared player ladder fresh and the local player snapshot in
//! sync with the remote store.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use duel_server::{
    ActivityCounter, ActivitySink, Config, IdentityHints, JsonFileMirror, LocalMirror,
    LocalOnlyGateway, MirrorHandle, PlayerCache, PlayerGateway, PostgresGateway,
    ProgressionService, RedisMirror,
};
use duel_shared::level_progress;

/// Ladder entries logged on each refresh
const LADDER_LOG_SIZE: usize = 10;

/// How long shutdown waits for queued remote writes
const SYNC_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reset the activity counter after this long without progress
const ACTIVITY_STALL_WINDOW: Duration = Duration::from_secs(30);

/// Connect the remote gateway, falling back to the in-memory one
async fn build_gateway(config: &Config, activity: Arc<dyn ActivitySink>) -> Arc<dyn PlayerGateway> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DUEL_DATABASE_URL not set, running with a local-only player store");
        return Arc::new(LocalOnlyGateway::new().with_limit(config.ladder_limit as usize));
    };

    match PostgresGateway::connect(url, config.ladder_limit).await {
        Ok(gateway) => {
            info!("Connected to PostgreSQL");
            Arc::new(gateway.with_activity(activity))
        }
        Err(e) => {
            error!("Failed to connect to PostgreSQL: {}", e);
            error!("Ladder will only show players from this session");
            Arc::new(LocalOnlyGateway::new().with_limit(config.ladder_limit as usize))
        }
    }
}

/// Open the snapshot store, falling back to the JSON file
async fn build_mirror(config: &Config) -> Arc<dyn LocalMirror> {
    if let Some(url) = config.redis_url.as_deref() {
        match RedisMirror::connect(url).await {
            Ok(mirror) => {
                info!("Connected to Redis");
                return Arc::new(mirror);
            }
            Err(e) => error!("Failed to connect to Redis: {}", e),
        }
    }

    info!("Player snapshot at {}", config.snapshot_path.display());
    Arc::new(JsonFileMirror::new(config.snapshot_path.clone()))
}

fn log_ladder(cache: &PlayerCache) {
    let view = cache.snapshot();
    if let Some(e) = &view.error {
        warn!("Ladder may be out of date: {}", e);
    }

    info!("Ladder ({} players):", view.players.len());
    for (rank, player) in view.ladder.iter().take(LADDER_LOG_SIZE).enumerate() {
        info!(
            "  #{:<3} {:<24} lvl {:>2}  {} xp",
            rank + 1,
            player.name,
            player.level,
            player.experience
        );
    }
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };

    info!("Starting duel ladder service...");
    info!("Cache TTL: {}s", config.cache_ttl.as_secs());

    let activity = Arc::new(ActivityCounter::new());
    let gateway = build_gateway(&config, activity.clone()).await;
    let mirror = MirrorHandle::spawn(build_mirror(&config).await);
    let cache = PlayerCache::new(gateway.clone(), config.cache_ttl, Some(mirror.clone()));
    let service = ProgressionService::new(mirror.clone(), gateway, cache.clone());

    // Re-attach the resumed player to their remote record
    if let Some(player) = service.start().await {
        let identity = IdentityHints {
            external_id: player.slug.clone().unwrap_or_else(|| player.id.clone()),
            display_name: Some(player.name.clone()),
            email: None,
            avatar_url: player.avatar_url.clone(),
        };
        let player = service.sign_in(&identity).await;
        let progress = level_progress(player.experience);
        match progress.to_next {
            Some(to_next) => info!(
                "{} is level {} ({} xp to next level)",
                player.name, progress.level, to_next
            ),
            None => info!("{} is at the level cap", player.name),
        }
    }

    let mut ticker = tokio::time::interval(config.refresh_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cache.refresh(false).await;
                log_ladder(&cache);
                activity.reset_if_stalled(ACTIVITY_STALL_WINDOW);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    if tokio::time::timeout(SYNC_DRAIN_TIMEOUT, service.flush_remote())
        .await
        .is_err()
    {
        warn!("Gave up waiting for remote progress writes");
    }
    mirror.shutdown().await;
    info!("Stopped");
}
