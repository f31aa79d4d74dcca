//! Shared player cache.
//!
//! One cache instance serves every consumer of the player list. Refreshes
//! are TTL-gated and single-flight: while a fetch is running, every other
//! `refresh` call (forced or not) waits on that same fetch instead of
//! starting its own.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error};
use tokio::sync::watch;
use tokio::time::Instant;

use duel_shared::{find_player, sort_for_ladder, Player};

use crate::gateway::PlayerGateway;
use crate::persistence::MirrorHandle;

/// How a view should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Never fetched and not fetching
    Idle,
    Loading,
    Loaded,
    /// Last fetch failed; `players` holds whatever was there before
    Failed,
}

/// Read-only snapshot of the cache
#[derive(Debug, Clone, Default)]
pub struct CacheView {
    pub players: Vec<Player>,
    /// `players` in ladder order
    pub ladder: Vec<Player>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_fetched: Option<Instant>,
}

impl CacheView {
    pub fn is_stale(&self, ttl: Duration) -> bool {
        match self.last_fetched {
            Some(fetched) => fetched.elapsed() >= ttl,
            None => true,
        }
    }

    pub fn state(&self) -> LoadState {
        if self.loading {
            LoadState::Loading
        } else if self.error.is_some() {
            LoadState::Failed
        } else if self.last_fetched.is_some() {
            LoadState::Loaded
        } else {
            LoadState::Idle
        }
    }

    fn set_players(&mut self, players: Vec<Player>) {
        self.ladder = sort_for_ladder(&players);
        self.players = players;
    }
}

type InFlight = Shared<BoxFuture<'static, ()>>;

struct CacheInner {
    gateway: Arc<dyn PlayerGateway>,
    mirror: Option<MirrorHandle>,
    ttl: Duration,
    view: watch::Sender<CacheView>,
    in_flight: Mutex<Option<InFlight>>,
}

impl CacheInner {
    async fn fetch(self: Arc<Self>) {
        debug!("Fetching player list");
        let result = self.gateway.fetch_all().await;

        self.view.send_modify(|view| {
            view.loading = false;
            match result {
                Ok(players) => {
                    debug!("Player cache now holds {} players", players.len());
                    view.set_players(players);
                    view.error = None;
                    view.last_fetched = Some(Instant::now());
                }
                Err(e) => {
                    error!("Failed to refresh players, keeping previous list: {}", e);
                    view.error = Some(e.to_string());
                }
            }
        });

        *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Cloneable handle to a shared player cache
#[derive(Clone)]
pub struct PlayerCache {
    inner: Arc<CacheInner>,
}

impl PlayerCache {
    /// `mirror` receives a snapshot of every locally upserted player
    pub fn new(gateway: Arc<dyn PlayerGateway>, ttl: Duration, mirror: Option<MirrorHandle>) -> Self {
        let (view, _) = watch::channel(CacheView::default());
        Self {
            inner: Arc::new(CacheInner {
                gateway,
                mirror,
                ttl,
                view,
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Bring the cache up to date.
    ///
    /// Joins a running fetch if there is one. Otherwise fetches when the
    /// data is stale or `force` is set, and returns at once when it is fresh.
    /// Never fails: a failed fetch keeps the old list and sets `error`.
    pub async fn refresh(&self, force: bool) {
        let fetch = {
            let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.as_ref() {
                Some(running) => running.clone(),
                None => {
                    if !force && !self.is_stale() {
                        return;
                    }
                    self.inner.view.send_modify(|view| view.loading = true);
                    let fetch = Arc::clone(&self.inner).fetch().boxed().shared();
                    *in_flight = Some(fetch.clone());
                    fetch
                }
            }
        };

        fetch.await;
    }

    /// Mark the data stale so the next `refresh` fetches
    pub fn invalidate(&self) {
        self.inner.view.send_modify(|view| view.last_fetched = None);
    }

    /// Replace the player with the same id, or append it. Visible to the
    /// next read immediately; the mirror write happens in the background.
    pub fn upsert_local(&self, player: Player) {
        self.inner.view.send_modify(|view| {
            let mut players = view.players.clone();
            match players.iter_mut().find(|p| p.id == player.id) {
                Some(existing) => *existing = player.clone(),
                None => players.push(player.clone()),
            }
            view.set_players(players);
        });

        if let Some(mirror) = &self.inner.mirror {
            mirror.save(player);
        }
    }

    /// Player with id or slug `key`
    pub fn get_by_id(&self, key: &str) -> Option<Player> {
        find_player(&self.inner.view.borrow().players, key).cloned()
    }

    pub fn snapshot(&self) -> CacheView {
        self.inner.view.borrow().clone()
    }

    /// Watch every change to the cache
    pub fn subscribe(&self) -> watch::Receiver<CacheView> {
        self.inner.view.subscribe()
    }

    pub fn players(&self) -> Vec<Player> {
        self.inner.view.borrow().players.clone()
    }

    pub fn ladder(&self) -> Vec<Player> {
        self.inner.view.borrow().ladder.clone()
    }

    /// First `n` ladder entries
    pub fn top(&self, n: usize) -> Vec<Player> {
        self.inner.view.borrow().ladder.iter().take(n).cloned().collect()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.view.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.inner.view.borrow().error.clone()
    }

    pub fn last_fetched(&self) -> Option<Instant> {
        self.inner.view.borrow().last_fetched
    }

    pub fn is_stale(&self) -> bool {
        self.inner.view.borrow().is_stale(self.inner.ttl)
    }
}
