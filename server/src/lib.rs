//! Player progression and ladder services for the coding duel game.
//!
//! The pure rules (experience curve, stat merging, ladder order) live in
//! `duel-shared`; this crate adds the shared player cache, the remote
//! gateway, the local snapshot mirror and the service that wires them.

pub mod activity;
pub mod cache;
pub mod config;
pub mod gateway;
pub mod persistence;
pub mod progression;
pub mod remote_sync;

pub use activity::{ActivityCounter, ActivityGuard, ActivitySink};
pub use cache::{CacheView, LoadState, PlayerCache};
pub use config::{Config, ConfigError};
pub use gateway::{
    GatewayError, IdentityHints, LocalOnlyGateway, PersistOutcome, PlayerGateway, PlayerPatch,
    PostgresGateway, RemoteSession,
};
pub use persistence::{JsonFileMirror, LocalMirror, MirrorHandle, RedisMirror, StorageError};
pub use progression::{ProgressionService, ServiceError};
pub use remote_sync::SyncHandle;
