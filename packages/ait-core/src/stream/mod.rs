//! Stream delivery (C6): two interchangeable ways of getting generated
//! audio to a listener.
//!
//! Mode A ([`direct::DirectStreamDelivery`]) speaks MP3 directly over
//! HTTP: one listener per (join key, source IP) pair, the newest
//! superseding any prior one, paced to the decoded duration of each file
//! with a filler pool for dead air. Mode B ([`broadcaster::BroadcasterStreamDelivery`])
//! hands audio off to an external broadcaster over a small plain-text
//! control channel and polls its admin-stats endpoint for listener
//! counts. Which mode is active is a deployment choice — `broadcaster_control`
//! present in configuration means Mode B — made once at bootstrap, not a
//! runtime one.

pub mod admin_stats;
pub mod broadcaster;
pub mod direct;

use async_trait::async_trait;

use crate::error::AitResult;

pub use broadcaster::BroadcasterStreamDelivery;
pub use direct::DirectStreamDelivery;

/// A single active mount: a join key currently backed by either a direct
/// listener or a broadcaster stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MountInfo {
    pub join_key: String,
    pub listeners: usize,
}

/// Abstraction the reaper and the HTTP layer program against, so the two
/// delivery modes are interchangeable everywhere but bootstrap.
#[async_trait]
pub trait StreamDelivery: Send + Sync {
    /// Called whenever the pipeline finishes writing a new audio file for
    /// `join_key`, so a direct-mode mount can notice it and a
    /// broadcaster-mode mount can push it over the queue control endpoint.
    async fn on_new_file(&self, join_key: &str, filename: &str);

    /// Called when a session is reset; clears any pacing/playback state
    /// held for `join_key` without necessarily tearing the mount down.
    async fn on_reset(&self, join_key: &str);

    /// Snapshot of every join key currently mounted, for the reaper's
    /// reconciliation sweep.
    async fn list_active_mounts(&self) -> Vec<MountInfo>;

    /// Current listener count for `join_key`, 0 if not mounted.
    async fn listeners(&self, join_key: &str) -> usize;

    /// Refreshes whatever external listener-count source this delivery
    /// mode depends on. A no-op for modes that already know their
    /// listener count synchronously (direct streaming); the broadcaster
    /// mode polls its admin-stats endpoint here. Called once per reaper
    /// tick, before listener reconciliation reads `listeners`/`list_active_mounts`.
    async fn refresh(&self) {}

    /// Starts a mount for `join_key` if one does not already exist.
    async fn start_mount(&self, join_key: &str) -> AitResult<()>;

    /// Stops and removes the mount for `join_key`.
    async fn stop_mount(&self, join_key: &str) -> AitResult<()>;
}
