//! Reaper (C7): a periodic tick that reconciles listener counts against
//! session activity, evicts idle sessions past a retention horizon, and
//! cleans up anything left orphaned on disk or on the broadcaster.
//!
//! This is the only code path allowed to delete an active audio
//! directory — it does so only after the corresponding session has
//! already been removed from the registry, never before.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::TaskSpawner;
use crate::session::{archive, now_secs, SessionStore};
use crate::stream::StreamDelivery;

pub struct Reaper {
    pub sessions: Arc<SessionStore>,
    pub stream_delivery: Arc<dyn StreamDelivery>,
    pub generated_audio_dir: PathBuf,
    pub keep_alive: Vec<String>,
    pub tick_period: Duration,
    pub retention_horizon: Duration,
}

impl Reaper {
    pub fn spawn(self, spawner: &dyn TaskSpawner) {
        let reaper = Arc::new(self);
        spawner.spawn(async move {
            let mut interval = tokio::time::interval(reaper.tick_period);
            loop {
                interval.tick().await;
                reaper.tick().await;
            }
        });
    }

    /// One reconciliation pass. Public (not just spawn-internal) so tests
    /// can drive it deterministically without waiting on a timer.
    pub async fn tick(&self) {
        self.reconcile_listeners().await;
        self.evict_idle_sessions().await;
        self.reconcile_orphans().await;
    }

    /// Updates each live session's `last_listened_at` from the stream
    /// delivery mount's current listener count, so a session being
    /// actively listened to never gets evicted purely on account of its
    /// dialog having gone quiet.
    async fn reconcile_listeners(&self) {
        self.stream_delivery.refresh().await;
        for join_key in self.sessions.join_keys() {
            let listeners = self.stream_delivery.listeners(&join_key).await;
            if listeners > 0 {
                if let Some(session) = self.sessions.get(&join_key) {
                    session.lock().touch_listened();
                }
            }
        }
    }

    /// Evicts sessions idle past `retention_horizon`, unless their join
    /// key is on the keep-alive allowlist. Eviction archives on-disk
    /// audio (active -> inactive) before dropping the session from the
    /// registry, then stops any mount.
    async fn evict_idle_sessions(&self) {
        let cutoff = now_secs() - self.retention_horizon.as_secs_f64();
        for join_key in self.sessions.join_keys() {
            if self.keep_alive.iter().any(|k| k == &join_key) {
                continue;
            }
            let Some(session) = self.sessions.get(&join_key) else { continue };
            let last_listened_at = session.lock().last_listened_at();
            if last_listened_at >= cutoff {
                continue;
            }

            if let Err(e) = archive::reset_join_key(&self.generated_audio_dir, &join_key) {
                log::error!("reaper: archiving {join_key} before eviction failed: {e}");
                continue;
            }
            self.sessions.remove(&join_key);
            if let Err(e) = self.stream_delivery.stop_mount(&join_key).await {
                log::warn!("reaper: stopping mount for evicted session {join_key} failed: {e}");
            }
            if let Err(e) = archive::delete_active_dir(&self.generated_audio_dir, &join_key) {
                log::error!("reaper: deleting active dir for evicted session {join_key} failed: {e}");
            }
            log::info!("reaper: evicted idle session {join_key}");
        }
    }

    /// Deletes on-disk active directories and broadcaster mounts that no
    /// longer correspond to a live session — state left behind by a crash
    /// or a restart mid-eviction.
    async fn reconcile_orphans(&self) {
        match archive::active_join_keys(&self.generated_audio_dir) {
            Ok(keys) => {
                for join_key in keys {
                    if self.sessions.get(&join_key).is_none() {
                        if let Err(e) = archive::delete_active_dir(&self.generated_audio_dir, &join_key) {
                            log::error!("reaper: deleting orphaned active dir {join_key} failed: {e}");
                        } else {
                            log::info!("reaper: deleted orphaned active dir {join_key}");
                        }
                    }
                }
            }
            Err(e) => log::error!("reaper: listing active directories failed: {e}"),
        }

        for mount in self.stream_delivery.list_active_mounts().await {
            if self.sessions.get(&mount.join_key).is_none() {
                if let Err(e) = self.stream_delivery.stop_mount(&mount.join_key).await {
                    log::warn!("reaper: stopping orphaned mount {} failed: {e}", mount.join_key);
                } else {
                    log::info!("reaper: stopped orphaned mount {}", mount.join_key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::UserMessage;
    use crate::stream::{DirectStreamDelivery, MountInfo};
    use tempfile::tempdir;

    fn reaper(sessions: Arc<SessionStore>, generated_audio_dir: PathBuf, keep_alive: Vec<String>) -> Reaper {
        let stream_delivery: Arc<dyn StreamDelivery> =
            Arc::new(DirectStreamDelivery::new(sessions.clone(), generated_audio_dir.join("active"), generated_audio_dir.join("fallback")));
        Reaper {
            sessions,
            stream_delivery,
            generated_audio_dir,
            keep_alive,
            tick_period: Duration::from_secs(30),
            retention_horizon: Duration::from_secs(0),
        }
    }

    #[tokio::test]
    async fn evicts_idle_session_past_retention_horizon() {
        let sessions = Arc::new(SessionStore::new());
        let (session, _) = sessions.get_or_create("room1");
        session
            .lock()
            .push_user_message(UserMessage::new("hi".into(), "alice".into(), "m1".into()))
            .unwrap();

        let dir = tempdir().unwrap();
        let r = reaper(sessions.clone(), dir.path().to_path_buf(), Vec::new());
        r.tick().await;

        assert!(sessions.get("room1").is_none());
    }

    #[tokio::test]
    async fn keep_alive_list_survives_eviction_sweep() {
        let sessions = Arc::new(SessionStore::new());
        sessions.get_or_create("lobby");

        let dir = tempdir().unwrap();
        let r = reaper(sessions.clone(), dir.path().to_path_buf(), vec!["lobby".to_string()]);
        r.tick().await;

        assert!(sessions.get("lobby").is_some());
    }

    #[tokio::test]
    async fn reconcile_orphans_deletes_active_dir_with_no_session() {
        let sessions = Arc::new(SessionStore::new());
        let dir = tempdir().unwrap();
        let active = dir.path().join("active").join("ghost");
        std::fs::create_dir_all(&active).unwrap();

        let r = reaper(sessions, dir.path().to_path_buf(), Vec::new());
        r.tick().await;

        assert!(!active.exists());
    }

    #[test]
    fn mount_info_equality_supports_assertions() {
        let a = MountInfo { join_key: "x".into(), listeners: 1 };
        let b = MountInfo { join_key: "x".into(), listeners: 1 };
        assert_eq!(a, b);
    }
}
