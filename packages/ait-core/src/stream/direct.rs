//! Mode A: direct MP3 streaming over HTTP.
//!
//! One listener per (join key, source IP): a second request for the same
//! pair supersedes the first by bumping a generation counter the active
//! stream checks between chunks — the superseded response simply stops
//! producing bytes rather than being forcibly closed. A request from a
//! *different* source IP for the same join key is a distinct listener and
//! does not touch the first one's generation or played set. Each
//! session's dialog keeps a 60-second playback window of recently-ready
//! assistant responses (`Session::responses_ready_since`); the generator
//! walks that window in order, skipping files already played to this
//! listener, and falls back to a random pick from the filler pool when
//! nothing new is eligible.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_stream::Stream;

use crate::error::{AitError, AitResult};
use crate::pipeline::audio;
use crate::protocol_constants::{PLAYBACK_RANGE_SECS, STREAM_CHUNK_SIZE};
use crate::session::{now_secs, SessionStore};
use crate::stream::{MountInfo, StreamDelivery};

/// Per-(join key, source IP) listener state.
struct IpMount {
    generation: AtomicU64,
    played: Mutex<HashSet<String>>,
}

impl IpMount {
    fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            played: Mutex::new(HashSet::new()),
        }
    }
}

/// All listeners currently or previously attached to a join key, one
/// [`IpMount`] per distinct source IP.
struct Mount {
    by_ip: DashMap<String, Arc<IpMount>>,
}

impl Mount {
    fn new() -> Self {
        Self { by_ip: DashMap::new() }
    }
}

/// Direct HTTP stream delivery, keyed by join key.
pub struct DirectStreamDelivery {
    sessions: Arc<SessionStore>,
    active_audio_dir: PathBuf,
    fallback_audio_dir: PathBuf,
    mounts: DashMap<String, Arc<Mount>>,
}

impl DirectStreamDelivery {
    pub fn new(sessions: Arc<SessionStore>, active_audio_dir: PathBuf, fallback_audio_dir: PathBuf) -> Self {
        Self {
            sessions,
            active_audio_dir,
            fallback_audio_dir,
            mounts: DashMap::new(),
        }
    }

    fn mount(&self, join_key: &str) -> Arc<Mount> {
        self.mounts
            .entry(join_key.to_string())
            .or_insert_with(|| Arc::new(Mount::new()))
            .clone()
    }

    /// Gets or creates the listener state for `source_ip` within `mount`,
    /// without superseding whatever generation it already holds.
    fn ip_mount(mount: &Mount, source_ip: &str) -> Arc<IpMount> {
        mount.by_ip.entry(source_ip.to_string()).or_insert_with(|| Arc::new(IpMount::new())).clone()
    }

    fn fallback_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(&self.fallback_audio_dir)
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("mp3"))
            .collect()
    }

    /// Registers `source_ip` as the listener for `join_key`, superseding
    /// whatever listener held it before, and returns a byte stream the
    /// HTTP handler can hand straight to the response body.
    pub fn listen(
        &self,
        join_key: &str,
        source_ip: &str,
    ) -> AitResult<impl Stream<Item = AitResult<Bytes>> + Send + 'static> {
        let mount = self.mount(join_key);
        let ip_mount = Self::ip_mount(&mount, source_ip);
        let generation = ip_mount.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let sessions = self.sessions.clone();
        let join_key = join_key.to_string();
        let active_audio_dir = self.active_audio_dir.clone();
        let fallback_files = self.fallback_files();
        let ip_mount = ip_mount.clone();

        Ok(stream! {
            loop {
                if ip_mount.generation.load(Ordering::SeqCst) != generation {
                    break;
                }

                let next_file = {
                    let Some(session) = sessions.get(&join_key) else { break };
                    let cutoff = now_secs() - PLAYBACK_RANGE_SECS as f64;
                    let guard = session.lock();
                    let played = ip_mount.played.lock();
                    guard
                        .responses_ready_since(cutoff)
                        .into_iter()
                        .filter_map(|r| r.filename.clone())
                        .find(|f| !played.contains(f))
                };

                let path = match &next_file {
                    Some(filename) => active_audio_dir.join(&join_key).join(filename),
                    None => {
                        if fallback_files.is_empty() {
                            tokio::time::sleep(Duration::from_millis(500)).await;
                            continue;
                        }
                        let idx = rand::random::<usize>() % fallback_files.len();
                        fallback_files[idx].clone()
                    }
                };

                let bytes = match tokio::fs::read(&path).await {
                    Ok(b) => b,
                    Err(e) => {
                        yield Err(AitError::Internal(format!("reading {}: {e}", path.display())));
                        break;
                    }
                };
                let duration_secs = audio::probe_duration_secs(&path).unwrap_or(0.0);

                if let Some(filename) = &next_file {
                    ip_mount.played.lock().insert(filename.clone());
                }

                let num_chunks = bytes.len().div_ceil(STREAM_CHUNK_SIZE).max(1);
                let per_chunk_delay = if duration_secs > 0.0 {
                    Duration::from_secs_f64(duration_secs / num_chunks as f64)
                } else {
                    Duration::from_millis(0)
                };

                for chunk in bytes.chunks(STREAM_CHUNK_SIZE) {
                    if ip_mount.generation.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    yield Ok(Bytes::copy_from_slice(chunk));
                    if !per_chunk_delay.is_zero() {
                        tokio::time::sleep(per_chunk_delay).await;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl StreamDelivery for DirectStreamDelivery {
    async fn on_new_file(&self, _join_key: &str, _filename: &str) {
        // The generator loop polls `Session::responses_ready_since` on its
        // own cadence; nothing to push here.
    }

    async fn on_reset(&self, join_key: &str) {
        if let Some(mount) = self.mounts.get(join_key) {
            for ip_mount in mount.by_ip.iter() {
                ip_mount.played.lock().clear();
                ip_mount.generation.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn list_active_mounts(&self) -> Vec<MountInfo> {
        self.mounts
            .iter()
            .map(|entry| MountInfo {
                join_key: entry.key().clone(),
                listeners: entry.value().by_ip.len(),
            })
            .collect()
    }

    async fn listeners(&self, join_key: &str) -> usize {
        self.mounts.get(join_key).map(|m| m.by_ip.len()).unwrap_or(0)
    }

    async fn start_mount(&self, join_key: &str) -> AitResult<()> {
        self.mount(join_key);
        Ok(())
    }

    async fn stop_mount(&self, join_key: &str) -> AitResult<()> {
        if let Some((_, mount)) = self.mounts.remove(join_key) {
            for ip_mount in mount.by_ip.iter() {
                ip_mount.generation.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn start_and_stop_mount_tracks_listener_registry() {
        let sessions = Arc::new(SessionStore::new());
        let dir = tempdir().unwrap();
        let delivery = DirectStreamDelivery::new(sessions, dir.path().join("active"), dir.path().join("fallback"));

        delivery.start_mount("room1").await.unwrap();
        assert_eq!(delivery.list_active_mounts().await.len(), 1);

        delivery.stop_mount("room1").await.unwrap();
        assert_eq!(delivery.list_active_mounts().await.len(), 0);
    }

    #[tokio::test]
    async fn reset_clears_played_set_without_removing_mount() {
        let sessions = Arc::new(SessionStore::new());
        let dir = tempdir().unwrap();
        let delivery = DirectStreamDelivery::new(sessions, dir.path().join("active"), dir.path().join("fallback"));
        delivery.start_mount("room1").await.unwrap();
        delivery.on_reset("room1").await;
        assert_eq!(delivery.list_active_mounts().await.len(), 1);
    }

    #[tokio::test]
    async fn distinct_source_ips_are_independent_listeners() {
        let sessions = Arc::new(SessionStore::new());
        let dir = tempdir().unwrap();
        let delivery = DirectStreamDelivery::new(sessions, dir.path().join("active"), dir.path().join("fallback"));

        let mount = delivery.mount("room1");
        let a = DirectStreamDelivery::ip_mount(&mount, "1.1.1.1");
        let a_gen = a.generation.fetch_add(1, Ordering::SeqCst) + 1;
        a.played.lock().insert("a.mp3".into());

        // A second IP joining the same join key must not supersede the
        // first IP's generation or inherit its played set.
        let b = DirectStreamDelivery::ip_mount(&mount, "2.2.2.2");
        let b_gen = b.generation.fetch_add(1, Ordering::SeqCst) + 1;

        assert_eq!(a.generation.load(Ordering::SeqCst), a_gen);
        assert_eq!(b.generation.load(Ordering::SeqCst), b_gen);
        assert!(b.played.lock().is_empty());
        assert_eq!(delivery.listeners("room1").await, 2);

        // A reconnect from the same IP supersedes only that IP's generation.
        let a2 = DirectStreamDelivery::ip_mount(&mount, "1.1.1.1");
        let a2_gen = a2.generation.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(a2_gen > a_gen);
        assert_eq!(b.generation.load(Ordering::SeqCst), b_gen);
        assert_eq!(delivery.listeners("room1").await, 2);
    }
}
