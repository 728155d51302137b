//! Mode B: hand audio off to an external broadcaster over a small
//! plain-text HTTP control channel instead of streaming it ourselves.
//!
//! Every call is fire-and-forget from the caller's point of view: a
//! non-200 response or a transport error is logged and treated as
//! non-fatal (`AitError::BroadcasterFailure`), never propagated as a
//! reason to fail the job that triggered it. Listener counts come from a
//! separate admin-stats poll (`admin_stats::fetch_listener_counts`)
//! rather than from the control channel itself.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::RwLock;

use crate::config::AdminStatsConfig;
use crate::error::AitResult;
use crate::protocol_constants::BROADCASTER_TIMEOUT;
use crate::stream::{admin_stats, MountInfo, StreamDelivery};

/// Which control-channel verb a call is for; translation streams use a
/// `translation_` prefixed analog of each endpoint.
enum Channel {
    Dialog,
    Translation,
}

pub struct BroadcasterStreamDelivery {
    client: reqwest::Client,
    host: String,
    http_port: u16,
    admin_stats: Option<AdminStatsConfig>,
    mounted: DashSet<String>,
    listener_cache: Arc<RwLock<Vec<(String, usize)>>>,
}

impl BroadcasterStreamDelivery {
    pub fn new(host: String, http_port: u16, admin_stats: Option<AdminStatsConfig>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host,
            http_port,
            admin_stats,
            mounted: DashSet::new(),
            listener_cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn endpoint(&self, channel: &Channel, verb: &str) -> String {
        let prefix = match channel {
            Channel::Dialog => "",
            Channel::Translation => "translation_",
        };
        format!("http://{}:{}/{prefix}{verb}_aitalkmaster_stream", self.host, self.http_port)
    }

    async fn post(&self, url: &str, body: String) -> AitResult<()> {
        let response = self
            .client
            .post(url)
            .header("content-type", "text/plain")
            .timeout(BROADCASTER_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|e| crate::error::AitError::BroadcasterFailure(format!("posting to {url}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            log::warn!("broadcaster control channel {url} returned {status}");
            return Err(crate::error::AitError::BroadcasterFailure(format!(
                "{url} returned {status}"
            )));
        }
        Ok(())
    }

    pub async fn start_stream(&self, join_key: &str, translation: bool) -> AitResult<()> {
        let channel = if translation { Channel::Translation } else { Channel::Dialog };
        let url = self.endpoint(&channel, "start");
        self.post(&url, join_key.to_string()).await?;
        self.mounted.insert(join_key.to_string());
        Ok(())
    }

    pub async fn queue_audio(&self, join_key: &str, filename: &str, translation: bool) -> AitResult<()> {
        let url = format!(
            "http://{}:{}/{}queue_aitalkmaster_audio",
            self.host,
            self.http_port,
            if translation { "translation_" } else { "" }
        );
        self.post(&url, format!("{join_key}::{filename}")).await
    }

    pub async fn stop_stream(&self, join_key: &str, translation: bool) -> AitResult<()> {
        let channel = if translation { Channel::Translation } else { Channel::Dialog };
        let url = self.endpoint(&channel, "stop");
        let result = self.post(&url, join_key.to_string()).await;
        self.mounted.remove(join_key);
        result
    }

    /// Refreshes the cached listener counts from the admin-stats endpoint,
    /// if one is configured. Non-fatal on failure — the prior cache is
    /// left in place.
    pub async fn refresh_listener_counts(&self) {
        let Some(cfg) = &self.admin_stats else { return };
        match admin_stats::fetch_listener_counts(&self.client, &cfg.host, cfg.port, &cfg.admin_user, &cfg.admin_password)
            .await
        {
            Ok(counts) => {
                let stripped = counts
                    .into_iter()
                    .map(|(mount, n)| {
                        let join_key = mount
                            .trim_start_matches('/')
                            .trim_start_matches(&cfg.stream_endpoint_prefix)
                            .trim_start_matches('/')
                            .to_string();
                        (join_key, n)
                    })
                    .collect();
                *self.listener_cache.write() = stripped;
            }
            Err(e) => log::warn!("admin-stats refresh failed: {e}"),
        }
    }
}

#[async_trait]
impl StreamDelivery for BroadcasterStreamDelivery {
    async fn on_new_file(&self, join_key: &str, filename: &str) {
        if let Err(e) = self.queue_audio(join_key, filename, false).await {
            log::warn!("queue_audio failed for {join_key}/{filename}: {e}");
        }
    }

    async fn on_reset(&self, _join_key: &str) {
        // Deliberately a no-op: stopping the mount here would cut off
        // listeners the moment a join key is reused for a new session.
        // Only the reaper's orphan sweep stops a mount.
    }

    async fn list_active_mounts(&self) -> Vec<MountInfo> {
        let cache = self.listener_cache.read();
        self.mounted
            .iter()
            .map(|entry| {
                let join_key = entry.key().clone();
                let listeners = cache.iter().find(|(k, _)| k == &join_key).map(|(_, n)| *n).unwrap_or(0);
                MountInfo { join_key, listeners }
            })
            .collect()
    }

    async fn listeners(&self, join_key: &str) -> usize {
        self.listener_cache
            .read()
            .iter()
            .find(|(k, _)| k == join_key)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    async fn start_mount(&self, join_key: &str) -> AitResult<()> {
        self.start_stream(join_key, false).await
    }

    async fn stop_mount(&self, join_key: &str) -> AitResult<()> {
        self.stop_stream(join_key, false).await
    }

    async fn refresh(&self) {
        self.refresh_listener_counts().await;
    }
}
