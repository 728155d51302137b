//! Polls a broadcaster's admin-stats HTTP endpoint for listener counts.
//!
//! The response is the small subset of an Icecast-style `stats.xml`
//! payload this service cares about: a `<source>` element per mount
//! point carrying a `<listeners>` count.

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::error::{AitError, AitResult};

#[derive(Debug, Deserialize)]
#[serde(rename = "icestats")]
struct IceStats {
    #[serde(rename = "source", default)]
    sources: Vec<SourceStats>,
}

#[derive(Debug, Deserialize)]
struct SourceStats {
    #[serde(rename = "@mount")]
    mount: String,
    #[serde(default)]
    listeners: usize,
}

/// Fetches listener stats from `http://host:port/<prefix>`, returning the
/// listener count per mount point (the mount's path, e.g. `/aitalkmaster/room1`).
pub async fn fetch_listener_counts(
    client: &reqwest::Client,
    host: &str,
    port: u16,
    admin_user: &str,
    admin_password: &str,
) -> AitResult<Vec<(String, usize)>> {
    let url = format!("http://{host}:{port}/admin/stats");
    let response = client
        .get(&url)
        .basic_auth(admin_user, Some(admin_password))
        .timeout(crate::protocol_constants::BROADCASTER_TIMEOUT)
        .send()
        .await
        .map_err(|e| AitError::BroadcasterFailure(format!("admin-stats request to {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(AitError::BroadcasterFailure(format!(
            "admin-stats request to {url} returned {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| AitError::BroadcasterFailure(format!("reading admin-stats body: {e}")))?;

    let stats: IceStats =
        from_str(&body).map_err(|e| AitError::BroadcasterFailure(format!("parsing admin-stats xml: {e}")))?;

    Ok(stats.sources.into_iter().map(|s| (s.mount, s.listeners)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_icestats_source_listener_counts() {
        let xml = r#"<icestats>
            <source mount="/aitalkmaster/room1"><listeners>3</listeners></source>
            <source mount="/aitalkmaster/room2"><listeners>0</listeners></source>
        </icestats>"#;
        let stats: IceStats = from_str(xml).unwrap();
        assert_eq!(stats.sources.len(), 2);
        assert_eq!(stats.sources[0].mount, "/aitalkmaster/room1");
        assert_eq!(stats.sources[0].listeners, 3);
    }
}
