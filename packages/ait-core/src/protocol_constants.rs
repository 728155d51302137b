//! Fixed protocol constants.
//!
//! These values come directly from the behavior this service reproduces
//! and should not be casually changed — they affect on-disk filename
//! ordering, wire compatibility with the broadcaster control channel, and
//! playback pacing.

use std::time::Duration;

/// Direct-stream chunk size in bytes (Mode A).
pub const STREAM_CHUNK_SIZE: usize = 1024;

/// Window (seconds) within which a newly ready assistant response is still
/// eligible for direct-stream playback.
pub const PLAYBACK_RANGE_SECS: u64 = 60;

/// Minimum digits in a zero-padded audio sequence number, so lexicographic
/// filename order always equals temporal order.
pub const SEQUENCE_DIGITS: usize = 3;

/// Default bound on the conversation ring and generation cache.
pub const DEFAULT_RING_CAPACITY: usize = 1000;

/// Reaper tick period.
pub const REAPER_PERIOD: Duration = Duration::from_secs(30);

/// Idle-session retention horizon before the reaper evicts a session with
/// no listeners.
pub const RETENTION_HORIZON: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Timeout for broadcaster control-channel HTTP calls.
pub const BROADCASTER_TIMEOUT: Duration = Duration::from_secs(5);

/// MP3 re-encode bitrate (kbps) applied uniformly to every generated file.
pub const MP3_BITRATE_KBPS: u32 = 192;

/// Rate-limit horizon: usage samples older than this are expired lazily.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Application identity advertised on the health endpoint.
pub const SERVICE_ID: &str = "aitalkmaster";
