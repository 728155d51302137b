//! AI Talkmaster core — shared library for the AIT conversational
//! orchestration service.
//!
//! This crate provides the core functionality for AI Talkmaster: a
//! service that accepts dialog turns over HTTP, routes them through
//! chat and text-to-speech providers, and delivers the resulting audio
//! either directly over HTTP or through an external broadcaster. It is
//! designed to be used by the standalone headless server in
//! `apps/ait-server`.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`]: the three independent dialog registries (`Session`,
//!   `Conversation`, `GenerationCache`) and the audio/archive layout
//! - [`queue`]: bounded job queues and the supervised worker pools
//! - [`pipeline`]: provider calls and audio post-processing
//! - [`providers`]: chat and text-to-speech clients, startup catalog
//!   validation
//! - [`stream`]: direct HTTP streaming and external-broadcaster hand-off
//! - [`reaper`]: idle-session eviction and orphan reconciliation
//! - [`state`]: shared application state
//! - [`bootstrap`]: the composition root
//! - [`error`]: centralized error types
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//!   (the worker pools and the reaper)
//! - [`StreamDelivery`](stream::StreamDelivery): direct vs. broadcaster
//!   audio delivery

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod llm_log;
pub mod pipeline;
pub mod protocol_constants;
pub mod providers;
pub mod queue;
pub mod rate_limiter;
pub mod reaper;
pub mod runtime;
pub mod session;
pub mod state;
pub mod stream;

pub use bootstrap::{bootstrap, spawn_reaper};
pub use config::Config;
pub use error::{AitError, AitResult};
pub use reaper::Reaper;
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::AppState;

pub use api::start_server;
