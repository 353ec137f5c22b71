//! # Ride Dispatch Core
//!
//! The real-time dispatch engine for a regional taxi fleet.
//!
//! ## Overview
//!
//! This crate provides the three subsystems that define the product:
//!
//! - **Tiered dispatcher**: batched offers with bounded rounds, accept /
//!   reject / timeout handling, and per-decision provenance
//! - **ETA oracle**: hybrid cost model (geodesic estimate vs. road-network
//!   lookup) with a two-tier time-bucketed cache and a hard daily budget
//! - **Hot-zone controller**: per-zone hourly quotas, staircase surge
//!   pricing, and a FIFO overflow queue
//!
//! ## Key Concepts
//!
//! - **Single-writer orders**: every active order is owned by one task fed
//!   through a serialized mailbox; timers and driver responses are messages
//! - **Degraded modes everywhere**: estimation instead of the road API, a
//!   rule engine instead of the trained model, dropped analytics instead of
//!   a blocked dispatch path
//! - **External collaborators**: transport, auth, and the relational store
//!   stay behind the [`store::Store`] and [`notify::Notifier`] traits
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dispatch_core::clock::SystemClock;
//! use dispatch_core::config::DispatchConfig;
//! use dispatch_core::runner::DispatchCore;
//! use dispatch_core::store::MemoryStore;
//! use dispatch_core::test_helpers::RecordingNotifier;
//!
//! # async fn run() {
//! let core = DispatchCore::start(
//!     DispatchConfig::default(),
//!     Vec::new(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(RecordingNotifier::new()),
//!     None,
//!     Arc::new(SystemClock),
//! );
//! let dispatcher = core.dispatcher();
//! # let _ = dispatcher;
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod decision_log;
pub mod engine;
pub mod error;
pub mod eta;
pub mod geo;
pub mod hotzone;
pub mod notify;
pub mod predict;
pub mod presence;
pub mod runner;
pub mod scoring;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
