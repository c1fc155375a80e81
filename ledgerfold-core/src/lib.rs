//! Core types for the ledgerfold event log and projection engine.
//!
//! This crate holds the backend-agnostic vocabulary shared by every store
//! implementation:
//!
//! - [`message`] - Messages, payloads and position-tagged stored messages
//! - [`metadata`] - Ordered message metadata and the [`Matcher`](metadata::Matcher)
//!   used to filter loads
//! - [`event`] - The [`DomainEvent`](event::DomainEvent) marker for typed payloads
//! - [`projection`] - Read-side folds, checkpoints and the failure policy
//! - [`config`] - Projector tuning knobs
//!
//! Most users should depend on the [`ledgerfold`](https://docs.rs/ledgerfold)
//! crate, which re-exports these types alongside the `PostgreSQL` backend.

pub mod config;
pub mod event;
pub mod message;
pub mod metadata;
pub mod projection;
