//! Chaperone: layered message moderation for buyer-creator marketplace chat.
//!
//! Every chat message passes through a three-stage pipeline before it is
//! persisted: a deterministic pattern filter, an LLM-backed semantic
//! classifier, and a stateful escalation policy backed by a per-user
//! warning ledger. The pipeline produces a [`models::Verdict`] that the
//! HTTP layer turns into an allow, soft-warning, or block response.

pub mod classifier;
pub mod config;
pub mod database;
pub mod error;
pub mod filter;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod policy;
pub mod reports;
pub mod web;
