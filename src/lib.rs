//! PressureRadar -- temporal anomaly scoring and decayed pressure propagation.
//!
//! This crate provides the core library for snapshot ingestion, per-entity
//! anomaly scoring, cross-series chain propagation, trend persistence and the
//! post-run quality gate.

pub mod analysis;
pub mod chain;
pub mod config;
pub mod detect;
pub mod events;
pub mod evidence;
pub mod gate;
pub mod ingest;
pub mod persistence;
pub mod storage;

pub use analysis::runner::{run_pipeline, RunOptions, RunSummary};
