#![deny(missing_docs)]
//! The deployable culvert backend.
//!
//! Wires the resource engine to the world: structured configuration,
//! descriptor-feed parsers, the periodic ingestion loop ("kraken"), the
//! injected health-probe client, JSON persistence for stored resource
//! types, Prometheus metrics, and the distributor-facing HTTP api
//! serving one-shot snapshots and long-lived diff streams.

mod config;
pub use config::*;

pub mod parse;

pub mod kraken;

pub mod probe;

pub mod http;

pub mod store;

pub mod metrics;
