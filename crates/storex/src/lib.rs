//! Scrape orchestration and collector framework for Prometheus exporters that poll the REST APIs
//! of storage and management systems.
//!
//! # Overview
//!
//! - A [`Descriptor`] is the immutable identity of a metric family: its fully qualified name, help,
//!   ordered label names and [`MetricKind`]. [`Sample`]s reference descriptors and are streamed
//!   into a [`Sink`] while a scrape is running.
//! - A [`Collector`] knows one group of metric families. On each scrape it fetches one or more
//!   backend endpoints through a [`BackendClient`](client::BackendClient), decodes the JSON and emits
//!   samples.
//! - Collectors are registered in a [`CollectorRegistry`] together with their enabled / disabled state,
//!   which is resolved from configuration once at startup.
//! - An [`Orchestrator`] runs all enabled collectors concurrently on every scrape, isolates their
//!   failures and reports self-observability metrics (scrape count, per-collector errors and durations,
//!   reachability of the backend). Its output can be encoded in any supported [`Format`].
//! - The [`client`] module contains the reusable skeleton of authenticated backend clients:
//!   HTTP transport, authentication schemes, an atomically updated token store, request signing
//!   and refresh-and-retry on `401 Unauthorized`.
//!
//! # Examples
//!
//! ## Defining a collector
//!
//! ```
//! use async_trait::async_trait;
//! use serde::Deserialize;
//! use storex::{
//!     client::{fetch_json, BackendClient, Method},
//!     CollectError, Collector, Descriptor, Sink,
//! };
//! use std::sync::Arc;
//!
//! #[derive(Debug, Deserialize)]
//! struct Pools {
//!     pools: Vec<Pool>,
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Pool {
//!     name: String,
//!     used_bytes: u64,
//! }
//!
//! #[derive(Debug)]
//! struct PoolCollector {
//!     used_bytes: Arc<Descriptor>,
//! }
//!
//! impl PoolCollector {
//!     fn new() -> Self {
//!         Self {
//!             used_bytes: Descriptor::gauge("acme", "pool", "used_bytes", "Used pool capacity", &["pool"]),
//!         }
//!     }
//! }
//!
//! #[async_trait]
//! impl Collector for PoolCollector {
//!     fn name(&self) -> &'static str {
//!         "pool_info"
//!     }
//!
//!     fn help(&self) -> &'static str {
//!         "Pool capacity"
//!     }
//!
//!     async fn collect(&self, client: &dyn BackendClient, sink: &Sink) -> Result<(), CollectError> {
//!         let response: Pools = fetch_json(client, Method::GET, "/api/pools", None).await?;
//!         for pool in response.pools {
//!             sink.emit(&self.used_bytes, pool.used_bytes as f64, [pool.name])?;
//!         }
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Wiring an orchestrator
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use storex::{client::BackendClient, CollectorRegistry, Format, Orchestrator};
//! # async fn test_wrapper(client: Arc<dyn BackendClient>, registry: CollectorRegistry) {
//! let orchestrator = Orchestrator::new("acme", client, &registry);
//! let text = orchestrator.render(Format::Prometheus).await;
//! println!("{text}");
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::cast_precision_loss
)]

pub mod client;
mod collector;
mod descriptor;
mod format;
mod orchestrator;
mod registry;
mod sample;
#[cfg(any(test, feature = "testing"))]
pub mod testonly;
pub mod validation;

pub use crate::{
    collector::{CollectError, Collector},
    descriptor::{Descriptor, MetricKind},
    format::Format,
    orchestrator::{CollectorOutcome, Orchestrator, ScrapeOutcome, REACHABILITY_COLLECTOR},
    registry::{CollectorRegistry, RegistryError},
    sample::{Sample, SampleError, Samples, Sink},
};
