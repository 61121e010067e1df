//! HTTP front end for [`storex`] orchestrators based on the `hyper` web server.
//!
//! # Examples
//!
//! ```no_run
//! # use std::{net::Ipv4Addr, sync::Arc};
//! # use storex::Orchestrator;
//! use storex_exporter::MetricsExporter;
//! use tokio::sync::watch;
//!
//! # async fn test_wrapper(orchestrator: Arc<Orchestrator>) -> std::io::Result<()> {
//! let (stop_sender, mut stop_receiver) = watch::channel(false);
//! let exporter = MetricsExporter::new(orchestrator)
//!     .with_telemetry_path("/metrics")
//!     .with_graceful_shutdown(async move {
//!         stop_receiver.changed().await.ok();
//!     });
//! let server = exporter.bind((Ipv4Addr::LOCALHOST, 8080).into()).await?;
//! println!("Serving on {}", server.local_addr());
//! tokio::spawn(server.start());
//! // Later:
//! stop_sender.send_replace(true);
//! # Ok(())
//! # }
//! ```

// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub use crate::exporter::{MetricsExporter, MetricsServer, DEFAULT_TELEMETRY_PATH, READY_PATH};

mod exporter;
