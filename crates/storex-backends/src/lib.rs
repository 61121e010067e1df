//! Concrete storage-system backends for [`storex`] exporters.
//!
//! Each backend module provides an authenticated [`BackendClient`](storex::client::BackendClient) implementation and a
//! `collectors()` constructor returning the [`CollectorRegistry`] of all collectors the backend supports,
//! together with their default enabled state.
//!
//! | Backend | Namespace | Authentication |
//! |---------|-----------|----------------|
//! | [`gdas`] | `gdas` | login token with per-request signature |
//! | [`xsky`] | `xsky` | login token in `Xms-Auth-Token` |
//! | [`console_agent`] | `console_agent` | stateless request signature |
//! | [`hw_obs`] | `hw_obs` | login token in `X-Auth-Token` |
//! | [`e37`] | `e37` | bearer token |
//! | [`harbor`] | `harbor` | HTTP basic auth |
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use storex::{client::ClientConfig, Format, Orchestrator};
//! use storex_backends::xsky::{self, XskyClient};
//!
//! # async fn test_wrapper() -> anyhow::Result<()> {
//! let config = ClientConfig::new("10.20.5.98:8056")?;
//! let client = XskyClient::new(&config, "admin", "admin")?;
//! let orchestrator = Orchestrator::new(xsky::NAMESPACE, Arc::new(client), &xsky::collectors()?);
//! println!("{}", orchestrator.render(Format::Prometheus).await);
//! # Ok(())
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

use std::fmt;

use storex::{
    client::{AuthScheme, AuthenticatedClient, Method, PingError},
    CollectorRegistry, RegistryError,
};

pub use crate::status::status_value;

pub mod console_agent;
pub mod e37;
pub mod gdas;
pub mod harbor;
pub mod hw_obs;
mod status;
#[cfg(test)]
mod testonly;
pub mod xsky;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BackendKind {
    /// Gdas optical storage.
    Gdas,
    /// Xsky distributed storage.
    Xsky,
    /// Console agent proxying a Gdas cluster.
    ConsoleAgent,
    /// Huawei OBS object storage.
    HwObs,
    /// E37 object storage.
    E37,
    /// Harbor registry.
    Harbor,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.command_name())
    }
}

impl BackendKind {
    /// All supported backends.
    pub const ALL: [Self; 6] = [
        Self::Gdas,
        Self::Xsky,
        Self::ConsoleAgent,
        Self::HwObs,
        Self::E37,
        Self::Harbor,
    ];

    /// Name of the command-line subcommand for this backend.
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Gdas => "gdas",
            Self::Xsky => "xsky",
            Self::ConsoleAgent => "console-agent",
            Self::HwObs => "hw-obs",
            Self::E37 => "e37",
            Self::Harbor => "harbor",
        }
    }

    /// Metric namespace used by the backend.
    pub fn namespace(self) -> &'static str {
        match self {
            Self::Gdas => gdas::NAMESPACE,
            Self::Xsky => xsky::NAMESPACE,
            Self::ConsoleAgent => console_agent::NAMESPACE,
            Self::HwObs => hw_obs::NAMESPACE,
            Self::E37 => e37::NAMESPACE,
            Self::Harbor => harbor::NAMESPACE,
        }
    }

    /// Creates the registry of all collectors of the backend with their default enabled state.
    ///
    /// # Errors
    ///
    /// Propagates registration errors.
    pub fn collectors(self) -> Result<CollectorRegistry, RegistryError> {
        match self {
            Self::Gdas => gdas::collectors(),
            Self::Xsky => xsky::collectors(),
            Self::ConsoleAgent => console_agent::collectors(),
            Self::HwObs => hw_obs::collectors(),
            Self::E37 => e37::collectors(),
            Self::Harbor => harbor::collectors(),
        }
    }
}

/// Probes `path`: a successful status means reachable. A `401 Unauthorized` answer is handled by the client,
/// which refreshes the token and retries, so a fresh token implies reachability.
async fn probe<S: AuthScheme>(
    client: &AuthenticatedClient<S>,
    method: Method,
    path: &str,
) -> Result<bool, PingError> {
    let response = client.send(method, path, None).await?;
    if response.status.is_success() {
        Ok(true)
    } else {
        tracing::warn!(path, status = %response.status, "Reachability probe answered with unexpected status");
        Ok(false)
    }
}
