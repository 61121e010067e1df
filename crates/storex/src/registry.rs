//! Registry of available collectors and their enabled state.

use std::{fmt, sync::Arc};

use crate::{collector::Collector, validation::validate_name};

/// Errors related to [`CollectorRegistry`] configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    /// Collector with the same name is already registered.
    #[error("collector `{0}` is registered twice")]
    DuplicateName(String),
    /// Collector name cannot be used as a flag or label value.
    #[error("collector name `{name}` is invalid: {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Violated rule.
        reason: &'static str,
    },
    /// No collector with the specified name is registered.
    #[error("unknown collector `{0}`")]
    Unknown(String),
}

struct RegistryEntry {
    collector: Arc<dyn Collector>,
    enabled: bool,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RegistryEntry")
            .field("name", &self.collector.name())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Fixed set of collectors available to an exporter, each paired with an enabled flag.
///
/// Registrations are built explicitly at startup (usually by a backend-specific constructor
/// function). The enabled state has a default fixed at registration and can be overridden by
/// configuration before the registry is handed to an [`Orchestrator`](crate::Orchestrator); it is
/// read-only afterwards.
#[derive(Debug, Default)]
pub struct CollectorRegistry {
    entries: Vec<RegistryEntry>,
}

impl CollectorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collector.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector with the same name is already registered or if the name is invalid.
    pub fn register(
        &mut self,
        collector: impl Collector,
        enabled_by_default: bool,
    ) -> Result<&mut Self, RegistryError> {
        let name = collector.name();
        validate_name(name).map_err(|reason| RegistryError::InvalidName {
            name: name.to_owned(),
            reason,
        })?;
        if self.find(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_owned()));
        }
        self.entries.push(RegistryEntry {
            collector: Arc::new(collector),
            enabled: enabled_by_default,
        });
        Ok(self)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.collector.name() == name)
    }

    /// Overrides the enabled state of the named collector.
    ///
    /// # Errors
    ///
    /// Returns an error if no collector with this name is registered.
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let idx = self
            .find(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_owned()))?;
        self.entries[idx].enabled = enabled;
        Ok(())
    }

    /// Returns whether the named collector is enabled, or `None` if it isn't registered.
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.find(name).map(|idx| self.entries[idx].enabled)
    }

    /// Iterates over all registered collectors with their enabled state, in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (&dyn Collector, bool)> + '_ {
        self.entries
            .iter()
            .map(|entry| (entry.collector.as_ref(), entry.enabled))
    }

    /// Iterates over enabled collectors in registration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<dyn Collector>> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.enabled)
            .map(|entry| &entry.collector)
    }

    /// Returns the number of registered collectors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
