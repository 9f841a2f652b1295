// MetricFlow - Metric extraction and defined metrics engine
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configurable components and their registry.
//!
//! Components whose concrete kind is chosen by configuration (`type = log`)
//! are built through a [`ComponentRegistry`]: an explicit table from type
//! tag to factory. Nothing is discovered at runtime; a tag that was not
//! registered is a configuration error.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigurationError;
use crate::properties::Properties;
use crate::state::StatusSerializer;

/// Parameter holding the type tag of a registry-built component.
pub const TYPE_PARAM: &str = "type";

/// Something configured from properties.
pub trait Component {
    fn id(&self) -> &str;

    /// Consume `properties`. Unrecognized keys are an error.
    fn configure(&mut self, properties: Properties) -> Result<(), ConfigurationError>;
}

/// Component that keeps state per key between events.
///
/// Hosts use it to size and encode the state they persist for the
/// component. Components without state do not implement it.
pub trait HasStatus: Component {
    /// Key the state is partitioned by.
    type Key;
    /// State kept for one key.
    type Status;

    /// Encoding of [`Self::Status`] for persistence.
    fn status_serializer(&self) -> Box<dyn StatusSerializer<Self::Status> + Send + Sync>;
}

/// Builds an unconfigured component with the given id.
pub type Factory<T> = Box<dyn Fn(&str) -> Box<T> + Send + Sync>;

/// Table of component factories by type tag.
pub struct ComponentRegistry<T: ?Sized> {
    factories: BTreeMap<String, Factory<T>>,
}

impl<T: ?Sized> Default for ComponentRegistry<T> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ComponentRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: ?Sized + Component> ComponentRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for `tag`.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Box<T> + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Box::new(factory));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered type tags, sorted.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build and configure component `id`.
    ///
    /// The type tag is read from the `type` property; the rest of
    /// `properties` is handed to the component.
    pub fn build(&self, id: &str, mut properties: Properties) -> Result<Box<T>, ConfigurationError> {
        let tag = properties.take_required(TYPE_PARAM)?;
        let factory = self.factories.get(&tag).ok_or_else(|| {
            ConfigurationError::invalid(
                TYPE_PARAM,
                tag.as_str(),
                format!(
                    "unknown type, expected one of: {}",
                    self.tags().collect::<Vec<_>>().join(", ")
                ),
            )
        })?;

        let mut component = factory(id);
        component.configure(properties)?;
        Ok(component)
    }
}
