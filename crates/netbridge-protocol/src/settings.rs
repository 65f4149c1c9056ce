//! Session-creation settings shared by every backend.
//!
//! Each backend needs a few extra knobs beyond the four common fields
//! (a room service wants to know which custom properties are visible in
//! room listings, a lobby service wants per-player data). Instead of one
//! settings type per backend that has to be downcast at the boundary, there
//! is exactly one [`Settings`] record:
//!
//! - four **common fields** every backend honours,
//! - an **`origin`** tag naming the backend whose factory produced it,
//! - an **extension map** whose keys are namespaced `"<backend>.<field>"`.
//!
//! A backend only reads extensions in its own namespace. Settings built by
//! backend A and handed to backend B keep their common fields; A's
//! extensions are ignored and B's own defaults fill in (see
//! [`Settings::conform_to`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Ordered string → opaque value map.
///
/// `BTreeMap` keeps iteration deterministic, which makes logs and JSON
/// output stable across runs.
pub type PropertyMap = BTreeMap<String, serde_json::Value>;

/// Common configuration record for creating a lobby or room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum participants. Always at least 1 after [`validated`](Self::validated).
    pub max_players: u32,

    /// Whether the session shows up in searches.
    pub is_visible: bool,

    /// Whether the session accepts new joins.
    pub is_open: bool,

    /// Game-defined properties attached to the session.
    #[serde(default)]
    pub custom_properties: PropertyMap,

    /// Name of the backend whose factory produced this value, if any.
    #[serde(default)]
    pub origin: Option<String>,

    /// Backend-specific fields, keyed `"<backend>.<field>"`.
    #[serde(default)]
    pub extensions: PropertyMap,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_players: 2,
            is_visible: true,
            is_open: true,
            custom_properties: PropertyMap::new(),
            origin: None,
            extensions: PropertyMap::new(),
        }
    }
}

impl Settings {
    /// Smallest accepted `max_players`.
    pub const MIN_PLAYERS: u32 = 1;

    /// Creates settings tagged with the producing backend.
    pub fn for_backend(backend: &str) -> Self {
        Self {
            origin: Some(backend.to_owned()),
            ..Self::default()
        }
    }

    /// Clamps out-of-range values so every backend can consume the record.
    pub fn validated(mut self) -> Self {
        self.max_players = self.max_players.max(Self::MIN_PLAYERS);
        self
    }

    pub fn with_max_players(mut self, max_players: u32) -> Self {
        self.max_players = max_players;
        self
    }

    pub fn with_visibility(mut self, is_visible: bool) -> Self {
        self.is_visible = is_visible;
        self
    }

    pub fn with_open(mut self, is_open: bool) -> Self {
        self.is_open = is_open;
        self
    }

    /// Adds (or replaces) a custom property.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.custom_properties.insert(key.into(), value.into());
        self
    }

    /// Sets a backend extension. `key` should be namespaced `"<backend>.<field>"`.
    pub fn set_extension(
        &mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) {
        self.extensions.insert(key.into(), value.into());
    }

    /// Reads a backend extension.
    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    /// Returns `true` if this value was produced by `backend`'s factory.
    pub fn is_from(&self, backend: &str) -> bool {
        self.origin.as_deref() == Some(backend)
    }

    /// Extension keys that don't belong to `backend`'s namespace.
    ///
    /// Backends log these and move on; an unknown extension is never an
    /// error.
    pub fn foreign_extensions<'a>(
        &'a self,
        backend: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.extensions
            .keys()
            .map(String::as_str)
            .filter(move |key| !in_namespace(key, backend))
    }

    /// Re-expresses `self` in terms of another backend's defaults.
    ///
    /// The common fields always come from `self`. Extensions start from
    /// `defaults`; entries in `self` that fall in the defaults' namespace
    /// override them, everything else is dropped. If `defaults` has no
    /// origin, only the common fields are carried over.
    pub fn conform_to(&self, defaults: &Settings) -> Settings {
        let mut extensions = defaults.extensions.clone();
        if let Some(backend) = defaults.origin.as_deref() {
            for (key, value) in &self.extensions {
                if in_namespace(key, backend) {
                    extensions.insert(key.clone(), value.clone());
                }
            }
        }

        Settings {
            max_players: self.max_players,
            is_visible: self.is_visible,
            is_open: self.is_open,
            custom_properties: self.custom_properties.clone(),
            origin: defaults.origin.clone(),
            extensions,
        }
        .validated()
    }

    /// Encodes to JSON (for config files and diagnostics).
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decodes from JSON and clamps the result.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str::<Settings>(json)
            .map(Settings::validated)
            .map_err(ProtocolError::Decode)
    }
}

fn in_namespace(key: &str, backend: &str) -> bool {
    key.strip_prefix(backend)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Produces a backend-appropriate default [`Settings`].
///
/// Every backend exposes one of these. The facade uses it for
/// `PrepareSettings` and as the fallback when nothing was prepared.
pub trait SettingsFactory: Send + Sync {
    /// Namespace used for this backend's extensions.
    fn backend(&self) -> &'static str;

    /// A fresh default value, tagged with [`backend`](Self::backend).
    fn create_settings(&self) -> Settings;
}
