//! The single staging slot behind `prepare_settings`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use netbridge_protocol::Settings;

/// Mutable handle to the settings the next create operation will use.
///
/// Clones share the same value. Once a create operation has consumed the
/// staged value (or a later `prepare_settings` replaced it), edits made
/// through an old handle no longer reach any operation.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    settings: Arc<Mutex<Settings>>,
}

impl SettingsHandle {
    pub(crate) fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(Mutex::new(settings)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current value.
    pub fn get(&self) -> Settings {
        self.lock().clone()
    }

    /// Edits the value in place.
    pub fn update<R>(&self, edit: impl FnOnce(&mut Settings) -> R) -> R {
        edit(&mut self.lock())
    }

    pub fn set_max_players(&self, max_players: u32) {
        self.lock().max_players = max_players;
    }

    pub fn set_visible(&self, is_visible: bool) {
        self.lock().is_visible = is_visible;
    }

    pub fn set_open(&self, is_open: bool) {
        self.lock().is_open = is_open;
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.lock().custom_properties.insert(key.into(), value.into());
    }

    pub fn set_extension(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.lock().set_extension(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_handle_clones_share_value() {
        let handle = SettingsHandle::new(Settings::default());
        let other = handle.clone();

        other.set_max_players(6);
        other.set_property("map", "harbor");

        let settings = handle.get();
        assert_eq!(settings.max_players, 6);
        assert_eq!(settings.custom_properties.get("map"), Some(&"harbor".into()));
    }

    #[test]
    fn test_settings_handle_update_returns_closure_value() {
        let handle = SettingsHandle::new(Settings::default());
        let before = handle.update(|s| {
            let before = s.is_open;
            s.is_open = false;
            before
        });
        assert!(before);
        assert!(!handle.get().is_open);
    }
}
