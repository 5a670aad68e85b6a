//! # nichika-settings
//!
//! Layered configuration for the nichika server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`NichikaSettings::default()`]
//! 2. **User file**: `~/.nichika/settings.json` or an explicit path
//!    (deep-merged over defaults, camelCase keys)
//! 3. **Environment variables**: `NICHIKA_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_from_path, load_with_env, settings_path};
pub use types::{LoggingSettings, NichikaSettings, ServerSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = NichikaSettings::default();
        let _path = settings_path();
    }
}
