//! # rowgen-settings
//!
//! Layered configuration for rowgen runs.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RowgenSettings::default()`]
//! 2. **User file**: `~/.rowgen/settings.json` or `--config` (deep-merged over defaults)
//! 3. **Environment variables**: `ROWGEN_*` overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings,
    load_settings_from_explicit_path, load_settings_from_path, settings_path,
};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = RowgenSettings::default();
        assert!(settings_path().ends_with(".rowgen/settings.json"));
    }
}
