//! # pihub-settings
//!
//! Configuration for the pihub event hub, loaded once at process start.
//!
//! Settings are layered (in priority order):
//! 1. **Compiled defaults**: [`HubSettings::default()`]
//! 2. **User file**: `~/.pihub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PIHUB_*` overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary. Nothing here is
//! mutable once the hub is running.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
