//! facewatch-config: hot-reloadable configuration.
//!
//! A TOML file is read into an immutable [`ConfigSnapshot`]; the
//! [`ConfigStore`] serves the latest snapshot and an optional watcher task
//! republishes it whenever the file's modification time changes.

pub mod loader;
pub mod snapshot;
pub mod store;

pub use loader::{load, try_load, ConfigError};
pub use snapshot::{CaptureMode, ConfigSnapshot, MAX_ZOOM};
pub use store::{poll_interval_from_fps, ConfigStore, WatchHandle, DEFAULT_WATCH_FPS};
