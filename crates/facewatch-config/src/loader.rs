//! TOML config file → [`ConfigSnapshot`].
//!
//! The file is parsed as a plain table and read key by key. A key that is
//! absent, has the wrong type, or fails validation takes its default and
//! the rest of the file still applies.

use crate::snapshot::{CaptureMode, ConfigSnapshot, MAX_ZOOM};
use facewatch_core::{BackendTarget, DistanceMetric};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use thiserror::Error;
use toml::{Table, Value};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("config file is already being watched")]
    AlreadyWatching,
}

impl ConfigError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Read and parse `path`. Only file-level problems are errors.
pub fn try_load(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    from_toml_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Like [`try_load`], but a missing or broken file yields the defaults.
pub fn load(path: &Path) -> ConfigSnapshot {
    match try_load(path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(error = %e, "using default configuration");
            ConfigSnapshot::default()
        }
    }
}

/// Build a snapshot from TOML text.
pub fn from_toml_str(text: &str) -> Result<ConfigSnapshot, toml::de::Error> {
    let table: Table = text.parse()?;
    Ok(from_table(&table))
}

fn from_table(table: &Table) -> ConfigSnapshot {
    let keys = Keys { table };
    let d = ConfigSnapshot::default();

    ConfigSnapshot {
        version: 0,
        debug: keys.boolean("debug", d.debug),
        capture_mode: keys.checked("cap_or_video", d.capture_mode, CaptureMode::from_code),
        cap_index: keys.checked("cap_index", d.cap_index, |v| u32::try_from(v).ok()),
        video_name: keys.string("video_name", &d.video_name),
        zoom: keys.float_in("zoom", d.zoom, MAX_ZOOM),
        backend_target: keys.checked("backend_target", d.backend_target, BackendTarget::from_code),
        detection_onnx: keys.string("detection_onnx", &d.detection_onnx),
        sface_onnx: keys.string("sface_onnx", &d.sface_onnx),
        detect_threshold: keys.float("detect_threshold", d.detect_threshold),
        nms_threshold: keys.float("nms_threshold", d.nms_threshold),
        top_k: keys.checked("top_k", d.top_k, |v| usize::try_from(v).ok().filter(|&k| k >= 1)),
        distance: keys.checked("distance_type", d.distance, DistanceMetric::from_code),
        cosine_threshold: keys.float("cosine_threshold", d.cosine_threshold),
        norml2_threshold: keys.float("norml2_threshold", d.norml2_threshold),
        targets_dir_name: keys.string("targets_dir_name", &d.targets_dir_name),
        draw_face_points: keys.boolean("draw_face_points", d.draw_face_points),
    }
}

/// Parse the string spellings accepted for boolean keys.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "y" | "Y" | "yes" | "Yes" | "YES" | "true" | "True" | "TRUE" | "on" | "On" | "ON" => {
            Some(true)
        }
        "n" | "N" | "no" | "No" | "NO" | "false" | "False" | "FALSE" | "off" | "Off" | "OFF" => {
            Some(false)
        }
        other => other.trim().parse::<i64>().ok().map(|v| v != 0),
    }
}

struct Keys<'a> {
    table: &'a Table,
}

impl Keys<'_> {
    /// Raw value for `key`, logging when it is absent.
    fn get<T: Debug>(&self, key: &str, default: &T) -> Option<&Value> {
        let value = self.table.get(key);
        if value.is_none() {
            tracing::info!(key, default = ?default, "config key missing; using default");
        }
        value
    }

    fn fallback<T: Debug>(key: &str, value: &Value, default: T) -> T {
        tracing::warn!(
            key,
            value = %value,
            default = ?default,
            "invalid config value; using default"
        );
        default
    }

    fn boolean(&self, key: &str, default: bool) -> bool {
        let Some(value) = self.get(key, &default) else {
            return default;
        };
        let parsed = match value {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::String(s) => parse_bool(s),
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::fallback(key, value, default))
    }

    /// Integer key converted through `convert`; `None` from it means invalid.
    fn checked<T: Debug + Copy>(
        &self,
        key: &str,
        default: T,
        convert: impl Fn(i64) -> Option<T>,
    ) -> T {
        let Some(value) = self.get(key, &default) else {
            return default;
        };
        value
            .as_integer()
            .and_then(convert)
            .unwrap_or_else(|| Self::fallback(key, value, default))
    }

    fn float(&self, key: &str, default: f32) -> f32 {
        let Some(value) = self.get(key, &default) else {
            return default;
        };
        // Checked after narrowing: 1e39 is a finite f64 but not a finite f32.
        let narrowed = match value {
            Value::Float(f) => Some(*f as f32),
            Value::Integer(i) => Some(*i as f32),
            _ => None,
        };
        match narrowed {
            Some(v) if v.is_finite() => v,
            _ => Self::fallback(key, value, default),
        }
    }

    /// Float key that must lie in `(0, max]`.
    fn float_in(&self, key: &str, default: f32, max: f32) -> f32 {
        let v = self.float(key, default);
        if v > 0.0 && v <= max {
            v
        } else {
            tracing::warn!(
                key,
                value = v,
                default,
                max,
                "config value out of range; using default"
            );
            default
        }
    }

    fn string(&self, key: &str, default: &str) -> String {
        let Some(value) = self.get(key, &default) else {
            return default.to_string();
        };
        match value.as_str() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => Self::fallback(key, value, default).to_string(),
        }
    }
}
