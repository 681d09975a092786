//! Persisted device configuration
//!
//! A small JSON document holding the network credentials, the source URL and
//! the refresh watermark:
//!
//! ```json
//! {"network_name":"home","network_secret":"hunter2",
//!  "source_url":"http://192.168.1.10:9000/calendar.pbm",
//!  "target_path":"/image.bin","last_modified":1761574921}
//! ```
//!
//! Saving never rewrites the document in place. The new version goes to a
//! temporary sibling first and replaces the old one by rename, so the
//! document on disk is always complete.

use heapless::String;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::date::Timestamp;
use crate::storage::{self, Storage, StorageError};

/// Size of the document buffer, also the largest accepted file
pub const CONFIG_BUF_SIZE: usize = 1024;

/// Unescape buffer, sized for the longest string field (`source_url`)
const UNESCAPE_BUF_SIZE: usize = 192;

/// Download destination when the document doesn't name one
pub const DEFAULT_TARGET_PATH: &str = "/image.bin";

/// Config error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No document (and no complete temporary copy)
    NotFound,
    /// Document couldn't be read
    Storage(StorageError),
    /// Document exceeds `CONFIG_BUF_SIZE`
    TooLarge,
    /// Not valid JSON, wrong field types, or a value over its length limit
    Invalid,
    /// Required field absent or empty
    MissingField(&'static str),
    /// Replacing the document failed
    Write(StorageError),
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Wi-Fi SSID
    #[serde(default, alias = "ssid")]
    pub network_name: String<32>,
    /// Wi-Fi password
    #[serde(default, alias = "password")]
    pub network_secret: String<64>,
    /// Bitmap to fetch
    #[serde(default, alias = "file_url")]
    pub source_url: String<192>,
    /// Where downloads are written
    #[serde(default = "default_target_path")]
    pub target_path: String<64>,
    /// `Last-Modified` of the last bitmap that was actually rendered
    #[serde(default)]
    pub last_modified: Timestamp,
    /// Complement every pixel when decoding
    #[serde(default)]
    pub invert: bool,
}

fn default_target_path() -> String<64> {
    let mut path = String::new();
    let _ = path.push_str(DEFAULT_TARGET_PATH);
    path
}

impl Configuration {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.network_name.is_empty() {
            return Err(ConfigError::MissingField("network_name"));
        }
        if self.network_secret.is_empty() {
            return Err(ConfigError::MissingField("network_secret"));
        }
        if self.source_url.is_empty() {
            return Err(ConfigError::MissingField("source_url"));
        }
        Ok(())
    }
}

/// Load the configuration stored at `path`.
///
/// If `path` is missing or unparseable but its temporary sibling holds a
/// complete document, a previous save was interrupted before the new document
/// was in place. The temporary copy is used and the replacement finished.
pub fn load<S: Storage>(storage: &mut S, path: &str) -> Result<Configuration, ConfigError> {
    match read_document(storage, path) {
        Err(e @ (ConfigError::NotFound | ConfigError::Invalid)) => recover(storage, path, e),
        result => result,
    }
}

fn recover<S: Storage>(
    storage: &mut S,
    path: &str,
    cause: ConfigError,
) -> Result<Configuration, ConfigError> {
    let Ok(tmp) = storage::temp_path_for(path) else {
        return Err(cause);
    };
    // An incomplete temporary copy is no better than nothing
    let Ok(config) = read_document(storage, &tmp) else {
        return Err(cause);
    };

    warn!("{} unusable ({:?}), recovered configuration from {}", path, cause, tmp);
    match storage.remove(path) {
        Ok(()) | Err(StorageError::NotFound) => {
            if let Err(e) = storage.rename(&tmp, path) {
                warn!("Couldn't restore {}: {:?}", path, e);
            }
        }
        Err(e) => warn!("Couldn't remove {}: {:?}", path, e),
    }
    Ok(config)
}

fn read_document<S: Storage>(storage: &mut S, path: &str) -> Result<Configuration, ConfigError> {
    let mut buf = [0u8; CONFIG_BUF_SIZE];
    let len = storage::read_file(storage, path, &mut buf).map_err(|e| match e {
        StorageError::NotFound => ConfigError::NotFound,
        StorageError::TooLarge => ConfigError::TooLarge,
        e => ConfigError::Storage(e),
    })?;

    // Scratch space for unescaping string values
    let mut scratch = [0u8; UNESCAPE_BUF_SIZE];
    let (config, _) =
        serde_json_core::from_slice_escaped::<Configuration>(&buf[..len], &mut scratch)
            .map_err(|_| ConfigError::Invalid)?;
    config.validate()?;
    Ok(config)
}

/// Replace the configuration stored at `path` with `config`.
///
/// The document is written to a temporary sibling, the old document removed
/// and the sibling renamed into place. A crash at any point leaves either the
/// old or the new document readable by [`load`].
pub fn save<S: Storage>(storage: &mut S, path: &str, config: &Configuration) -> Result<(), ConfigError> {
    let mut buf = [0u8; CONFIG_BUF_SIZE];
    let len = serde_json_core::to_slice(config, &mut buf).map_err(|_| ConfigError::TooLarge)?;
    let tmp = storage::temp_path_for(path).map_err(ConfigError::Write)?;

    // Leftover from an interrupted save; best effort only
    match storage.remove(&tmp) {
        Ok(()) => warn!("Removed stale {}", tmp),
        Err(StorageError::NotFound) => {}
        Err(e) => warn!("Couldn't remove stale {}: {:?}", tmp, e),
    }

    storage::write_file(storage, &tmp, &buf[..len]).map_err(ConfigError::Write)?;

    match storage.remove(path) {
        Ok(()) | Err(StorageError::NotFound) => {}
        Err(e) => return Err(ConfigError::Write(e)),
    }
    storage.rename(&tmp, path).map_err(ConfigError::Write)?;

    info!("Saved configuration to {} ({} bytes)", path, len);
    Ok(())
}
