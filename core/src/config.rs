//! Device and connection configuration
//!
//! The configuration is a small JSON document read once at boot:
//!
//! ```text
//! {
//!   "influx_db": { "url": "...", "token": "...", "org": "...", "bucket": "..." },
//!   "device_name": "room1",
//!   "sample_delay": 10000
//! }
//! ```
//!
//! Connection parameters are passed through verbatim. Empty or missing
//! values are not rejected here; a server that cannot be reached or refuses
//! the write surfaces later as a publish error.
//!
//! TLS handling and connection reuse are build-time choices (`tls-insecure`
//! and `connection-reuse` cargo features), never read from the document.

use hal_abstractions::{FileStore, StorageError, TlsMode};
use heapless::String;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

/// Path of the configuration document in the file store
pub const CONFIG_PATH: &str = "/config.json";

/// Device name used when the document does not set one
pub const DEFAULT_DEVICE_NAME: &str = "unknown_device";

/// Delay between published cycles when the document does not set one
pub const DEFAULT_SAMPLE_DELAY_MS: u32 = 10_000;

/// Maximum configured device name length in bytes; longer names are truncated
pub const DEVICE_NAME_MAX: usize = 32;
pub const URL_MAX: usize = 128;
pub const ORG_MAX: usize = 64;
pub const BUCKET_MAX: usize = 64;
pub const TOKEN_MAX: usize = 128;

/// Largest accepted configuration document
const DOCUMENT_MAX: usize = 2048;

/// Unescape scratch space; every string in an accepted document fits
const UNESCAPE_BUF_SIZE: usize = DOCUMENT_MAX;

/// TLS handling compiled into this build
pub const TLS_MODE: TlsMode = if cfg!(feature = "tls-insecure") {
    TlsMode::Insecure
} else {
    TlsMode::Validated
};

/// Whether the HTTP connection is kept open between writes in this build
pub const CONNECTION_REUSE: bool = cfg!(feature = "connection-reuse");

/// Immutable post-boot configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub device_name: String<DEVICE_NAME_MAX>,
    pub sample_delay_ms: u32,
    pub influx_url: String<URL_MAX>,
    pub influx_org: String<ORG_MAX>,
    pub influx_bucket: String<BUCKET_MAX>,
    pub influx_token: String<TOKEN_MAX>,
    pub tls_mode: TlsMode,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: truncated(DEFAULT_DEVICE_NAME),
            sample_delay_ms: DEFAULT_SAMPLE_DELAY_MS,
            influx_url: String::new(),
            influx_org: String::new(),
            influx_bucket: String::new(),
            influx_token: String::new(),
            tls_mode: TLS_MODE,
        }
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// The document could not be opened or read
    Load(StorageError),
    /// The document is not valid JSON or a connection value does not fit its field
    Parse(serde_json_core::de::Error),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Load(e) => write!(f, "failed to open config file: {}", e),
            Self::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl core::error::Error for ConfigError {}

#[cfg(feature = "defmt")]
impl defmt::Format for ConfigError {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", defmt::Display2Format(self))
    }
}

#[derive(Deserialize, Default)]
struct InfluxSection {
    #[serde(default)]
    url: String<URL_MAX>,
    #[serde(default)]
    token: String<TOKEN_MAX>,
    #[serde(default)]
    org: String<ORG_MAX>,
    #[serde(default)]
    bucket: String<BUCKET_MAX>,
}

/// Keys that must parse for the document to be usable
///
/// The optional keys are skipped here and read by their own passes, so a
/// bad optional value costs only that value.
#[derive(Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    influx_db: InfluxSection,
}

#[derive(Deserialize)]
struct DeviceNameKey {
    #[serde(default, deserialize_with = "truncating_name")]
    device_name: Option<String<DEVICE_NAME_MAX>>,
}

#[derive(Deserialize)]
struct SampleDelayKey {
    #[serde(default)]
    sample_delay: Option<u32>,
}

/// Accept a name of any length and keep its first `DEVICE_NAME_MAX` bytes
fn truncating_name<'de, D>(deserializer: D) -> Result<Option<String<DEVICE_NAME_MAX>>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NameVisitor;

    impl<'de> Visitor<'de> for NameVisitor {
        type Value = Option<String<DEVICE_NAME_MAX>>;

        fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.write_str("a device name")
        }

        fn visit_str<E: de::Error>(self, name: &str) -> Result<Self::Value, E> {
            if name.len() > DEVICE_NAME_MAX {
                warn!(
                    "Device name longer than {} bytes, truncating",
                    DEVICE_NAME_MAX
                );
            }
            Ok(Some(truncated(name)))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_str(self)
        }
    }

    deserializer.deserialize_option(NameVisitor)
}

/// Read one optional key, treating a value of the wrong type as absent
fn optional_key<'a, T: Deserialize<'a>>(
    document: &'a [u8],
    scratch: &mut [u8],
    key: &str,
) -> Option<T> {
    match serde_json_core::from_slice_escaped::<T>(document, scratch) {
        Ok((value, _)) => Some(value),
        Err(e) => {
            warn!("Ignoring unusable {} value: {}", key, e);
            None
        }
    }
}

/// Parse a configuration document
///
/// Only a malformed document or an oversized connection value fails the
/// parse. `device_name` and `sample_delay` fall back to their defaults when
/// missing or mistyped, and a long device name is truncated.
pub fn parse(document: &[u8]) -> Result<DeviceConfig, ConfigError> {
    let mut scratch = [0u8; UNESCAPE_BUF_SIZE];
    let (doc, _) = serde_json_core::from_slice_escaped::<ConfigDocument>(document, &mut scratch)
        .map_err(ConfigError::Parse)?;

    let device_name = optional_key::<DeviceNameKey>(document, &mut scratch, "device_name")
        .and_then(|key| key.device_name)
        .unwrap_or_else(|| truncated(DEFAULT_DEVICE_NAME));

    let sample_delay_ms = optional_key::<SampleDelayKey>(document, &mut scratch, "sample_delay")
        .and_then(|key| key.sample_delay)
        .unwrap_or(DEFAULT_SAMPLE_DELAY_MS);

    Ok(DeviceConfig {
        device_name,
        sample_delay_ms,
        influx_url: doc.influx_db.url,
        influx_org: doc.influx_db.org,
        influx_bucket: doc.influx_db.bucket,
        influx_token: doc.influx_db.token,
        tls_mode: TLS_MODE,
    })
}

/// Copy `s` into a fixed-capacity string, cutting at a char boundary
pub(crate) fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut end = s.len().min(N);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::new();
    // Cannot fail: `end <= N`
    let _ = out.push_str(&s[..end]);
    out
}

/// Loads the configuration document from a persisted file store
pub struct ConfigStore<S> {
    store: S,
}

impl<S: FileStore> ConfigStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Read and parse the document at `path`
    pub async fn load(&mut self, path: &str) -> Result<DeviceConfig, ConfigError> {
        info!("Loading config from {}", path);
        let mut buf = [0u8; DOCUMENT_MAX];
        let len = self.store.read(path, &mut buf).await.map_err(|e| {
            error!("Failed to open config file {}: {}", path, e);
            ConfigError::Load(e)
        })?;

        parse(&buf[..len]).inspect_err(|e| {
            error!("Failed to parse config file: {}", e);
        })
    }

    /// Load the document, falling back to compiled-in defaults on any error
    ///
    /// The defaults carry empty connection parameters, so every later write
    /// fails and is logged on its own.
    pub async fn load_or_default(&mut self, path: &str) -> DeviceConfig {
        match self.load(path).await {
            Ok(config) => {
                info!(
                    "Config loaded: device_name={}, sample_delay={} ms",
                    config.device_name.as_str(),
                    config.sample_delay_ms
                );
                config
            }
            Err(_) => {
                warn!("Continuing with default configuration");
                DeviceConfig::default()
            }
        }
    }
}
