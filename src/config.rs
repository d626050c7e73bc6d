// ==============================================================================
// Configuration
// ==============================================================================
//
// The configuration source is a collaborator: anything that can answer a
// dotted-path lookup with a `serde_json::Value` is a `Configurator`. The
// typed getters live on `dyn Configurator` so every source gets them.
// `JsonConfigurator` is the bundled implementation.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};

// ==============================================================================
// ConfigError
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config file `{}` is empty", .0.display())]
    Empty(PathBuf),
    #[error("parsing config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config document must be a JSON object")]
    NotObject,
    #[error("not found key '{0}'")]
    NotFound(String),
    #[error("the value of key '{path}' is not {expected}")]
    WrongType {
        path: String,
        expected: &'static str,
    },
    #[error("decoding key '{path}': {source}")]
    Decode {
        path: String,
        source: serde_json::Error,
    },
}

// ==============================================================================
// Configurator
// ==============================================================================

/// A source of configuration values addressed by dotted paths such as
/// `http.local_host`.
pub trait Configurator: fmt::Debug + Send + Sync + 'static {
    /// The value at `path`, if present.
    fn get(&self, path: &str) -> Option<&Value>;
}

impl dyn Configurator + '_ {
    fn require(&self, path: &str) -> Result<&Value, ConfigError> {
        self.get(path)
            .ok_or_else(|| ConfigError::NotFound(path.to_owned()))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotFound`] or [`ConfigError::WrongType`].
    pub fn get_bool(&self, path: &str) -> Result<bool, ConfigError> {
        self.require(path)?
            .as_bool()
            .ok_or_else(wrong_type(path, "bool"))
    }

    /// Integers, and floats truncated toward zero.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] or [`ConfigError::WrongType`].
    #[allow(clippy::cast_possible_truncation)] // JSON numbers may be written as floats.
    pub fn get_int(&self, path: &str) -> Result<i64, ConfigError> {
        let value = self.require(path)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .ok_or_else(wrong_type(path, "int"))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotFound`] or [`ConfigError::WrongType`].
    pub fn get_str(&self, path: &str) -> Result<&str, ConfigError> {
        self.require(path)?
            .as_str()
            .ok_or_else(wrong_type(path, "string"))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotFound`] or [`ConfigError::WrongType`].
    pub fn get_slice(&self, path: &str) -> Result<&[Value], ConfigError> {
        self.require(path)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or_else(wrong_type(path, "array"))
    }

    /// # Errors
    ///
    /// [`ConfigError::NotFound`] or [`ConfigError::WrongType`].
    pub fn get_map(&self, path: &str) -> Result<&Map<String, Value>, ConfigError> {
        self.require(path)?
            .as_object()
            .ok_or_else(wrong_type(path, "map"))
    }

    /// Deserializes the value at `path` into `T`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotFound`] or [`ConfigError::Decode`].
    pub fn get_struct<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        T::deserialize(self.require(path)?).map_err(|source| ConfigError::Decode {
            path: path.to_owned(),
            source,
        })
    }
}

fn wrong_type<'a>(path: &'a str, expected: &'static str) -> impl FnOnce() -> ConfigError + 'a {
    move || ConfigError::WrongType {
        path: path.to_owned(),
        expected,
    }
}

/// A configurator with no values. Every lookup misses.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoConfig;

impl Configurator for NoConfig {
    fn get(&self, _path: &str) -> Option<&Value> {
        None
    }
}

// ==============================================================================
// JsonConfigurator
// ==============================================================================

/// Configuration held in a JSON object document.
#[derive(Clone, Debug)]
pub struct JsonConfigurator {
    data: Value,
}

impl JsonConfigurator {
    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is empty, is not
    /// valid JSON, or is not a JSON object.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Err(ConfigError::Empty(path.to_path_buf()));
        }
        let config = Self::from_value(serde_json::from_slice(&raw)?)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Wraps an already-parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotObject`] unless `data` is a JSON object.
    pub fn from_value(data: Value) -> Result<Self, ConfigError> {
        if data.is_object() {
            Ok(Self { data })
        } else {
            Err(ConfigError::NotObject)
        }
    }
}

impl Configurator for JsonConfigurator {
    fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.data, |node, key| node.as_object()?.get(key))
    }
}

// ==============================================================================
// AppConfig
// ==============================================================================

/// Settings the dispatcher itself consumes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Development mode: failures are reported with a backtrace.
    pub verbose: bool,
    /// Host that bare IP addresses and `localhost` resolve to.
    pub local_host: String,
    /// Request bodies larger than this are rejected.
    pub max_body_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            local_host: "www.localhost".to_owned(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl AppConfig {
    /// Reads `debug`, `http.local_host` and `http.max_body_bytes`; absent
    /// keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WrongType`] if a present key has the wrong type
    /// or a negative body limit.
    pub fn from_configurator(config: &dyn Configurator) -> Result<Self, ConfigError> {
        let mut app = Self::default();
        if config.get("debug").is_some() {
            app.verbose = config.get_bool("debug")?;
        }
        if config.get("http.local_host").is_some() {
            config.get_str("http.local_host")?.clone_into(&mut app.local_host);
        }
        if config.get("http.max_body_bytes").is_some() {
            app.max_body_bytes = usize::try_from(config.get_int("http.max_body_bytes")?).map_err(
                |_| ConfigError::WrongType {
                    path: "http.max_body_bytes".to_owned(),
                    expected: "a non-negative int",
                },
            )?;
        }
        Ok(app)
    }
}
