//! Layered configuration lookup.
//!
//! Values are resolved from, in order of priority: a `.env` file, the process
//! environment, YAML files, an INI file, then caller-provided defaults. Keys
//! are case-insensitive; nested YAML mappings and INI sections are flattened
//! into `PARENT_CHILD` keys.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid yaml at {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid ini at {path}: {source}")]
    Ini { path: PathBuf, source: ini::Error },
    #[error("invalid .env file at {path}: {source}")]
    DotEnv {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("cannot parse {key}={value}: {reason}")]
    Parse {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    DotEnv(PathBuf),
    Environment,
    Yaml(Vec<PathBuf>),
    Ini(PathBuf),
    Defaults,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::DotEnv(p) => write!(f, "dotenv({})", p.display()),
            ConfigSource::Environment => f.write_str("environment"),
            ConfigSource::Yaml(paths) => {
                let joined: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "yaml({})", joined.join(", "))
            }
            ConfigSource::Ini(p) => write!(f, "ini({})", p.display()),
            ConfigSource::Defaults => f.write_str("defaults"),
        }
    }
}

#[derive(Debug, Clone)]
struct Layer {
    source: ConfigSource,
    values: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LayeredConfig {
    package: String,
    layers: Vec<Layer>,
}

#[derive(Debug, Clone)]
enum EnvSource {
    Process,
    Map(HashMap<String, String>),
}

/// Explicit construction of a [`LayeredConfig`]; nothing is read until `build`.
#[derive(Debug, Clone)]
pub struct LayeredConfigBuilder {
    package: String,
    dotenv: Option<PathBuf>,
    env: EnvSource,
    yaml_paths: Vec<PathBuf>,
    ini_paths: Vec<PathBuf>,
    defaults: HashMap<String, String>,
}

impl LayeredConfigBuilder {
    pub fn dotenv(mut self, path: Option<PathBuf>) -> Self {
        self.dotenv = path;
        self
    }

    /// Replace the process environment with a fixed map.
    pub fn env_map(mut self, vars: HashMap<String, String>) -> Self {
        self.env = EnvSource::Map(vars);
        self
    }

    pub fn yaml_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.yaml_paths = paths;
        self
    }

    pub fn ini_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.ini_paths = paths;
        self
    }

    pub fn defaults<K, V>(mut self, defaults: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.defaults = upper_keys(defaults.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> Result<LayeredConfig, ConfigError> {
        let mut layers = Vec::new();

        if let Some(path) = self.dotenv.filter(|p| p.is_file()) {
            let values = read_dotenv(&path)?;
            layers.push(Layer {
                source: ConfigSource::DotEnv(path),
                values,
            });
        }

        let env_values = match self.env {
            // Non-UTF-8 variables are skipped.
            EnvSource::Process => upper_keys(
                std::env::vars_os()
                    .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
            ),
            EnvSource::Map(map) => upper_keys(map),
        };
        layers.push(Layer {
            source: ConfigSource::Environment,
            values: env_values,
        });

        let yaml_files: Vec<PathBuf> = self
            .yaml_paths
            .into_iter()
            .filter(|p| p.is_file())
            .collect();
        if !yaml_files.is_empty() {
            let values = read_yaml_files(&yaml_files)?;
            layers.push(Layer {
                source: ConfigSource::Yaml(yaml_files),
                values,
            });
        }

        // Only the first INI file found is used.
        if let Some(path) = self.ini_paths.into_iter().find(|p| p.is_file()) {
            let values = read_ini(&path)?;
            layers.push(Layer {
                source: ConfigSource::Ini(path),
                values,
            });
        }

        layers.push(Layer {
            source: ConfigSource::Defaults,
            values: self.defaults,
        });

        for layer in &layers {
            debug!(source = %layer.source, keys = layer.values.len(), "config layer loaded");
        }

        Ok(LayeredConfig {
            package: self.package,
            layers,
        })
    }
}

impl LayeredConfig {
    /// Builder with no file sources and the live process environment.
    pub fn builder(package_name: &str) -> LayeredConfigBuilder {
        LayeredConfigBuilder {
            package: package_name.to_string(),
            dotenv: None,
            env: EnvSource::Process,
            yaml_paths: Vec::new(),
            ini_paths: Vec::new(),
            defaults: HashMap::new(),
        }
    }

    /// Standard lookup locations for `package_name`:
    /// `./.env`, the environment, `$<PKG>_YAML`, `~/<pkg>.yml|yaml`,
    /// `./<pkg>.yml|yaml`, then `$<PKG>_INI`, `~/<pkg>.ini`, `./<pkg>.ini`.
    pub fn new<K, V>(
        package_name: &str,
        defaults: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, ConfigError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let upper = package_name.to_uppercase();
        let home = home_dir();
        let in_home = |name: String| home.as_ref().map(|h| h.join(name));

        let mut yaml_paths: Vec<PathBuf> = Vec::new();
        yaml_paths.extend(std::env::var_os(format!("{upper}_YAML")).map(PathBuf::from));
        yaml_paths.extend(in_home(format!("{package_name}.yml")));
        yaml_paths.extend(in_home(format!("{package_name}.yaml")));
        yaml_paths.push(PathBuf::from(format!("{package_name}.yml")));
        yaml_paths.push(PathBuf::from(format!("{package_name}.yaml")));

        let mut ini_paths: Vec<PathBuf> = Vec::new();
        ini_paths.extend(std::env::var_os(format!("{upper}_INI")).map(PathBuf::from));
        ini_paths.extend(in_home(format!("{package_name}.ini")));
        ini_paths.push(PathBuf::from(format!("{package_name}.ini")));

        Self::builder(package_name)
            .dotenv(Some(PathBuf::from(".env")))
            .yaml_paths(yaml_paths)
            .ini_paths(ini_paths)
            .defaults(defaults)
            .build()
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lookup(key).map(|(value, _)| value)
    }

    /// `get("NS_KEY")`, spelled as a namespace and a key.
    pub fn get_ns(&self, namespace: &str, key: &str) -> Option<&str> {
        self.get(&format!("{namespace}_{key}"))
    }

    /// Which layer answered `key`.
    pub fn source_of(&self, key: &str) -> Option<&ConfigSource> {
        self.lookup(key).map(|(_, source)| source)
    }

    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| ConfigError::Parse {
                key: key.to_uppercase(),
                value: raw.to_string(),
                reason: err.to_string(),
            })
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        parse_bool(raw).map(Some).ok_or_else(|| ConfigError::Parse {
            key: key.to_uppercase(),
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        })
    }

    fn lookup(&self, key: &str) -> Option<(&str, &ConfigSource)> {
        let key = key.to_uppercase();
        self.layers
            .iter()
            .find_map(|layer| layer.values.get(&key).map(|v| (v.as_str(), &layer.source)))
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Some(true),
        "0" | "false" | "no" | "off" | "n" | "f" => Some(false),
        _ => None,
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|h: &OsString| !h.is_empty())
        .map(PathBuf::from)
}

fn upper_keys(pairs: impl IntoIterator<Item = (String, String)>) -> HashMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_uppercase(), v))
        .collect()
}

fn read_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_err = |source| ConfigError::DotEnv {
        path: path.to_path_buf(),
        source,
    };
    let mut values = HashMap::new();
    for item in dotenvy::from_path_iter(path).map_err(to_err)? {
        let (key, value) = item.map_err(to_err)?;
        values.insert(key.to_uppercase(), value);
    }
    Ok(values)
}

fn read_yaml_files(paths: &[PathBuf]) -> Result<HashMap<String, String>, ConfigError> {
    let mut merged = Value::Mapping(serde_yaml::Mapping::new());
    for path in paths {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let doc: Value = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
            path: path.clone(),
            source,
        })?;
        // An empty document parses to Null; merging it would wipe earlier files.
        if !doc.is_null() {
            merge_values(&mut merged, doc);
        }
    }
    let mut flat = HashMap::new();
    flatten_into(&mut flat, "", &merged);
    Ok(flat)
}

fn read_ini(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let conf = ini::Ini::load_from_file(path).map_err(|source| ConfigError::Ini {
        path: path.to_path_buf(),
        source,
    })?;
    let mut values = HashMap::new();
    for (section, props) in conf.iter() {
        for (key, value) in props.iter() {
            let flat_key = match section {
                Some(section) => format!("{section}_{key}"),
                None => key.to_string(),
            };
            values.insert(flat_key.to_uppercase(), value.to_string());
        }
    }
    Ok(values)
}

fn merge_values(default: &mut Value, user: Value) {
    match (default, user) {
        (Value::Mapping(dest), Value::Mapping(src)) => {
            for (key, user_val) in src {
                if let Some(dest_val) = dest.get_mut(&key) {
                    merge_values(dest_val, user_val);
                } else {
                    dest.insert(key, user_val);
                }
            }
        }
        (dest, other) => {
            *dest = other;
        }
    }
}

fn flatten_into(out: &mut HashMap<String, String>, prefix: &str, value: &Value) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let Some(key) = scalar_to_string(key) else {
                    continue;
                };
                let flat_key = if prefix.is_empty() {
                    key.to_uppercase()
                } else {
                    format!("{prefix}_{}", key.to_uppercase())
                };
                flatten_into(out, &flat_key, child);
            }
        }
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(scalar_to_string).collect();
            out.insert(prefix.to_string(), parts.join(","));
        }
        Value::Tagged(tagged) => flatten_into(out, prefix, &tagged.value),
        other => {
            if let Some(s) = scalar_to_string(other) {
                out.insert(prefix.to_string(), s);
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
