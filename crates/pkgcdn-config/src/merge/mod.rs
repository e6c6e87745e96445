//! Configuration layering: defaults, then the config file, then overrides
//! from the command line and environment.

use camino::{Utf8Path, Utf8PathBuf};

use crate::toml::{load_from_file, validate_config, ServeConfig};
use crate::ConfigResult;

/// Where the base layer of the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Built-in defaults only
    Defaults,
    /// A config file
    File(Utf8PathBuf),
}

/// Values given on the command line or through `PKGCDN_*` variables.
///
/// Every field is optional; set fields win over the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub storage: Option<Utf8PathBuf>,
    pub registry: Option<String>,
    pub prefix: Option<String>,
    pub document_root: Option<Utf8PathBuf>,
    pub max_age: Option<u32>,
    pub cors: Option<bool>,
    pub cors_origin: Option<String>,
    pub update_interval: Option<f64>,
    pub lock_timeout: Option<f64>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
    pub quiet: Option<bool>,
}

impl ConfigOverrides {
    /// Apply the set fields on top of `config`
    pub fn apply(self, config: &mut ServeConfig) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut config.host, self.host);
        set(&mut config.port, self.port);
        set(&mut config.storage, self.storage);
        set(&mut config.registry, self.registry);
        set(&mut config.prefix, self.prefix);
        set(&mut config.document_root, self.document_root);
        set(&mut config.max_age, self.max_age);
        set(&mut config.cors, self.cors);
        set(&mut config.update_interval, self.update_interval);
        set(&mut config.lock_timeout, self.lock_timeout);
        set(&mut config.log_level, self.log_level);
        set(&mut config.log_json, self.log_json);
        set(&mut config.quiet, self.quiet);
        if self.cors_origin.is_some() {
            config.cors_origin = self.cors_origin;
        }
    }
}

/// Main configuration loading interface
pub struct ConfigLoader {
    /// Explicit config file, if any
    path: Option<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Create a loader reading `path` when given
    pub fn new(path: Option<Utf8PathBuf>) -> Self {
        Self { path }
    }

    /// Config file this loader reads, if any
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Load the effective configuration
    pub async fn load(&self, overrides: ConfigOverrides) -> ConfigResult<(ServeConfig, ConfigSource)> {
        let (mut config, source) = match self.path {
            Some(ref path) => (load_from_file(path).await?, ConfigSource::File(path.clone())),
            None => (ServeConfig::default(), ConfigSource::Defaults),
        };

        overrides.apply(&mut config);
        config.normalize();
        validate_config(&config)?;

        Ok((config, source))
    }
}
