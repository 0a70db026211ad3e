#![forbid(unsafe_code)]

mod engine;
mod error;
mod firewall;
mod persistence;
mod policy;

pub use engine::Engine;
pub use error::Error;
pub use firewall::Firewall;
pub use persistence::Persistence;
pub use policy::{MIN_THRESHOLD, Policy};

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub policy: Policy,
    pub firewall: Firewall,
    pub engine: Engine,
    pub persistence: Persistence,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config file, layering it over the defaults.
    ///
    /// Keys missing from the file keep their default value.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::InvalidPath(path.to_owned()));
        }
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .extract()?;
        Ok(config.sanitize())
    }

    /// Parse a config from a TOML string without consulting the defaults layer.
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        let config: Self = toml_edit::de::from_str(text)?;
        Ok(config.sanitize())
    }

    /// Write the config as pretty-printed TOML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let text = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn sanitize(mut self) -> Self {
        self.policy = self.policy.sanitize();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("silentport.toml");
        std::fs::write(
            &path,
            "[firewall]\ntemporary_unblock = 300\n\n[engine]\nrun_on_start = false\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.firewall.temporary_unblock, Duration::from_secs(300));
        assert!(!config.engine.run_on_start);
        assert_eq!(config.policy, Policy::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("silentport.toml");
        let mut config = Config::new();
        config.policy.allow_list = Some(vec!["org.example.reader".into()]);
        config.persistence.state_path = Some(dir.path().join("state.db"));

        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn inverted_thresholds_are_repaired() {
        let config = Config::from_toml(
            "[policy]\nwarning_threshold = 7200\ndisable_threshold = 3600\n",
        )
        .unwrap();
        assert_eq!(config.policy.warning_threshold, Duration::from_secs(3600));
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }
}
