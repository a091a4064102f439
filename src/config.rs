use std::path::{Path, PathBuf};

use crate::classify::{RuleSpec, TypeRegistry};
use crate::error::Error;

/// File name looked up in the project root.
pub const CONFIG_FILE: &str = ".lazyref.toml";

/// Project configuration loaded from `.lazyref.toml`.
/// Paths are relative to the directory holding the file.
#[derive(Debug)]
pub struct Config {
    /// Saved handles.
    bindings: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    log: String,
    /// Host model snapshot.
    model: PathBuf,
    /// Extra classification rules, appended after the built-in table.
    rules: Vec<RuleSpec>,
}

/// Raw TOML structure for `.lazyref.toml`.
#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct LazyrefTomlConfig {
    /// Saved handles.
    #[serde(default)]
    bindings: Option<PathBuf>,
    /// Default tracing filter.
    #[serde(default)]
    log: Option<String>,
    /// Host model snapshot.
    #[serde(default)]
    model: Option<PathBuf>,
    /// Extra classification rules.
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

impl Config {
    /// Load config from `.lazyref.toml` in the given root directory.
    /// Returns defaults if the file doesn't exist.
    /// Returns an error if the file exists but is malformed; a config file
    /// the user wrote is never silently ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if reading fails (other than not-found),
    /// `Error::TomlDe` if the TOML is malformed,
    /// or `Error::UnknownSubtypeRule` if a `[[rules]]` entry is unusable.
    pub fn load(root: &Path) -> Result<Self, Error> {
        let path = root.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::defaults_in(root)),
            Err(e) => return Err(Error::Io(e)),
        };
        return Self::parse(root, &content);
    }

    /// Parse config text whose relative paths resolve against `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::TomlDe` if the TOML is malformed,
    /// or `Error::UnknownSubtypeRule` if a `[[rules]]` entry is unusable.
    pub fn parse(root: &Path, content: &str) -> Result<Self, Error> {
        let raw: LazyrefTomlConfig = toml::from_str(content)?;
        // Reject bad rules at load.
        TypeRegistry::new().extend_from_specs(&raw.rules)?;
        let defaults = Self::defaults_in(root);
        return Ok(Self {
            bindings: raw.bindings.map_or(defaults.bindings, |p| return root.join(p)),
            log: raw.log.unwrap_or(defaults.log),
            model: raw.model.map_or(defaults.model, |p| return root.join(p)),
            rules: raw.rules,
        });
    }

    /// Defaults for a project rooted at `root`.
    fn defaults_in(root: &Path) -> Self {
        return Self {
            bindings: root.join("bindings.toml"),
            log: "warn".to_string(),
            model: root.join("model.json"),
            rules: Vec::new(),
        };
    }

    /// Saved handles.
    pub fn bindings(&self) -> &Path {
        return &self.bindings;
    }

    /// Default tracing filter.
    pub fn log(&self) -> &str {
        return &self.log;
    }

    /// Host model snapshot.
    pub fn model(&self) -> &Path {
        return &self.model;
    }

    /// Built-in classification table followed by the configured rules.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSubtypeRule` if a configured rule is unusable.
    pub fn type_registry(&self) -> Result<TypeRegistry, Error> {
        let mut registry = TypeRegistry::with_defaults();
        registry.extend_from_specs(&self.rules)?;
        return Ok(registry);
    }
}
