//! Persisted key/value sections
//!
//! Printer data is kept in a TOML file where every top-level table is one
//! named section, e.g. `["bed_mesh Contact"]`. Values are read back as raw
//! text and converted by the typed getters, so a section behaves the same
//! whether a number was written as `1` or `"1"`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{ConfigError, StorageError};

/// A single named section of raw option values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Section {
    name: String,
    values: BTreeMap<String, String>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set(&mut self, option: &str, value: impl ToString) {
        self.values.insert(option.to_string(), value.to_string());
    }

    pub fn get_raw(&self, option: &str) -> Option<&str> {
        self.values.get(option).map(String::as_str)
    }

    /// Required string option
    pub fn get(&self, option: &str) -> Result<String, ConfigError> {
        self.get_raw(option)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| self.missing(option))
    }

    /// Required integer option
    pub fn get_int(&self, option: &str) -> Result<i64, ConfigError> {
        self.parse_option(option, None)
    }

    /// Integer option falling back to `default` when absent
    pub fn get_int_or(&self, option: &str, default: i64) -> Result<i64, ConfigError> {
        self.parse_option(option, Some(default))
    }

    /// Required float option
    pub fn get_float(&self, option: &str) -> Result<f64, ConfigError> {
        self.parse_option(option, None)
    }

    /// Parse a newline separated list of comma separated floats.
    /// Blank lines are ignored.
    pub fn get_lists(&self, option: &str) -> Result<Vec<Vec<f64>>, ConfigError> {
        let raw = self.get_raw(option).ok_or_else(|| self.missing(option))?;

        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                line.split(',')
                    .map(|item| {
                        let item = item.trim();
                        item.parse::<f64>()
                            .map_err(|e| self.invalid(option, format!("'{}': {}", item, e)))
                    })
                    .collect()
            })
            .collect()
    }

    fn parse_option<T>(&self, option: &str, default: Option<T>) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.get_raw(option), default) {
            (Some(raw), _) => {
                let raw = raw.trim();
                raw.parse::<T>()
                    .map_err(|e| self.invalid(option, format!("'{}': {}", raw, e)))
            }
            (None, Some(default)) => Ok(default),
            (None, None) => Err(self.missing(option)),
        }
    }

    fn missing(&self, option: &str) -> ConfigError {
        ConfigError::MissingOption {
            section: self.name.clone(),
            option: option.to_string(),
        }
    }

    fn invalid(&self, option: &str, reason: String) -> ConfigError {
        ConfigError::InvalidValue {
            section: self.name.clone(),
            option: option.to_string(),
            reason,
        }
    }
}

/// All sections of the storage file, keyed by section name
#[derive(Debug, Clone, Default)]
pub struct SectionStore {
    path: Option<PathBuf>,
    sections: BTreeMap<String, Section>,
}

impl SectionStore {
    /// Load sections from a file. A missing file yields an empty store that
    /// will be created on the first save.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let mut store = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let store = Self::parse(&content)?;
            tracing::info!("Loaded {} sections from {:?}", store.sections.len(), path);
            store
        } else {
            tracing::info!("Storage {:?} does not exist yet, starting empty", path);
            Self::default()
        };
        store.path = Some(path.to_path_buf());
        Ok(store)
    }

    /// Parse sections from TOML text
    pub fn parse(content: &str) -> Result<Self, StorageError> {
        let table: toml::Table = toml::from_str(content)?;
        let mut sections = BTreeMap::new();

        for (name, value) in table {
            let toml::Value::Table(options) = value else {
                return Err(StorageError::NotATable(name));
            };
            let mut section = Section::new(name.clone());
            for (option, value) in &options {
                section.set(option, raw_value(value));
            }
            sections.insert(name, section);
        }

        Ok(Self {
            path: None,
            sections,
        })
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    /// Sections whose name starts with `prefix`, in name order
    pub fn prefix_sections<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Section> {
        self.sections
            .values()
            .filter(move |s| s.name.starts_with(prefix))
    }

    /// Insert or replace a section
    pub fn set_section(&mut self, section: Section) {
        self.sections.insert(section.name.clone(), section);
    }

    /// Write all sections back to the file the store was loaded from
    pub fn save(&self) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut table = toml::Table::new();
        for (name, section) in &self.sections {
            let options = section
                .values
                .iter()
                .map(|(k, v)| (k.clone(), toml::Value::String(v.clone())))
                .collect::<toml::Table>();
            table.insert(name.clone(), toml::Value::Table(options));
        }
        let content = toml::to_string_pretty(&table)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;

        tracing::debug!("Saved {} sections to {:?}", self.sections.len(), path);
        Ok(())
    }
}

/// Render a TOML value as the raw text a section option holds.
/// Arrays of arrays become newline separated rows.
fn raw_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items
            .iter()
            .map(|item| match item {
                toml::Value::Array(row) => row.iter().map(raw_value).collect::<Vec<_>>().join(", "),
                other => raw_value(other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
