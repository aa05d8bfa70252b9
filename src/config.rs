//! Settings loaded from TOML files with named sections
//!
//! Section and key names are case-insensitive. Scalars are kept as strings;
//! arrays of scalars keep one string per element.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::{Error, Result};

/// Section holding the Batch account credentials
pub const ACCOUNT_SECTION: &str = "azbatch";

/// Default global configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "azure-configuration.toml";

/// Read access to sectioned key/value settings
pub trait ConfigSource {
    fn lookup(&self, section: &str, key: &str) -> Option<String>;

    fn has_section(&self, section: &str) -> bool;

    /// Elements of a list value. A scalar is a one-element list, so a single
    /// string is never split.
    fn lookup_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.lookup(section, key).map(|value| vec![value])
    }

    /// Value for `key` in `section`, or `MissingConfig` naming both
    fn get(&self, section: &str, key: &str) -> Result<String> {
        self.lookup(section, key).ok_or_else(|| Error::missing(section, key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Scalar(String),
    List(Vec<String>),
}

impl Entry {
    /// Lists render comma-separated for display and scalar lookups
    fn render(&self) -> String {
        match self {
            Entry::Scalar(value) => value.clone(),
            Entry::List(items) => items.join(", "),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, Entry>>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| std::io::Error::new(e.kind(), format!("cannot read {}: {}", path.display(), e)))?;
        let settings = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), sections = settings.sections.len(), "Loaded configuration");
        Ok(settings)
    }

    /// Load several files; later files override earlier ones key by key
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut settings = Self::new();
        for path in paths {
            settings.merge(Self::load(path)?);
        }
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(text)?;
        let mut settings = Self::new();

        for (section, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(Error::Config(format!(
                    "top-level key '{}' must be a [section]",
                    section
                )));
            };
            for (key, value) in entries {
                let entry = to_entry(&value).ok_or_else(|| {
                    Error::Config(format!("[{}] {} must be a scalar or an array of scalars", section, key))
                })?;
                settings.insert(&section, &key, entry);
            }
        }

        Ok(settings)
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.insert(section, key, Entry::Scalar(value.into()));
    }

    pub fn set_list<S: Into<String>>(&mut self, section: &str, key: &str, items: impl IntoIterator<Item = S>) {
        self.insert(section, key, Entry::List(items.into_iter().map(Into::into).collect()));
    }

    pub fn with(mut self, section: &str, key: &str, value: impl Into<String>) -> Self {
        self.set(section, key, value);
        self
    }

    pub fn with_list<S: Into<String>>(mut self, section: &str, key: &str, items: impl IntoIterator<Item = S>) -> Self {
        self.set_list(section, key, items);
        self
    }

    fn insert(&mut self, section: &str, key: &str, entry: Entry) {
        self.sections
            .entry(section.to_ascii_lowercase())
            .or_default()
            .insert(key.to_ascii_lowercase(), entry);
    }

    fn entry(&self, section: &str, key: &str) -> Option<&Entry> {
        self.sections
            .get(&section.to_ascii_lowercase())?
            .get(&key.to_ascii_lowercase())
    }

    pub fn merge(&mut self, other: Settings) {
        for (section, entries) in other.sections {
            self.sections.entry(section).or_default().extend(entries);
        }
    }

    /// Copy of all settings with credential-like values masked
    pub fn redacted(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        self.sections
            .iter()
            .map(|(section, entries)| {
                let entries = entries
                    .iter()
                    .map(|(key, value)| {
                        let value = if is_secret(key) { "****".to_string() } else { value.render() };
                        (key.clone(), value)
                    })
                    .collect();
                (section.clone(), entries)
            })
            .collect()
    }
}

impl ConfigSource for Settings {
    fn lookup(&self, section: &str, key: &str) -> Option<String> {
        self.entry(section, key).map(Entry::render)
    }

    fn lookup_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        match self.entry(section, key)? {
            Entry::Scalar(value) => Some(vec![value.clone()]),
            Entry::List(items) => Some(items.clone()),
        }
    }

    fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(&section.to_ascii_lowercase())
    }
}

fn to_entry(value: &toml::Value) -> Option<Entry> {
    match value {
        toml::Value::Array(items) => items.iter().map(scalar).collect::<Option<Vec<_>>>().map(Entry::List),
        value => scalar(value).map(Entry::Scalar),
    }
}

fn scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

fn is_secret(key: &str) -> bool {
    ["key", "secret", "password", "token"]
        .iter()
        .any(|marker| key.contains(marker))
}

/// Shared Key credentials for a Batch account
#[derive(Clone)]
pub struct BatchAccount {
    pub name: String,
    /// Base64 account key
    pub key: String,
    /// Account endpoint, e.g. `https://myaccount.westeurope.batch.azure.com`
    pub url: String,
}

impl BatchAccount {
    pub fn from_config(config: &impl ConfigSource) -> Result<Self> {
        let account = Self {
            name: config.get(ACCOUNT_SECTION, "batch_account_name")?,
            key: config.get(ACCOUNT_SECTION, "batch_account_key")?,
            url: config.get(ACCOUNT_SECTION, "batch_account_url")?,
        };
        account.validate()?;
        Ok(account)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("batch_account_name cannot be empty".into()));
        }
        if !self.url.starts_with("https://") && !self.url.starts_with("http://") {
            return Err(Error::Config(format!(
                "batch_account_url must be an http(s) URL, got '{}'",
                self.url
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for BatchAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchAccount")
            .field("name", &self.name)
            .field("key", &"****")
            .field("url", &self.url)
            .finish()
    }
}
