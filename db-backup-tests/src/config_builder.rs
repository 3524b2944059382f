//! Fluent API for building test configuration files
//!
//! Credentials never serialize, so the builder renders TOML text directly.

use crate::fixtures::TEST_ACCOUNT_KEY;
use db_backup::config::Config;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Builder for db-backup TOML files
pub struct ConfigBuilder {
    temp_dir: TempDir,
    global: Vec<(String, String)>,
    database: Vec<(String, String)>,
    azure: Vec<(String, String)>,
    local_root: Option<PathBuf>,
    destinations: Vec<(String, String)>,
}

fn quoted(value: &str) -> String {
    format!("{:?}", value)
}

impl ConfigBuilder {
    /// Empty configuration: every value comes from defaults
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            global: Vec::new(),
            database: Vec::new(),
            azure: Vec::new(),
            local_root: None,
            destinations: Vec::new(),
        }
    }

    /// Complete configuration writing to a local directory in the temp dir
    pub fn minimal() -> Self {
        let builder = Self::new().database("db.internal", "shop", "backup", "hunter2");
        let root = builder.temp_dir.path().join("backups");
        fs::create_dir_all(&root).expect("Failed to create backup dir");
        builder.local_root(root).destination("local", "")
    }

    pub fn database(mut self, host: &str, name: &str, user: &str, password: &str) -> Self {
        self.database.push(("host".into(), quoted(host)));
        self.database.push(("name".into(), quoted(name)));
        self.database.push(("user".into(), quoted(user)));
        self.database.push(("password".into(), quoted(password)));
        self
    }

    pub fn database_option(mut self, key: &str, raw_value: &str) -> Self {
        self.database.push((key.into(), raw_value.into()));
        self
    }

    pub fn azure(mut self, account: &str, container: &str) -> Self {
        self.azure.push(("account_name".into(), quoted(account)));
        self.azure.push(("account_key".into(), quoted(TEST_ACCOUNT_KEY)));
        self.azure.push(("container".into(), quoted(container)));
        self
    }

    pub fn azure_option(mut self, key: &str, raw_value: &str) -> Self {
        self.azure.push((key.into(), raw_value.into()));
        self
    }

    /// Set a `[global]` value; `raw_value` is TOML (quote strings yourself)
    pub fn global(mut self, key: &str, raw_value: &str) -> Self {
        self.global.push((key.into(), raw_value.into()));
        self
    }

    pub fn local_root(mut self, root: PathBuf) -> Self {
        self.local_root = Some(root);
        self
    }

    pub fn destination(mut self, backend: &str, prefix: &str) -> Self {
        self.destinations.push((backend.into(), prefix.into()));
        self
    }

    /// Render the TOML document
    pub fn to_toml(&self) -> String {
        let mut out = String::new();
        let mut section = |name: &str, values: &[(String, String)]| {
            if values.is_empty() {
                return;
            }
            let _ = writeln!(out, "[{}]", name);
            for (key, value) in values {
                let _ = writeln!(out, "{} = {}", key, value);
            }
            out.push('\n');
        };

        section("global", &self.global);
        section("database", &self.database);
        section("azure", &self.azure);
        if let Some(ref root) = self.local_root {
            let local = vec![("root".to_string(), quoted(&root.display().to_string()))];
            section("local", &local[..]);
        }

        for (backend, prefix) in &self.destinations {
            let _ = writeln!(out, "[[destinations]]");
            let _ = writeln!(out, "backend = {}", quoted(backend));
            if !prefix.is_empty() {
                let _ = writeln!(out, "prefix = {}", quoted(prefix));
            }
            out.push('\n');
        }
        out
    }

    /// Parse the rendered document
    pub fn build(&self) -> Config {
        toml::from_str(&self.to_toml()).expect("Builder produced invalid TOML")
    }

    /// Write the config file into the temp dir.
    /// Returns its path and the temp dir, which must be kept alive.
    pub fn persist(self) -> (PathBuf, TempDir) {
        let path = self.temp_dir.path().join("db-backup.toml");
        fs::write(&path, self.to_toml()).expect("Failed to write config");
        (path, self.temp_dir)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
