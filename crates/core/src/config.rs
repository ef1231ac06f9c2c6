use crate::template::{BASIC_FORMAT, Template};
use serde::{Deserialize, Serialize};

// ─── Config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    /// Prefix the application is mounted under; prepended to logged URIs.
    pub script_name: String,

    // Logging
    pub logging: LoggingConfig,

    // Name the access logger reports under
    pub access_logger: String,

    // Graceful shutdown drain (seconds)
    pub shutdown_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            script_name: String::new(),
            logging: LoggingConfig::default(),
            access_logger: "wsgi".to_string(),
            shutdown_timeout: 5,
        }
    }
}

impl Config {
    /// Load config from a YAML file and validate it.
    pub fn load(path: &str) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let mut config: Config = serde_yaml_ng::from_str(contents)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            !self.access_logger.is_empty(),
            "access-logger must not be empty"
        );
        anyhow::ensure!(
            self.script_name.is_empty() || self.script_name.starts_with('/'),
            "script-name must start with '/': {}",
            self.script_name
        );
        self.logging.template()?;
        Ok(())
    }

    fn sanitize(&mut self) {
        while self.script_name.ends_with('/') {
            self.script_name.pop();
        }
    }
}

// ─── Sub-configs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingConfig {
    /// Level filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Line format; `{placeholders}` name request variables or record fields.
    pub format: String,
    pub to_file: bool,
    pub dir: String,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: BASIC_FORMAT.to_string(),
            to_file: false,
            dir: "./logs".to_string(),
            file_name: "reqscope.log".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn template(&self) -> Result<Template, anyhow::Error> {
        Template::parse(&self.format)
            .map_err(|e| anyhow::anyhow!("invalid logging format {:?}: {e}", self.format))
    }
}
