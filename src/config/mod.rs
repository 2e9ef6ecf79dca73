use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::capture::{CaptureOptions, FilterRule, LogFormat, TextEncoding};
use crate::error::{Error, Result};

pub const ENV_FORMAT: &str = "LOGGING_UTIL_FORMAT";
pub const ENV_APPEND: &str = "LOGGING_UTIL_APPEND";

/// Settings for one logging run.
///
/// Built from defaults, then an optional TOML file, then environment
/// variables, then command-line flags (highest precedence).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    pub log_file: Option<PathBuf>,
    pub append: bool,
    pub format: LogFormat,
    pub keep: Option<String>,
    pub skip: Option<String>,
    pub simplify: bool,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub encoding: String,
    pub input_encoding: String,
    pub passthrough_input: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            append: false,
            format: LogFormat::Verbose,
            keep: None,
            skip: None,
            simplify: false,
            capture_stdout: true,
            capture_stderr: true,
            encoding: "utf-8".to_string(),
            input_encoding: "utf-8".to_string(),
            passthrough_input: true,
        }
    }
}

impl LoggerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    pub fn merge_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(format) = lookup(ENV_FORMAT) {
            match format.parse::<LogFormat>() {
                Ok(format) => self.format = format,
                Err(e) => tracing::warn!("Ignoring {}: {}", ENV_FORMAT, e),
            }
        }

        if let Some(append) = lookup(ENV_APPEND) {
            if let Ok(value) = append.parse::<bool>() {
                self.append = value;
            }
        }
    }

    /// Normalize conflicting settings: HTML output always truncates, since
    /// its table framing cannot be reopened inside an existing document
    pub fn validate(&mut self) -> Result<()> {
        if self.format == LogFormat::Html && self.append {
            tracing::debug!("HTML output does not support append mode, truncating instead");
            self.append = false;
        }
        self.capture_options().map(|_| ())
    }

    /// Compile patterns and resolve encodings for the supervisor
    pub fn capture_options(&self) -> Result<CaptureOptions> {
        Ok(CaptureOptions {
            format: self.format,
            filter: FilterRule::new(self.keep.as_deref(), self.skip.as_deref())?,
            simplify: self.simplify,
            capture_stdout: self.capture_stdout,
            capture_stderr: self.capture_stderr,
            output_encoding: self.encoding.parse::<TextEncoding>()?,
            input_encoding: self.input_encoding.parse::<TextEncoding>()?,
            passthrough_input: self.passthrough_input,
        })
    }

    /// Configured log file, or `<program>.<date>.<ext>` in the current
    /// directory (`stdin.<date>.<ext>` when capturing standard input)
    pub fn log_path(&self, program: Option<&str>, today: NaiveDate) -> PathBuf {
        if let Some(path) = &self.log_file {
            return path.clone();
        }
        let stem = program
            .and_then(|p| Path::new(p).file_stem())
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("stdin");
        PathBuf::from(format!(
            "{}.{}.{}",
            stem,
            today.format("%Y-%m-%d"),
            self.format.extension()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2013, 5, 1).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = LoggerConfig::new();
        assert_eq!(config.format, LogFormat::Verbose);
        assert!(config.capture_stdout && config.capture_stderr);
        assert!(!config.append);
        let options = config.capture_options().unwrap();
        assert_eq!(options.output_encoding, TextEncoding::Utf8);
    }

    #[test]
    fn test_toml_parsing() {
        let config = LoggerConfig::from_toml_str(
            r#"
format = "html"
append = true
skip = "DEBUG"
capture_stderr = false
encoding = "latin1"
"#,
        )
        .unwrap();

        assert_eq!(config.format, LogFormat::Html);
        assert!(config.append);
        assert_eq!(config.skip.as_deref(), Some("DEBUG"));
        assert!(!config.capture_stderr);
        assert!(config.capture_stdout);
        assert_eq!(config.encoding, "latin1");
    }

    #[test]
    fn test_toml_unknown_field_rejected() {
        let result = LoggerConfig::from_toml_str("colour = true\n");
        assert!(matches!(result, Err(Error::Toml(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [(ENV_FORMAT, "plain"), (ENV_APPEND, "true")].into();
        let mut config = LoggerConfig::new();
        config.merge_env_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.format, LogFormat::Plain);
        assert!(config.append);
    }

    #[test]
    fn test_env_invalid_values_ignored() {
        let env: HashMap<&str, &str> = [(ENV_FORMAT, "xml"), (ENV_APPEND, "maybe")].into();
        let mut config = LoggerConfig::new();
        config.merge_env_with(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config, LoggerConfig::new());
    }

    #[test]
    fn test_html_forces_truncate() {
        let mut config = LoggerConfig {
            format: LogFormat::Html,
            append: true,
            ..LoggerConfig::default()
        };
        config.validate().unwrap();
        assert!(!config.append);
    }

    #[test]
    fn test_validate_surfaces_configuration_errors() {
        let mut config = LoggerConfig {
            keep: Some("[".to_string()),
            ..LoggerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidPattern { .. })
        ));

        let mut config = LoggerConfig {
            encoding: "ebcdic".to_string(),
            ..LoggerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_log_path_derivation() {
        let config = LoggerConfig::new();
        assert_eq!(
            config.log_path(Some("/usr/bin/x264"), date()),
            PathBuf::from("x264.2013-05-01.log")
        );
        assert_eq!(
            config.log_path(None, date()),
            PathBuf::from("stdin.2013-05-01.log")
        );

        let html = LoggerConfig {
            format: LogFormat::Html,
            ..LoggerConfig::default()
        };
        assert_eq!(
            html.log_path(Some("encoder.exe"), date()),
            PathBuf::from("encoder.2013-05-01.html")
        );

        let explicit = LoggerConfig {
            log_file: Some(PathBuf::from("out.txt")),
            ..LoggerConfig::default()
        };
        assert_eq!(explicit.log_path(Some("x"), date()), PathBuf::from("out.txt"));
    }
}
