//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::Config;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("error parsing config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("error parsing config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("error parsing config file: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Supported document encodings, picked by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// `.json` and `.toml` are recognised; anything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// Parse a document, fill per-module defaults and validate it.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let mut config: Config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(content)?,
        ConfigFormat::Json => serde_json::from_str(content)?,
        ConfigFormat::Toml => toml::from_str(content)?,
    };

    for module in config.modules.values_mut() {
        module.fill_defaults();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load and validate configuration from a YAML, JSON or TOML file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content, ConfigFormat::from_path(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ProberKind;

    const YAML: &str = r#"
modules:
  http_2xx:
    prober: http
    timeout: 5s
    http:
      valid_status_codes: [200, 204]
      fail_if_body_not_matches_regexp: ["ok"]
  dns_example:
    prober: dns
    dns:
      query_name: example.com
      query_type: A
"#;

    const JSON: &str = r#"{
  "modules": {
    "http_2xx": {
      "prober": "http",
      "timeout": "5s",
      "http": {
        "valid_status_codes": [200, 204],
        "fail_if_body_not_matches_regexp": ["ok"]
      }
    },
    "dns_example": {
      "prober": "dns",
      "dns": { "query_name": "example.com", "query_type": "A" }
    }
  }
}"#;

    const TOML: &str = r#"
[modules.http_2xx]
prober = "http"
timeout = "5s"

[modules.http_2xx.http]
valid_status_codes = [200, 204]
fail_if_body_not_matches_regexp = ["ok"]

[modules.dns_example]
prober = "dns"

[modules.dns_example.dns]
query_name = "example.com"
query_type = "A"
"#;

    #[test]
    fn test_formats_are_equivalent() {
        let yaml = parse_config(YAML, ConfigFormat::Yaml).unwrap();
        let json = parse_config(JSON, ConfigFormat::Json).unwrap();
        let toml = parse_config(TOML, ConfigFormat::Toml).unwrap();
        assert_eq!(yaml, json);
        assert_eq!(yaml, toml);
        assert_eq!(yaml.modules["http_2xx"].prober, ProberKind::Http);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
    }

    #[test]
    fn test_validation_error_is_prefixed() {
        let doc = "modules:\n  d:\n    prober: dns\n    dns:\n      query_name: ''\n";
        let err = parse_config(doc, ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert_eq!(
            err.to_string(),
            "error parsing config file: module 'd': query name must be set for DNS module"
        );
    }

    #[test]
    fn test_unknown_prober_is_parse_error() {
        let doc = r#"{"modules":{"m":{"prober":"hTTp"}}}"#;
        let err = parse_config(doc, ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
        assert!(err.to_string().contains("prober 'hTTp' is invalid"), "{}", err);
    }

    #[test]
    fn test_lowercase_query_type_is_rejected() {
        let doc = "modules:\n  d:\n    prober: dns\n    dns:\n      query_name: example.com\n      query_type: a\n";
        let err = parse_config(doc, ConfigFormat::Yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("query type 'a' is not valid"), "{}", err);
    }

    #[test]
    fn test_headers_keep_document_order() {
        let doc = "modules:\n  h:\n    prober: http\n    http:\n      headers:\n        X-Zulu: z\n        Accept: '*/*'\n        X-Alpha: a\n";
        let config = parse_config(doc, ConfigFormat::Yaml).unwrap();
        let http = config.modules["h"].http.as_ref().unwrap();
        let names: Vec<&str> = http.headers.keys().map(String::as_str).collect();
        assert_eq!(names, ["X-Zulu", "Accept", "X-Alpha"]);

        let dumped = serde_yaml::to_string(&config).unwrap();
        let zulu = dumped.find("X-Zulu").unwrap();
        let alpha = dumped.find("X-Alpha").unwrap();
        assert!(zulu < alpha, "{}", dumped);
    }
}
