// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&contents, path.extension().and_then(|s| s.to_str()))?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, extension: Option<&str>) -> Result<Config> {
    let config = match extension {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        }
        _ => serde_json::from_str(contents).context("Failed to parse JSON config")?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
server:
  listen: "127.0.0.1:8090"
scheduler:
  interval_secs: 60
  max_in_flight: 4
services:
  - name: portal
    url: "http://localhost:8080/health"
    max_response_time_ms: 500
  - name: review
    url: "http://localhost:8081/health"
    depends_on: [portal, logs]
  - name: logs
    url: "http://localhost:8082/health"
policies:
  - service: portal
    auto_repair_enabled: true
    repair_strategy: restart
"#;

    #[test]
    fn parses_yaml_with_defaults() {
        let config = parse_config(SAMPLE, Some("yaml")).unwrap();
        config.validate().unwrap();

        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.scheduler.barrier_timeout_secs, 30);
        assert_eq!(config.storage.retention_days, 30);
        assert_eq!(config.repair.rebuild_timeout_secs, 120);

        let review = config.services[1].descriptor(&config.probe);
        assert_eq!(review.max_response_time_ms, config.probe.max_response_time_ms);
        assert_eq!(review.depends_on, vec!["portal", "logs"]);
        assert_eq!(config.policies[0].patch.repair_strategy.as_deref(), Some("restart"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let yaml = r#"
services:
  - name: review
    url: "http://localhost:8081/health"
    depends_on: [billing]
"#;
        let config = parse_config(yaml, Some("yml")).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("billing"));
    }

    #[test]
    fn rejects_duplicate_services() {
        let json = r#"{"services":[
            {"name":"logs","url":"http://localhost:8082/health"},
            {"name":"logs","url":"http://localhost:9082/health"}
        ]}"#;
        let config = parse_config(json, Some("json")).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateService(name)) if name == "logs"
        ));
    }
}
