//! TOML parser with helpful error messages

use super::schema::DroidpushConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// Parse droidpush.toml with detailed error messages
pub fn parse_config(path: &Path) -> Result<DroidpushConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse droidpush.toml content from string
pub fn parse_config_str(content: &str) -> Result<DroidpushConfig> {
    let config: DroidpushConfig =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

    config.validate()?;

    Ok(config)
}

/// Attach the offending lines to a TOML error
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();

    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())].matches('\n').count() + 1;
            anyhow::anyhow!(
                "TOML parsing error at line {}:\n{}\n\nError: {}",
                line_num,
                get_line_context(content, line_num),
                message
            )
        }
        None => anyhow::anyhow!("TOML parsing error: {}", message),
    }
}

/// Get context lines around an error
fn get_line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 1).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Serialize a configuration to TOML string
pub fn to_toml(config: &DroidpushConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config to TOML")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config_str("").unwrap();
        assert_eq!(config, DroidpushConfig::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let config = parse_config_str("max_cycles = 5\nadb_path = \"/opt/adb\"\n").unwrap();
        assert_eq!(config.max_cycles, 5);
        assert_eq!(config.adb_path, std::path::PathBuf::from("/opt/adb"));
        assert_eq!(config.transient_attempts, 2);
    }

    #[test]
    fn type_error_reports_line() {
        let err = parse_config_str("adb_path = \"adb\"\nmax_cycles = \"three\"\n").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("line 2"), "{message}");
        assert!(message.contains(">>>"), "{message}");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config_str("max_retries = 4\n").is_err());
    }

    #[test]
    fn validation_runs_after_parse() {
        let err = parse_config_str("command_timeout_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("command_timeout_secs"));
    }

    #[test]
    fn serialized_config_parses_back() {
        let config = DroidpushConfig {
            max_cycles: 4,
            ..DroidpushConfig::default()
        };
        let text = to_toml(&config).unwrap();
        assert_eq!(parse_config_str(&text).unwrap(), config);
    }
}
