//! Configuration loading.
//!
//! The configuration is a YAML document with an ordered list of rules,
//! each mapping a language pattern to a command:
//!
//! ```yaml
//! cache: 1h
//! commands:
//!   - lang: "{mermaid,mmd}"
//!     run: "mmdc -i - -o {{output}}"
//!     ext: svg
//!   - lang: "*"
//!     run: ["silicon", "--language", "{{lang}}", "--output", "{{output}}"]
//! ```

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "LAMINATE_CONFIG_PATH";
/// Environment variable overriding the cache directory.
pub const CACHE_PATH_ENV: &str = "LAMINATE_CACHE_PATH";

const APP_DIR: &str = "laminate";
const DEFAULT_EXT: &str = "png";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file at {}", path.display())]
    Read { source: std::io::Error, path: PathBuf },

    /// Failed to parse the configuration content
    #[error("failed to parse config file at {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// A duration value could not be understood
    #[error("invalid duration '{0}'")]
    InvalidDuration(String),

    /// The configuration has no rules
    #[error("no commands configured. Please create a config file at {}", path.display())]
    NoCommands { path: PathBuf },

    /// The platform gave us no home or config directory
    #[error("could not determine the user configuration directory")]
    NoConfigDir,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// How long cached output stays valid; zero disables the cache
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub cache: Duration,

    /// Deadline for a single command execution; zero means no deadline
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub timeout: Duration,

    /// Shell used for string commands when a rule names none
    #[serde(default)]
    pub shell: Option<String>,

    /// Rules in declaration order; the first matching rule wins
    #[serde(default)]
    pub commands: Vec<Rule>,
}

/// One language-pattern to command mapping.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Glob pattern matched against the whole language tag
    pub lang: String,

    /// Command to run
    pub run: CommandTemplate,

    /// Extension of the produced output (default: png)
    #[serde(default)]
    pub ext: Option<String>,

    /// Shell override for string commands
    #[serde(default)]
    pub shell: Option<String>,
}

/// A command given either as one shell line or as an argument vector.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandTemplate {
    /// Interpreted by a shell, so pipes and redirection work
    Shell(String),
    /// Passed to the program as-is, one token per argument
    Argv(Vec<String>),
}

impl CommandTemplate {
    /// The unexpanded template strings, in order.
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Self::Shell(line) => vec![line.as_str()],
            Self::Argv(tokens) => tokens.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => f.write_str(line),
            Self::Argv(tokens) => write!(f, "[{}]", tokens.join(", ")),
        }
    }
}

impl Rule {
    /// The filesystem-safe output extension, `png` when unset.
    pub fn ext(&self) -> String {
        match self.ext.as_deref() {
            Some(ext) if !ext.is_empty() => crate::cache::sanitize_component(ext),
            _ => DEFAULT_EXT.to_string(),
        }
    }
}

impl Config {
    /// Parse a configuration from YAML text.
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load the configuration from `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            source,
            path: path.to_path_buf(),
        })?;
        let config = Self::from_yaml(&content, path)?;
        log::debug!(
            "Loaded {} command(s) from {}",
            config.commands.len(),
            path.display()
        );
        Ok(config)
    }

    /// Load the configuration from `explicit`, or from the discovered path.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => config_path()?,
        };
        let config = Self::load_from(&path)?;
        Ok((config, path))
    }

    /// Reject a configuration with an empty ruleset.
    pub fn ensure_commands(&self, path: &Path) -> Result<(), ConfigError> {
        if self.commands.is_empty() {
            return Err(ConfigError::NoCommands {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// Where the configuration file lives.
///
/// `LAMINATE_CONFIG_PATH` wins; otherwise `<config dir>/laminate/config.yaml`.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env_path(CONFIG_PATH_ENV) {
        return Ok(path);
    }
    use etcetera::{BaseStrategy, choose_base_strategy};
    let strategy = choose_base_strategy().map_err(|_| ConfigError::NoConfigDir)?;
    Ok(strategy.config_dir().join(APP_DIR).join("config.yaml"))
}

/// Where cached output lives.
///
/// `LAMINATE_CACHE_PATH` wins; otherwise `<cache dir>/laminate/cache`.
pub fn cache_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = env_path(CACHE_PATH_ENV) {
        return Ok(path);
    }
    use etcetera::{BaseStrategy, choose_base_strategy};
    let strategy = choose_base_strategy().map_err(|_| ConfigError::NoConfigDir)?;
    Ok(strategy.cache_dir().join(APP_DIR).join("cache"))
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse a duration such as `90s`, `1h30m` or `250ms`.
///
/// A bare number is taken as seconds. Units: `ns`, `us`/`µs`, `ms`, `s`,
/// `m`, `h`, `d`. Fractions are allowed on each component (`1.5h`).
pub fn parse_duration(text: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(text.to_string());
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total_nanos: u128 = 0;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(invalid)?;
        let (whole, fraction) = match rest[..number_len].split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (&rest[..number_len], ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "d" => 86_400 * 1_000_000_000,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];

        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let mut component = whole.checked_mul(nanos_per_unit).ok_or_else(invalid)?;
        if !fraction.is_empty() {
            // Digits past nanosecond precision cannot matter for any unit.
            let digits = &fraction[..fraction.len().min(18)];
            let numerator: u128 = digits.parse().map_err(|_| invalid())?;
            component += numerator * nanos_per_unit / 10u128.pow(digits.len() as u32);
        }
        total_nanos = total_nanos.checked_add(component).ok_or_else(invalid)?;
    }

    let secs = u64::try_from(total_nanos / 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(secs, (total_nanos % 1_000_000_000) as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(yaml: &str) -> Config {
        Config::from_yaml(yaml, Path::new("test.yaml")).expect("config should parse")
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
cache: 1h
timeout: 30s
shell: /bin/bash
commands:
  - lang: go
    run: echo go
    ext: svg
  - lang: "{python,py}"
    run: ["python3", "-c", "{{input}}"]
    shell: /bin/zsh
"#,
        );

        assert_eq!(config.cache, Duration::from_secs(3600));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.shell.as_deref(), Some("/bin/bash"));
        assert_eq!(config.commands.len(), 2);
        assert_eq!(config.commands[0].lang, "go");
        assert_eq!(config.commands[0].run, CommandTemplate::Shell("echo go".to_string()));
        assert_eq!(config.commands[0].ext(), "svg");
        assert_eq!(
            config.commands[1].run,
            CommandTemplate::Argv(vec!["python3".into(), "-c".into(), "{{input}}".into()])
        );
        assert_eq!(config.commands[1].shell.as_deref(), Some("/bin/zsh"));
    }

    #[test]
    fn test_defaults_when_omitted() {
        let config = parse("commands:\n- lang: test\n  run: echo test\n");
        assert_eq!(config.cache, Duration::ZERO);
        assert_eq!(config.timeout, Duration::ZERO);
        assert_eq!(config.shell, None);
        assert_eq!(config.commands[0].ext(), "png");
    }

    #[test]
    fn test_ext_is_sanitized() {
        let rule = Rule {
            lang: "x".into(),
            run: CommandTemplate::Shell("true".into()),
            ext: Some("../svg".into()),
            shell: None,
        };
        assert_eq!(rule.ext(), ".._svg");

        let rule = Rule { ext: Some(".gif".into()), ..rule };
        assert_eq!(rule.ext(), ".gif");
    }

    #[test]
    fn test_cache_as_integer_seconds() {
        let config = parse("cache: 120\ncommands: []\n");
        assert_eq!(config.cache, Duration::from_secs(120));
    }

    #[test]
    fn test_invalid_run_shape_rejected() {
        let result = Config::from_yaml("commands:\n- lang: x\n  run: {a: b}\n", Path::new("c.yaml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = Config::from_yaml("commands:\n- lang: x\n  run: y\n  extension: svg\n", Path::new("c.yaml"));
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load_from(Path::new("/non/existent/laminate/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "cache: 10m\ncommands:\n- lang: '*'\n  run: cat\n").unwrap();

        let (config, loaded_from) = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded_from, path);
        assert_eq!(config.cache, Duration::from_secs(600));
        assert!(config.ensure_commands(&path).is_ok());
    }

    #[test]
    fn test_ensure_commands_rejects_empty() {
        let config = parse("cache: 1h\n");
        let err = config.ensure_commands(Path::new("/etc/laminate.yaml")).unwrap_err();
        assert!(err.to_string().contains("/etc/laminate.yaml"));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2h45m10s").unwrap(), Duration::from_secs(9910));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_duration("0s").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for bad in ["", "h", "10x", "1h-", "-5s", "1.2.3s", "s10"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_command_template_display() {
        assert_eq!(CommandTemplate::Shell("dot -Tpng".into()).to_string(), "dot -Tpng");
        assert_eq!(
            CommandTemplate::Argv(vec!["dot".into(), "-Tpng".into()]).to_string(),
            "[dot, -Tpng]"
        );
    }
}
