//! One conversion: match a rule, consult the cache, run the command.

use crate::cache::Cache;
use crate::cancel::Cancellation;
use crate::config::{self, Config, ConfigError, Rule};
use crate::executor::{Executor, ExecutorError};
use crate::matcher::{self, MatchError};
use std::error::Error as _;
use std::io::{self, Write};

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("no input provided")]
    EmptyInput,

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error("execution failed")]
    Execute(#[from] ExecutorError),

    #[error("failed to create temp directory")]
    TempDir(#[source] io::Error),

    #[error("failed to write output")]
    Write(#[source] io::Error),
}

impl ConvertError {
    /// Whether the conversion was stopped by cancellation or a deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Execute(e) if e.is_cancellation())
    }
}

/// Turns code blocks into rendered output using a ruleset and a cache.
#[derive(Debug, Clone)]
pub struct Converter {
    rules: Vec<Rule>,
    cache: Cache,
    executor: Executor,
}

impl Converter {
    pub fn new(rules: Vec<Rule>, cache: Cache, executor: Executor) -> Self {
        Self { rules, cache, executor }
    }

    /// Build a converter from a loaded configuration, using the default
    /// cache location and `$SHELL`.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let cache = Cache::new(config::cache_path()?, config.cache);
        let executor = Executor::from_env(config.shell.clone());
        Ok(Self::new(config.commands.clone(), cache, executor))
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Render `input` for `lang` and write the result to `sink`.
    ///
    /// A cache hit skips the command entirely. On a miss the command runs
    /// with a fresh temporary output path that is removed before this
    /// returns, whatever the outcome. Failing to store the result in the
    /// cache only logs a warning.
    pub fn convert<W: Write + ?Sized>(
        &self,
        lang: &str,
        input: &str,
        sink: &mut W,
        cancel: &Cancellation,
    ) -> Result<(), ConvertError> {
        if input.is_empty() {
            return Err(ConvertError::EmptyInput);
        }

        let rule = matcher::find_matching_rule(&self.rules, lang)?;
        let ext = rule.ext();

        if let Some(data) = self.cache.get(lang, input, &ext) {
            return write_output(sink, &data);
        }

        let temp_dir = tempfile::Builder::new()
            .prefix("laminate-")
            .tempdir()
            .map_err(ConvertError::TempDir)?;
        let output_path = temp_dir.path().join(format!("output.{ext}"));

        let data = self.executor.execute(rule, lang, input, &output_path, cancel)?;
        drop(temp_dir);

        if let Err(e) = self.cache.set(lang, input, &ext, &data) {
            let cause = e.source().map(|s| format!(": {s}")).unwrap_or_default();
            log::warn!("Failed to cache result: {e}{cause}");
        }

        write_output(sink, &data)
    }
}

fn write_output<W: Write + ?Sized>(sink: &mut W, data: &[u8]) -> Result<(), ConvertError> {
    sink.write_all(data).map_err(ConvertError::Write)?;
    sink.flush().map_err(ConvertError::Write)
}
