//! Render fenced code blocks through user-configured external commands.
//!
//! A code block arrives with a language tag. The first configured rule whose
//! glob pattern matches the tag supplies a command template; the command's
//! output is cached by (language, content hash, extension) so identical
//! blocks are only rendered once per cache period.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod executor;
pub mod exit_codes;
pub mod matcher;
pub mod shell;
pub mod template;

pub use cache::{Cache, CacheError};
pub use cancel::Cancellation;
pub use config::{CommandTemplate, Config, ConfigError, Rule};
pub use convert::{ConvertError, Converter};
pub use executor::{Executor, ExecutorError};
pub use matcher::{MatchError, find_matching_rule};
