use anyhow::Context;
use clap::Parser;
use laminate::exit_codes::{self, exit};
use laminate::{Cancellation, Config, Converter};
use std::io::{self, Read};
use std::path::PathBuf;

/// Environment variable carrying the language when `--lang` is empty.
const LANG_ENV: &str = "CODEBLOCK_LANG";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Code block language (can also be set via CODEBLOCK_LANG env var)
    #[arg(long, default_value = "")]
    lang: String,

    /// Configuration file path (overrides LAMINATE_CONFIG_PATH and the default location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remove expired cache entries and exit
    #[arg(long)]
    sweep_cache: bool,

    /// Show debug output on stderr
    #[arg(short, long)]
    verbose: bool,
}

/// An error together with the exit code it maps to.
struct Failure {
    code: i32,
    error: anyhow::Error,
}

impl Failure {
    fn config(error: impl Into<anyhow::Error>) -> Self {
        Self {
            code: exit_codes::CONFIG_ERROR,
            error: error.into(),
        }
    }

    fn conversion(error: impl Into<anyhow::Error>) -> Self {
        Self {
            code: exit_codes::CONVERSION_FAILED,
            error: error.into(),
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => exit::success(),
        Err(failure) => {
            eprintln!("Error: {:#}", failure.error);
            match failure.code {
                exit_codes::CONFIG_ERROR => exit::config_error(),
                exit_codes::CANCELLED => exit::cancelled(),
                _ => exit::conversion_failed(),
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "laminate=debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<(), Failure> {
    let (config, config_path) = Config::load(cli.config.as_deref())
        .context("failed to load config")
        .map_err(Failure::config)?;
    let converter = Converter::from_config(&config).map_err(Failure::config)?;

    if cli.sweep_cache {
        converter
            .cache()
            .sweep()
            .context("failed to clean cache")
            .map_err(Failure::conversion)?;
        return Ok(());
    }

    config.ensure_commands(&config_path).map_err(Failure::config)?;

    let lang = resolve_lang(&cli.lang, std::env::var(LANG_ENV).ok());

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("failed to read input")
        .map_err(Failure::conversion)?;

    let cancel = Cancellation::with_timeout(config.timeout);
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        log::debug!("Could not install interrupt handler: {e}");
    }

    let mut stdout = io::stdout().lock();
    converter
        .convert(&lang, &input, &mut stdout, &cancel)
        .map_err(|e| Failure {
            code: if e.is_cancellation() {
                exit_codes::CANCELLED
            } else {
                exit_codes::CONVERSION_FAILED
            },
            error: anyhow::Error::new(e),
        })
}

/// `--lang` wins unless it is empty; then the environment value is used.
fn resolve_lang(flag: &str, env_value: Option<String>) -> String {
    if flag.is_empty() {
        env_value.unwrap_or_default()
    } else {
        flag.to_string()
    }
}
