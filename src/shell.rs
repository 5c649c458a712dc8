//! Shell selection for string-form commands.

use std::path::PathBuf;

/// Environment variable naming the user's shell.
pub const SHELL_ENV: &str = "SHELL";

#[cfg(windows)]
const PLATFORM_DEFAULT_SHELL: &str = "cmd";
#[cfg(not(windows))]
const PLATFORM_DEFAULT_SHELL: &str = "/bin/sh";

/// Choose the shell that runs a string command.
///
/// Precedence: the rule's shell, the configuration-wide shell, `$SHELL`,
/// then `bash` or `sh` found through `lookup`, then the platform default.
/// Empty strings count as unset. All inputs are explicit so the choice can
/// be tested without touching the process environment.
pub fn resolve_shell<F>(
    rule_shell: Option<&str>,
    config_shell: Option<&str>,
    env_shell: Option<&str>,
    lookup: F,
) -> String
where
    F: Fn(&str) -> Option<PathBuf>,
{
    if let Some(shell) = [rule_shell, config_shell, env_shell]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
    {
        return shell.to_string();
    }

    ["bash", "sh"]
        .into_iter()
        .find_map(|name| lookup(name))
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|| PLATFORM_DEFAULT_SHELL.to_string())
}

/// Find a program on `PATH`.
pub fn which_lookup(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// The flag that makes `shell` run its next argument as a command line.
pub fn command_flag(shell: &str) -> &'static str {
    let program = shell
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(shell)
        .to_ascii_lowercase();
    match program.as_str() {
        "cmd" | "cmd.exe" => "/C",
        _ => "-c",
    }
}
