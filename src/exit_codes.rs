/// Exit codes for laminate
///
/// These let a document pipeline tell a broken setup apart from a single
/// block that failed to render.
/// Success - Output fully written
pub const SUCCESS: i32 = 0;

/// Conversion failed - No input, no matching rule, bad pattern, or the command failed
pub const CONVERSION_FAILED: i32 = 1;

/// Setup error - Missing or invalid configuration, or an empty ruleset
pub const CONFIG_ERROR: i32 = 2;

/// Cancelled - Interrupted or past the configured timeout
pub const CANCELLED: i32 = 130;

/// Helper functions for consistent exit behavior
pub mod exit {
    use super::{CANCELLED, CONFIG_ERROR, CONVERSION_FAILED, SUCCESS};

    /// Exit with success code (0)
    pub fn success() -> ! {
        std::process::exit(SUCCESS);
    }

    /// Exit with conversion failure code (1)
    pub fn conversion_failed() -> ! {
        std::process::exit(CONVERSION_FAILED);
    }

    /// Exit with configuration error code (2)
    pub fn config_error() -> ! {
        std::process::exit(CONFIG_ERROR);
    }

    /// Exit with cancelled code (130)
    pub fn cancelled() -> ! {
        std::process::exit(CANCELLED);
    }
}
