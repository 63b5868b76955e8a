//! Argument definitions and process setup shared by the command line tools.

use std::env;

use clap::{error::ErrorKind, Parser};
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit status for a malformed command line.
pub const USAGE_EXIT_CODE: i32 = -1;

/// Shift every aperture of a target list set's target table.
#[derive(Debug, Parser)]
#[command(name = "shift-apertures")]
pub struct ShiftAperturesArgs {
    /// Name of the target list set whose apertures move
    pub target_list_set_name: String,
    /// Pixels to add to each aperture's reference row and column
    #[arg(allow_negative_numbers = true)]
    pub shift_amount: i32,
}

/// Make one target list set the supplemental TAD run of another.
#[derive(Debug, Parser)]
#[command(name = "set-supplemental-target-list-set")]
pub struct SetSupplementalArgs {
    pub orig_tls_name: String,
    pub supp_tls_name: String,
}

/// Compare the target tables of two target list sets.
#[derive(Debug, Parser)]
#[command(name = "compare-target-tables")]
pub struct CompareTargetTablesArgs {
    pub old_tls_name: String,
    pub new_tls_name: String,
}

/// Exit status for a parse failure; help and version requests succeed.
pub fn exit_code_for(error: &clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => USAGE_EXIT_CODE,
    }
}

/// Parses the process arguments, printing usage and exiting on failure.
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(error) => {
            let code = exit_code_for(&error);
            if let Err(print_error) = error.print() {
                warn!("Failed to print usage: {}", print_error);
            }
            std::process::exit(code);
        }
    }
}

/// Installs the fmt subscriber; `RUST_LOG` sets the level (default INFO).
pub fn init_logging() {
    FmtSubscriber::builder()
        .with_max_level(
            env::var("RUST_LOG")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Level::INFO),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_amount_accepts_negative_values() {
        let args = ShiftAperturesArgs::try_parse_from(["shift-apertures", "q1-lc", "-2"]).unwrap();
        assert_eq!(args.target_list_set_name, "q1-lc");
        assert_eq!(args.shift_amount, -2);
    }

    #[test]
    fn test_missing_argument_is_usage_error() {
        let err = SetSupplementalArgs::try_parse_from(["set-supplemental-target-list-set", "orig"])
            .unwrap_err();
        assert_eq!(exit_code_for(&err), USAGE_EXIT_CODE);
    }

    #[test]
    fn test_non_numeric_shift_is_usage_error() {
        let err = ShiftAperturesArgs::try_parse_from(["shift-apertures", "q1-lc", "two"]).unwrap_err();
        assert_eq!(exit_code_for(&err), USAGE_EXIT_CODE);
    }

    #[test]
    fn test_help_is_not_an_error_exit() {
        let err = CompareTargetTablesArgs::try_parse_from(["compare-target-tables", "--help"])
            .unwrap_err();
        assert_eq!(exit_code_for(&err), 0);
    }
}
