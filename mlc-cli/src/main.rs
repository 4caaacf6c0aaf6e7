//! MLC - music library cleaner
//!
//! Thin binary wrapper: parse, dispatch, map errors onto the exit-code
//! contract (0 success, 1 usage, 2 completed-with-errors, 3 fatal).

mod cli;
mod commands;
mod error;
mod output;
mod settings;

use std::process::ExitCode;

fn main() -> ExitCode {
    match cli::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mlc: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}
