//! `mlc execute`: materialize the plan

use mlc_core::config::Config;
use mlc_core::{CancelToken, Executor};

use super::{build_context, finish, report_errors};
use crate::error::{CliError, CliResult};

pub fn run(config: Config, cancel: &CancelToken) -> CliResult<()> {
    let ctx = build_context(config, cancel, true)?;

    let summary = Executor::new(ctx).run()?;
    println!(
        "Execute: {} files, {} failed, {} bytes written ({:.1?})",
        summary.executed, summary.failed, summary.bytes_written, summary.duration
    );
    report_errors("execute", &summary.errors);

    if summary.aborted && !cancel.is_cancelled() {
        return Err(CliError::Fatal(
            "execution aborted: destination is full".to_string(),
        ));
    }
    finish(summary.failed)
}
