//! `mlc rescan`: re-extraction over known rows, retrying failures

use mlc_core::config::Config;
use mlc_core::{CancelToken, ExtractSelector, Extractor};

use super::{build_context, finish, report_errors};
use crate::error::CliResult;

pub fn run(config: Config, cancel: &CancelToken) -> CliResult<()> {
    let ctx = build_context(config, cancel, true)?;

    let extract = Extractor::new(ctx).run(ExtractSelector::Rescan)?;
    println!(
        "Rescan: {} ok, {} failed, {} fields healed ({:.1?})",
        extract.extracted, extract.failed, extract.healed_fields, extract.duration
    );
    report_errors("rescan", &extract.errors);

    finish(extract.failed + extract.errors.count)
}
