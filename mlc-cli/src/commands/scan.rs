//! `mlc scan`: discovery plus extraction

use mlc_core::config::Config;
use mlc_core::{CancelToken, ExtractSelector, Extractor, Scanner};

use super::{build_context, finish, report_errors};
use crate::error::CliResult;

pub fn run(config: Config, cancel: &CancelToken) -> CliResult<()> {
    let ctx = build_context(config, cancel, true)?;

    let scan = Scanner::new(ctx.clone()).run()?;
    println!(
        "Scan: {} new files, {} already known ({:.1?})",
        scan.discovered, scan.already_known, scan.duration
    );
    report_errors("scan", &scan.errors);

    let extract = Extractor::new(ctx).run(ExtractSelector::Discovered)?;
    println!(
        "Extract: {} ok, {} failed, {} fields healed ({:.1?})",
        extract.extracted, extract.failed, extract.healed_fields, extract.duration
    );
    report_errors("extract", &extract.errors);

    finish(scan.errors.count + extract.failed + extract.errors.count)
}
