//! `mlc show`: display planned actions

use mlc_core::config::Config;
use mlc_core::CancelToken;

use super::build_context;
use crate::error::CliResult;
use crate::output;

pub fn run(config: &Config, tree: bool, duplicates_only: bool, winners_only: bool) -> CliResult<()> {
    // Browsing never writes artifacts.
    let ctx = build_context(config.clone(), &CancelToken::new(), false)?;
    if tree {
        output::print_tree(&ctx, duplicates_only, winners_only)
    } else {
        output::print_plans(&ctx, duplicates_only, winners_only)
    }
}
