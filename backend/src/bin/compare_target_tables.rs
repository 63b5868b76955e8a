//! Compare the target tables of two target list sets.
//!
//! ```bash
//! compare-target-tables OLD_TLS_NAME NEW_TLS_NAME
//! ```
//!
//! Differences are logged as warnings; the process fails only when the
//! tables cannot be compared. Exits with -1 on a usage error.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use kepler_tad::cli::{self, CompareTargetTablesArgs};
use kepler_tad::db;
use kepler_tad::tools::TargetTableComparator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_logging();
    let args: CompareTargetTablesArgs = cli::parse_or_exit();

    let repo = Arc::clone(db::init_repository().await?);
    let comparator = TargetTableComparator::new(Arc::clone(&repo));

    let report = db::run_in_transaction(repo.as_ref(), || {
        comparator.compare_target_list_sets(&args.old_tls_name, &args.new_tls_name)
    })
    .await
    .with_context(|| {
        format!(
            "Failed to compare {} with {}",
            args.old_tls_name, args.new_tls_name
        )
    })?;

    if report.is_clean() {
        info!("Target tables agree");
    } else {
        warn!(
            "{} clipped targets ({} pixels), {} missing and {} extra kepler ids",
            report.clipped_targets,
            report.clipped_pixels,
            report.missing_kepler_ids.len(),
            report.extra_kepler_ids.len()
        );
    }
    Ok(())
}
