//! Shift every aperture of a target list set's target table.
//!
//! ```bash
//! shift-apertures TARGET_LIST_SET_NAME SHIFT_AMOUNT
//! ```
//!
//! Runs in one transaction against the repository chosen by
//! `repository.toml` or `DATABASE_URL`. Exits with -1 on a usage error.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use kepler_tad::cli::{self, ShiftAperturesArgs};
use kepler_tad::db;
use kepler_tad::tools::ApertureShifter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_logging();
    let args: ShiftAperturesArgs = cli::parse_or_exit();

    let repo = Arc::clone(db::init_repository().await?);
    let shifter = ApertureShifter::new(Arc::clone(&repo));

    let shifted = db::run_in_transaction(repo.as_ref(), || {
        shifter.shift(&args.target_list_set_name, args.shift_amount)
    })
    .await
    .with_context(|| format!("Failed to shift apertures of {}", args.target_list_set_name))?;

    info!("Shifted {} apertures", shifted);
    Ok(())
}
