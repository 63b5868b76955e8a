//! Make one target list set the supplemental TAD run of another.
//!
//! ```bash
//! set-supplemental-target-list-set ORIG_TLS_NAME SUPP_TLS_NAME
//! ```
//!
//! Both target list sets must have target tables of the same observing
//! season. Exits with -1 on a usage error.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use kepler_tad::cli::{self, SetSupplementalArgs};
use kepler_tad::db;
use kepler_tad::tools::SupplementalTargetListSetSetter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::init_logging();
    let args: SetSupplementalArgs = cli::parse_or_exit();

    let repo = Arc::clone(db::init_repository().await?);
    let setter = SupplementalTargetListSetSetter::new(Arc::clone(&repo));

    db::run_in_transaction(repo.as_ref(), || {
        setter.set(&args.orig_tls_name, &args.supp_tls_name)
    })
    .await
    .with_context(|| {
        format!(
            "Failed to set {} as the supplemental target list set of {}",
            args.supp_tls_name, args.orig_tls_name
        )
    })?;

    info!("Done");
    Ok(())
}
