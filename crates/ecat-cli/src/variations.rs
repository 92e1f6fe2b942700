//! Variation mesh maintenance commands.
//!
//! `audit` is read-only. `resync` runs each product in its own transaction,
//! re-run if Postgres aborts it, so with `--all` one failing product is
//! logged and skipped without undoing the others.

use std::collections::HashSet;

use clap::Args;
use ecat_core::{variations, CatalogError, GroupAudit, ProductId, SyncPolicy, SyncReport};
use ecat_db::{DbError, PgProductStore};

/// Which products a maintenance command covers.
#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct Target {
    /// Product id to operate on
    #[arg(long)]
    pub product: Option<ProductId>,
    /// Operate on every product
    #[arg(long)]
    pub all: bool,
}

async fn target_ids(pool: &sqlx::PgPool, target: &Target) -> anyhow::Result<Vec<ProductId>> {
    match target.product {
        Some(id) => Ok(vec![id]),
        None => Ok(ecat_db::list_product_ids(pool).await?),
    }
}

/// Print the audit of every variation group touched by `target`.
///
/// With `--all`, a group is audited once, from the first member listed.
///
/// # Errors
///
/// Returns an error if the product is not found or a query fails.
pub(crate) async fn run_audit(pool: &sqlx::PgPool, target: &Target) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    let mut groups = 0usize;
    let mut inconsistent = 0usize;

    for id in target_ids(pool, target).await? {
        if seen.contains(&id) {
            continue;
        }
        // read-only: the transaction is rolled back on drop
        let mut store = PgProductStore::begin(pool).await?;
        let audit = variations::audit_group(&mut store, id).await?;
        seen.extend(audit.members.iter().copied());

        groups += 1;
        if !audit.is_consistent() {
            inconsistent += 1;
        }
        for line in describe_audit(id, &audit) {
            println!("{line}");
        }
    }

    println!("{groups} group(s) audited, {inconsistent} inconsistent");
    Ok(())
}

/// Re-link each product in `target` with its current variation list.
///
/// # Errors
///
/// Returns an error if a single requested product fails, or if the product
/// list cannot be loaded. Per-product failures under `--all` are logged and
/// skipped.
pub(crate) async fn run_resync(
    pool: &sqlx::PgPool,
    target: &Target,
    policy: SyncPolicy,
) -> anyhow::Result<()> {
    let ids = target_ids(pool, target).await?;
    let mut totals = SyncReport::default();
    let mut failed = 0usize;

    for &id in &ids {
        match resync_one(pool, id, policy).await {
            Ok(report) => {
                tracing::debug!(product = %id, saved = report.saved, "resynced");
                totals.saved += report.saved;
                totals.skipped.extend(report.skipped);
            }
            Err(e) if target.all => {
                tracing::warn!(product = %id, error = %e, "resync failed; skipping");
                failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    println!(
        "resynced {} product(s): {} list(s) saved, {} dangling reference(s) dropped, {failed} failed",
        ids.len() - failed,
        totals.saved,
        totals.skipped.len(),
    );
    Ok(())
}

async fn resync_one(
    pool: &sqlx::PgPool,
    id: ProductId,
    policy: SyncPolicy,
) -> anyhow::Result<SyncReport> {
    let report = ecat_db::in_transaction(pool, policy.max_attempts, |mut store| async move {
        let report = variations::resync(&mut store, id, policy).await?;
        Ok::<_, CatalogError<DbError>>((store, report))
    })
    .await?;
    Ok(report)
}

/// Render one group's audit as printable lines.
pub(crate) fn describe_audit(start: ProductId, audit: &GroupAudit) -> Vec<String> {
    let status = if audit.is_consistent() {
        "consistent"
    } else {
        "INCONSISTENT"
    };
    let mut lines = vec![format!(
        "group of {start}: {} member(s), {status}",
        audit.members.len()
    )];
    lines.extend(
        audit
            .asymmetric
            .iter()
            .map(|(from, to)| format!("  asymmetric  {from} -> {to} (no link back)")),
    );
    lines.extend(
        audit
            .dangling
            .iter()
            .map(|(from, to)| format!("  dangling    {from} -> {to} (no such product)")),
    );
    lines
}
