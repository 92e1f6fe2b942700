//! Variation graph synchronization.
//!
//! Products that are variations of each other (same device, different RAM)
//! reference one another through their `variations` lists. There is no group
//! record: a group is the closure of those references, and the routines here
//! keep the lists in mutual agreement whenever a product is created, updated,
//! duplicated, or removed.
//!
//! Every change to a product other than the one being edited goes through
//! [`edit_variations`], a compare-and-swap loop on the product's `version`,
//! so two requests propagating into the same product cannot lose each
//! other's appends. Each append is preceded by an existence check, which
//! makes re-running any routine after a partial failure converge.
//!
//! Before touching any list, a routine locks every product it may write
//! with one [`lock_in_order`] call. Locks are always requested in ascending
//! id order, so overlapping writers queue instead of deadlocking.

use std::collections::{HashSet, VecDeque};

use crate::catalog::CatalogError;
use crate::products::{Product, ProductId, VariationRef};
use crate::store::ProductStore;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry bound for stale-version writes during propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub max_attempts: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl SyncPolicy {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// What a sync did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Variation targets that resolved and are now linked with the product.
    pub linked: Vec<ProductId>,
    /// Requested ids that did not resolve to a product.
    pub skipped: Vec<ProductId>,
    /// Products that lost their reference to the edited product.
    pub unlinked: Vec<ProductId>,
    /// Number of other products whose variation list was saved.
    pub saved: usize,
}

/// Consistency report for one variation group.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GroupAudit {
    /// Resolvable members reached from the starting product, in discovery order.
    pub members: Vec<ProductId>,
    /// `(a, b)`: `a` lists `b` but `b` does not list `a`.
    pub asymmetric: Vec<(ProductId, ProductId)>,
    /// `(a, b)`: `a` lists `b` but no product `b` exists.
    pub dangling: Vec<(ProductId, ProductId)>,
}

impl GroupAudit {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.asymmetric.is_empty() && self.dangling.is_empty()
    }
}

/// One entry of a product's variation list joined with the product it points at.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedVariation {
    pub edge: VariationRef,
    pub product: Product,
}

impl LinkedVariation {
    /// The label to display for the linked product.
    ///
    /// Always the linked product's own label; the text stored on the edge is
    /// an annotation and never used here.
    #[must_use]
    pub fn label(&self) -> &str {
        self.product.display_label()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edit {
    Missing,
    Unchanged,
    Saved,
}

/// Drop self references and repeated targets, keeping the first occurrence.
#[must_use]
pub fn normalize_requested(owner: ProductId, requested: &[VariationRef]) -> Vec<VariationRef> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .filter(|v| v.product != owner && seen.insert(v.product))
        .cloned()
        .collect()
}

/// Lock `ids` through the store, sorted and deduplicated.
///
/// # Errors
///
/// Returns [`CatalogError::Store`] if the store cannot take the locks.
pub async fn lock_in_order<S, I>(store: &mut S, ids: I) -> Result<(), CatalogError<S::Error>>
where
    S: ProductStore,
    I: IntoIterator<Item = ProductId>,
{
    let mut ids: Vec<ProductId> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    store.lock_products(&ids).await.map_err(CatalogError::Store)
}

/// Lock everything [`relink`] may write: `owner`, the requested targets, and
/// every product currently referencing `owner`.
///
/// # Errors
///
/// Returns [`CatalogError::Store`] on a store failure.
pub async fn lock_for_relink<S: ProductStore>(
    store: &mut S,
    owner: ProductId,
    requested: &[VariationRef],
) -> Result<(), CatalogError<S::Error>> {
    let referencing = store
        .find_referencing(owner)
        .await
        .map_err(CatalogError::Store)?;
    let ids: Vec<ProductId> = std::iter::once(owner)
        .chain(requested.iter().map(|v| v.product))
        .chain(referencing.iter().map(|p| p.id))
        .collect();
    lock_in_order(store, ids).await
}

/// Link `owner` with every requested target and every target with each other.
///
/// Targets that do not resolve are skipped. The owner's own list becomes the
/// resolved targets, keeping the per-edge text the client supplied; edges
/// added to the targets carry no text. The owner and every requested target
/// are locked before the first write.
///
/// # Errors
///
/// Returns [`CatalogError::NotFound`] if `owner` does not exist,
/// [`CatalogError::Contended`] if a product keeps changing under the sync,
/// or [`CatalogError::Store`] on a store failure.
pub async fn link<S: ProductStore>(
    store: &mut S,
    owner: ProductId,
    requested: &[VariationRef],
    policy: SyncPolicy,
) -> Result<SyncReport, CatalogError<S::Error>> {
    let wanted = normalize_requested(owner, requested);
    let lock_set: Vec<ProductId> = std::iter::once(owner)
        .chain(wanted.iter().map(|v| v.product))
        .collect();
    lock_in_order(store, lock_set).await?;
    let mut report = SyncReport::default();

    let mut resolved: Vec<VariationRef> = Vec::with_capacity(wanted.len());
    for edge in wanted {
        if store
            .find_by_id(edge.product)
            .await
            .map_err(CatalogError::Store)?
            .is_some()
        {
            resolved.push(edge);
        } else {
            tracing::warn!(%owner, target = %edge.product, "variation target not found; skipping");
            report.skipped.push(edge.product);
        }
    }

    let members: Vec<ProductId> = resolved.iter().map(|v| v.product).collect();
    for &target in &members {
        let peers = std::iter::once(owner).chain(members.iter().copied().filter(|&id| id != target));
        let wanted_peers: Vec<ProductId> = peers.collect();
        let outcome = edit_variations(store, target, policy, |list| {
            let mut dirty = false;
            for &peer in &wanted_peers {
                if !list.iter().any(|v| v.product == peer) {
                    list.push(VariationRef::bare(peer));
                    dirty = true;
                }
            }
            dirty
        })
        .await?;

        match outcome {
            Edit::Missing => {
                tracing::warn!(%owner, %target, "variation target vanished during sync; skipping");
                report.skipped.push(target);
            }
            Edit::Saved => {
                tracing::debug!(%owner, %target, "linked variation target");
                report.saved += 1;
                report.linked.push(target);
            }
            Edit::Unchanged => report.linked.push(target),
        }
    }

    resolved.retain(|v| report.linked.contains(&v.product));
    let outcome = edit_variations(store, owner, policy, |list| {
        if *list == resolved {
            false
        } else {
            list.clone_from(&resolved);
            true
        }
    })
    .await?;
    if outcome == Edit::Missing {
        return Err(CatalogError::NotFound(owner));
    }

    tracing::info!(
        %owner,
        linked = report.linked.len(),
        skipped = report.skipped.len(),
        saved = report.saved,
        "variation links synced"
    );
    Ok(report)
}

/// [`link`] for an edited product, then drop the owner from every product
/// that references it but is no longer in the requested list.
///
/// The previous link set is read from the store, not from the client.
///
/// # Errors
///
/// Same as [`link`].
pub async fn relink<S: ProductStore>(
    store: &mut S,
    owner: ProductId,
    requested: &[VariationRef],
    policy: SyncPolicy,
) -> Result<SyncReport, CatalogError<S::Error>> {
    lock_for_relink(store, owner, requested).await?;
    let mut report = link(store, owner, requested, policy).await?;

    let referencing = store
        .find_referencing(owner)
        .await
        .map_err(CatalogError::Store)?;
    for previous in referencing {
        if previous.id == owner || report.linked.contains(&previous.id) {
            continue;
        }
        let outcome = edit_variations(store, previous.id, policy, |list| {
            let before = list.len();
            list.retain(|v| v.product != owner);
            list.len() != before
        })
        .await?;
        if outcome == Edit::Saved {
            tracing::debug!(%owner, removed = %previous.id, "unlinked dropped variation");
            report.saved += 1;
            report.unlinked.push(previous.id);
        }
    }

    Ok(report)
}

/// Make `clone` a member of `source`'s whole variation group.
///
/// The group is `source` plus everything it lists. Each resolvable member
/// gains a reference to `clone`, and `clone`'s list becomes those members.
/// The group and `clone` are locked before the first write.
///
/// # Errors
///
/// Returns [`CatalogError::NotFound`] if `clone` does not exist, otherwise
/// same as [`link`].
pub async fn join_group<S: ProductStore>(
    store: &mut S,
    source: &Product,
    clone: ProductId,
    policy: SyncPolicy,
) -> Result<SyncReport, CatalogError<S::Error>> {
    let mut seen = HashSet::new();
    let group: Vec<ProductId> = std::iter::once(source.id)
        .chain(source.variation_ids())
        .filter(|&id| id != clone && seen.insert(id))
        .collect();
    lock_in_order(store, group.iter().copied().chain(std::iter::once(clone))).await?;

    let mut report = SyncReport::default();
    for member in group {
        let outcome = edit_variations(store, member, policy, |list| {
            if list.iter().any(|v| v.product == clone) {
                false
            } else {
                list.push(VariationRef::bare(clone));
                true
            }
        })
        .await?;
        match outcome {
            Edit::Missing => {
                tracing::warn!(%clone, %member, "group member not found; skipping");
                report.skipped.push(member);
            }
            Edit::Saved => {
                report.saved += 1;
                report.linked.push(member);
            }
            Edit::Unchanged => report.linked.push(member),
        }
    }

    let edges: Vec<VariationRef> = report.linked.iter().copied().map(VariationRef::bare).collect();
    let outcome = edit_variations(store, clone, policy, |list| {
        if *list == edges {
            false
        } else {
            list.clone_from(&edges);
            true
        }
    })
    .await?;
    if outcome == Edit::Missing {
        return Err(CatalogError::NotFound(clone));
    }

    tracing::info!(
        source = %source.id,
        %clone,
        members = report.linked.len(),
        "duplicate joined variation group"
    );
    Ok(report)
}

/// Re-run [`link`] for a product's current list, repairing its side of the mesh.
///
/// # Errors
///
/// Same as [`link`].
pub async fn resync<S: ProductStore>(
    store: &mut S,
    id: ProductId,
    policy: SyncPolicy,
) -> Result<SyncReport, CatalogError<S::Error>> {
    let product = store
        .find_by_id(id)
        .await
        .map_err(CatalogError::Store)?
        .ok_or(CatalogError::NotFound(id))?;
    link(store, id, &product.variations, policy).await
}

/// Resolve a product's variation list for display, in list order.
///
/// Entries whose target no longer exists are left out.
///
/// # Errors
///
/// Returns [`CatalogError::Store`] on a store failure.
pub async fn linked_variations<S: ProductStore>(
    store: &mut S,
    product: &Product,
) -> Result<Vec<LinkedVariation>, CatalogError<S::Error>> {
    let mut targets = Vec::with_capacity(product.variations.len());
    for id in product.variation_ids() {
        if let Some(target) = store.find_by_id(id).await.map_err(CatalogError::Store)? {
            targets.push(target);
        }
    }
    Ok(join_linked(product, targets))
}

/// Pair each entry of `product`'s list with its target from `targets`.
///
/// `targets` may arrive in any order; entries without a target are dropped.
#[must_use]
pub fn join_linked(product: &Product, mut targets: Vec<Product>) -> Vec<LinkedVariation> {
    let mut linked = Vec::with_capacity(product.variations.len());
    for edge in &product.variations {
        if let Some(pos) = targets.iter().position(|t| t.id == edge.product) {
            linked.push(LinkedVariation {
                edge: edge.clone(),
                product: targets.swap_remove(pos),
            });
        }
    }
    linked
}

/// Products reachable from `id` through variation references, `id` first.
///
/// # Errors
///
/// Returns [`CatalogError::NotFound`] if `id` does not exist or
/// [`CatalogError::Store`] on a store failure.
pub async fn variation_group<S: ProductStore>(
    store: &mut S,
    id: ProductId,
) -> Result<Vec<Product>, CatalogError<S::Error>> {
    let (members, _) = collect_group(store, id).await?;
    Ok(members)
}

/// Report asymmetric and dangling edges inside the group reachable from `id`.
///
/// # Errors
///
/// Same as [`variation_group`].
pub async fn audit_group<S: ProductStore>(
    store: &mut S,
    id: ProductId,
) -> Result<GroupAudit, CatalogError<S::Error>> {
    inspect_group(store, id).await.map(|(_, audit)| audit)
}

/// [`variation_group`] and [`audit_group`] from a single traversal.
///
/// # Errors
///
/// Same as [`variation_group`].
pub async fn inspect_group<S: ProductStore>(
    store: &mut S,
    id: ProductId,
) -> Result<(Vec<Product>, GroupAudit), CatalogError<S::Error>> {
    let (members, missing) = collect_group(store, id).await?;

    let mut audit = GroupAudit {
        members: members.iter().map(|p| p.id).collect(),
        ..GroupAudit::default()
    };
    for product in &members {
        for target in product.variation_ids() {
            if missing.contains(&target) {
                audit.dangling.push((product.id, target));
            } else if let Some(other) = members.iter().find(|m| m.id == target) {
                if !other.links_to(product.id) {
                    audit.asymmetric.push((product.id, target));
                }
            }
        }
    }
    Ok((members, audit))
}

async fn collect_group<S: ProductStore>(
    store: &mut S,
    id: ProductId,
) -> Result<(Vec<Product>, HashSet<ProductId>), CatalogError<S::Error>> {
    let mut visited = HashSet::from([id]);
    let mut queue = VecDeque::from([id]);
    let mut members = Vec::new();
    let mut missing = HashSet::new();

    while let Some(next) = queue.pop_front() {
        match store.find_by_id(next).await.map_err(CatalogError::Store)? {
            Some(product) => {
                for target in product.variation_ids() {
                    if visited.insert(target) {
                        queue.push_back(target);
                    }
                }
                members.push(product);
            }
            None if next == id => return Err(CatalogError::NotFound(id)),
            None => {
                missing.insert(next);
            }
        }
    }

    Ok((members, missing))
}

/// Read-modify-write one product's variation list under a version check.
///
/// `edit` returns `true` when it changed the list. A stale write re-reads
/// the product and re-applies `edit`, up to `policy.max_attempts` times.
async fn edit_variations<S, F>(
    store: &mut S,
    id: ProductId,
    policy: SyncPolicy,
    mut edit: F,
) -> Result<Edit, CatalogError<S::Error>>
where
    S: ProductStore,
    F: FnMut(&mut Vec<VariationRef>) -> bool + Send,
{
    for attempt in 1..=policy.max_attempts {
        let Some(product) = store.find_by_id(id).await.map_err(CatalogError::Store)? else {
            return Ok(Edit::Missing);
        };

        let mut list = product.variations;
        if !edit(&mut list) {
            return Ok(Edit::Unchanged);
        }

        match store
            .save_variations(id, product.version, &list)
            .await
            .map_err(CatalogError::Store)?
        {
            Some(_) => return Ok(Edit::Saved),
            None => {
                tracing::warn!(product = %id, attempt, "stale variation list; retrying");
            }
        }
    }

    Err(CatalogError::Contended(id))
}

#[cfg(test)]
#[path = "variations_test.rs"]
mod tests;
