//! Live integration tests for ecat-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/ecat-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use ecat_core::catalog::{create_product, delete_product, duplicate_product, update_product};
use ecat_core::variations::{audit_group, link};
use ecat_core::{
    CatalogError, Product, ProductId, ProductInput, ProductPatch, ProductStore, SyncPolicy,
    VariationRef,
};
use ecat_db::{
    get_product, get_products_by_ids, in_transaction, list_product_ids, list_products, DbError,
    PgProductStore,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn input(name: &str, variations: &[ProductId]) -> ProductInput {
    ProductInput {
        name: name.to_string(),
        parent_category: "phones".to_string(),
        variations: variations.iter().copied().map(VariationRef::bare).collect(),
        ..ProductInput::default()
    }
}

/// Create and commit one product, returning it.
async fn create_committed(pool: &sqlx::PgPool, name: &str, variations: &[ProductId]) -> Product {
    let mut store = PgProductStore::begin(pool).await.expect("begin");
    let (product, _) = create_product(&mut store, input(name, variations), SyncPolicy::default())
        .await
        .unwrap_or_else(|e| panic!("create {name} failed: {e}"));
    store.commit().await.expect("commit");
    product
}

async fn linked_ids(pool: &sqlx::PgPool, id: ProductId) -> Vec<ProductId> {
    get_product(pool, id)
        .await
        .expect("get_product failed")
        .unwrap_or_else(|| panic!("product {id} missing"))
        .variation_ids()
        .collect()
}

/// Create one product in its own transaction, without retries.
async fn create_in_own_transaction(
    pool: sqlx::PgPool,
    name: String,
    variations: Vec<ProductId>,
) -> Result<Product, CatalogError<DbError>> {
    let mut store = PgProductStore::begin(&pool)
        .await
        .map_err(CatalogError::Store)?;
    let (product, _) =
        create_product(&mut store, input(&name, &variations), SyncPolicy::default()).await?;
    store.commit().await.map_err(CatalogError::Store)?;
    Ok(product)
}

/// A real SQLSTATE 40001 error from the server.
async fn serialization_failure(pool: &sqlx::PgPool) -> DbError {
    sqlx::query("DO $$ BEGIN RAISE EXCEPTION 'forced' USING ERRCODE = '40001'; END $$")
        .execute(pool)
        .await
        .map(|_| ())
        .expect_err("statement must raise")
        .into()
}

// ---------------------------------------------------------------------------
// Section 1: Store primitives
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn insert_starts_with_empty_list_and_version_one(pool: sqlx::PgPool) {
    let product = create_committed(&pool, "Pixel 9", &[]).await;

    assert_eq!(product.slug, "pixel-9");
    assert!(product.variations.is_empty());
    assert_eq!(product.version, 1);
    assert!(product.attributes.is_object());
}

#[sqlx::test(migrations = "../../migrations")]
async fn save_variations_is_a_compare_and_swap(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let b = create_committed(&pool, "B", &[]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let edges = vec![VariationRef::bare(b.id)];
    let next = store
        .save_variations(a.id, a.version, &edges)
        .await
        .expect("save");
    assert_eq!(next, Some(a.version + 1));

    let stale = store
        .save_variations(a.id, a.version, &[])
        .await
        .expect("save");
    assert_eq!(stale, None, "stale version must not write");
    store.commit().await.expect("commit");

    assert_eq!(linked_ids(&pool, a.id).await, vec![b.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn find_referencing_matches_only_products_listing_the_id(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let b = create_committed(&pool, "B", &[a.id]).await;
    let c = create_committed(&pool, "C", &[]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let referencing = store.find_referencing(a.id).await.expect("query");
    let ids: Vec<ProductId> = referencing.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![b.id]);
    assert!(store
        .find_referencing(c.id)
        .await
        .expect("query")
        .is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn remove_references_to_keeps_other_entries_in_order(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let b = create_committed(&pool, "B", &[]).await;
    let c = create_committed(&pool, "C", &[]).await;
    let d = create_committed(&pool, "D", &[a.id, b.id, c.id]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let changed = store.remove_references_to(b.id).await.expect("update");
    store.commit().await.expect("commit");

    // D, A and C each listed B
    assert_eq!(changed, 3);
    assert_eq!(linked_ids(&pool, d.id).await, vec![a.id, c.id]);
    assert_eq!(linked_ids(&pool, a.id).await, vec![d.id, c.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_slug_is_a_unique_violation(pool: sqlx::PgPool) {
    create_committed(&pool, "Pixel 9", &[]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let err = create_product(&mut store, input("Pixel 9", &[]), SyncPolicy::default())
        .await
        .expect_err("slug must be unique");
    match err {
        CatalogError::Store(db) => assert!(db.is_unique_violation(), "unexpected: {db}"),
        other => panic!("expected store error, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn absent_skus_do_not_collide(pool: sqlx::PgPool) {
    create_committed(&pool, "A", &[]).await;
    create_committed(&pool, "B", &[]).await;

    let ids = list_product_ids(&pool).await.expect("list ids");
    assert_eq!(ids.len(), 2);
}

// ---------------------------------------------------------------------------
// Section 2: Variation sync against Postgres
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn create_meshes_targets_and_skips_missing_ids(pool: sqlx::PgPool) {
    let b = create_committed(&pool, "B", &[]).await;
    let c = create_committed(&pool, "C", &[]).await;
    let ghost = ProductId::new();

    let d = create_committed(&pool, "D", &[b.id, ghost, c.id]).await;

    assert_eq!(d.variation_ids().collect::<Vec<_>>(), vec![b.id, c.id]);
    assert_eq!(linked_ids(&pool, b.id).await, vec![d.id, c.id]);
    assert_eq!(linked_ids(&pool, c.id).await, vec![d.id, b.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn update_drops_only_the_removed_pair(pool: sqlx::PgPool) {
    let b = create_committed(&pool, "B", &[]).await;
    let c = create_committed(&pool, "C", &[]).await;
    let d = create_committed(&pool, "D", &[b.id, c.id]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let patch = ProductPatch {
        variations: Some(vec![VariationRef::bare(b.id)]),
        ..ProductPatch::default()
    };
    update_product(&mut store, d.id, patch, SyncPolicy::default())
        .await
        .expect("update");
    store.commit().await.expect("commit");

    assert_eq!(linked_ids(&pool, d.id).await, vec![b.id]);
    assert_eq!(linked_ids(&pool, c.id).await, vec![b.id]);
    assert_eq!(linked_ids(&pool, b.id).await, vec![d.id, c.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn sparse_update_clears_nullable_fields_only_when_asked(pool: sqlx::PgPool) {
    let mut raw = input("Pixel 9", &[]);
    raw.sku = Some("PX9".to_string());
    raw.image = Some("/img/px9.png".to_string());
    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let (product, _) = create_product(&mut store, raw, SyncPolicy::default())
        .await
        .expect("create");

    let patch = ProductPatch {
        sku: Some(None),
        featured: Some(true),
        ..ProductPatch::default()
    };
    let (updated, report) = update_product(&mut store, product.id, patch, SyncPolicy::default())
        .await
        .expect("update");
    store.commit().await.expect("commit");

    assert!(report.is_none());
    assert!(updated.sku.is_none());
    assert_eq!(updated.image.as_deref(), Some("/img/px9.png"));
    assert!(updated.featured);
    assert_eq!(updated.name, "Pixel 9");
    assert!(updated.version > product.version);
}

#[sqlx::test(migrations = "../../migrations")]
async fn duplicate_joins_every_group_member(pool: sqlx::PgPool) {
    let b = create_committed(&pool, "B", &[]).await;
    let s = create_committed(&pool, "S", &[b.id]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let (clone, _) = duplicate_product(&mut store, s.id, SyncPolicy::default())
        .await
        .expect("duplicate");
    store.commit().await.expect("commit");

    assert!(clone.slug.starts_with("s-copy-"));
    assert!(!clone.is_active);
    assert_eq!(clone.variation_ids().collect::<Vec<_>>(), vec![s.id, b.id]);
    assert_eq!(linked_ids(&pool, s.id).await, vec![b.id, clone.id]);
    assert_eq!(linked_ids(&pool, b.id).await, vec![s.id, clone.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn delete_detaches_references_before_removing_row(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let c = create_committed(&pool, "C", &[a.id]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let detached = delete_product(&mut store, c.id).await.expect("delete");
    store.commit().await.expect("commit");

    assert_eq!(detached, 1);
    assert!(get_product(&pool, c.id).await.expect("get").is_none());
    assert!(linked_ids(&pool, a.id).await.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn dropped_store_rolls_back_the_whole_sync(pool: sqlx::PgPool) {
    let b = create_committed(&pool, "B", &[]).await;

    {
        let mut store = PgProductStore::begin(&pool).await.expect("begin");
        create_product(&mut store, input("D", &[b.id]), SyncPolicy::default())
            .await
            .expect("create");
        // dropped without commit
    }

    assert!(linked_ids(&pool, b.id).await.is_empty());
    assert_eq!(list_products(&pool, 50).await.expect("list").len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn audit_flags_hand_edited_asymmetry(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let b = create_committed(&pool, "B", &[]).await;
    sqlx::query("UPDATE products SET variations = $2 WHERE id = $1")
        .bind(a.id.as_uuid())
        .bind(serde_json::json!([{ "product": b.id.to_string(), "variationText": "" }]))
        .execute(&pool)
        .await
        .expect("hand edit");

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    let audit = audit_group(&mut store, a.id).await.expect("audit");
    assert_eq!(audit.asymmetric, vec![(a.id, b.id)]);

    let requested = vec![VariationRef::bare(b.id)];
    link(&mut store, a.id, &requested, SyncPolicy::default())
        .await
        .expect("resync");
    assert!(audit_group(&mut store, a.id)
        .await
        .expect("audit")
        .is_consistent());
    store.commit().await.expect("commit");
}

#[sqlx::test(migrations = "../../migrations")]
async fn get_products_by_ids_returns_only_existing_rows(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let b = create_committed(&pool, "B", &[]).await;

    let mut found = get_products_by_ids(&pool, &[a.id, ProductId::new(), b.id])
        .await
        .expect("query");
    found.sort_by_key(|p| p.name.clone());
    let names: Vec<&str> = found.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);

    assert!(get_products_by_ids(&pool, &[])
        .await
        .expect("query")
        .is_empty());
}

// ---------------------------------------------------------------------------
// Section 3: Concurrent writers
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn lock_products_ignores_unknown_ids_and_empty_sets(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;

    let mut store = PgProductStore::begin(&pool).await.expect("begin");
    store.lock_products(&[]).await.expect("empty lock set");
    let mut ids = vec![a.id, ProductId::new()];
    ids.sort_unstable();
    store.lock_products(&ids).await.expect("lock");
    store.commit().await.expect("commit");
}

#[sqlx::test(migrations = "../../migrations")]
async fn locked_products_block_other_writers_until_commit(pool: sqlx::PgPool) {
    let a = create_committed(&pool, "A", &[]).await;
    let b = create_committed(&pool, "B", &[]).await;

    let mut holder = PgProductStore::begin(&pool).await.expect("begin");
    let mut ids = vec![a.id, b.id];
    ids.sort_unstable();
    holder.lock_products(&ids).await.expect("lock");

    let writer = tokio::spawn({
        let pool = pool.clone();
        async move {
            let mut store = PgProductStore::begin(&pool).await.expect("begin");
            let saved = store
                .save_variations(b.id, b.version, &[VariationRef::bare(a.id)])
                .await
                .expect("save");
            store.commit().await.expect("commit");
            saved
        }
    });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!writer.is_finished(), "writer must wait for the lock");

    holder.commit().await.expect("commit");
    let saved = writer.await.expect("writer task");
    assert_eq!(saved, Some(b.version + 1));
}

#[sqlx::test(migrations = "../../migrations")]
async fn concurrent_creates_with_opposite_target_order_both_commit(pool: sqlx::PgPool) {
    let b = create_committed(&pool, "B", &[]).await;
    let c = create_committed(&pool, "C", &[]).await;

    let mut created = Vec::new();
    for round in 0..20 {
        let forward = tokio::spawn(create_in_own_transaction(
            pool.clone(),
            format!("Forward {round}"),
            vec![b.id, c.id],
        ));
        let backward = tokio::spawn(create_in_own_transaction(
            pool.clone(),
            format!("Backward {round}"),
            vec![c.id, b.id],
        ));
        for task in [forward, backward] {
            let product = task
                .await
                .expect("create task")
                .unwrap_or_else(|e| panic!("round {round}: {e}"));
            created.push(product.id);
        }
    }

    // every append survived on both shared targets
    for (target, peer) in [(b.id, c.id), (c.id, b.id)] {
        let linked = linked_ids(&pool, target).await;
        assert_eq!(linked.len(), created.len() + 1, "target {target}");
        assert!(linked.contains(&peer));
        for id in &created {
            assert!(linked.contains(id), "{target} lost the link to {id}");
        }
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn concurrent_updates_into_one_target_keep_both_links(pool: sqlx::PgPool) {
    let target_id = create_committed(&pool, "Target", &[]).await.id;
    let x = create_committed(&pool, "X", &[]).await;
    let y = create_committed(&pool, "Y", &[]).await;

    let relink = |id: ProductId| {
        let pool = pool.clone();
        async move {
            in_transaction(&pool, SyncPolicy::default().max_attempts, |mut store| async move {
                let patch = ProductPatch {
                    variations: Some(vec![VariationRef::bare(target_id)]),
                    ..ProductPatch::default()
                };
                let (product, _) =
                    update_product(&mut store, id, patch, SyncPolicy::default()).await?;
                Ok::<_, CatalogError<DbError>>((store, product))
            })
            .await
        }
    };
    let (from_x, from_y) = tokio::join!(tokio::spawn(relink(x.id)), tokio::spawn(relink(y.id)));
    from_x.expect("task").expect("update x");
    from_y.expect("task").expect("update y");

    let mut linked = linked_ids(&pool, target_id).await;
    linked.sort_unstable();
    let mut expected = vec![x.id, y.id];
    expected.sort_unstable();
    assert_eq!(linked, expected);
}

#[sqlx::test(migrations = "../../migrations")]
async fn in_transaction_reruns_after_serialization_failure(pool: sqlx::PgPool) {
    let mut runs = 0u32;
    let product = in_transaction(&pool, 3, |mut store| {
        runs += 1;
        let first = runs == 1;
        let pool = pool.clone();
        async move {
            let (product, _) =
                create_product(&mut store, input("Pixel 9", &[]), SyncPolicy::default()).await?;
            if first {
                return Err(CatalogError::Store(serialization_failure(&pool).await));
            }
            Ok::<_, CatalogError<DbError>>((store, product))
        }
    })
    .await
    .expect("second run commits");

    assert_eq!(runs, 2);
    // the first run's insert was rolled back, so the slug was free again
    assert_eq!(list_product_ids(&pool).await.expect("ids"), vec![product.id]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn in_transaction_gives_up_after_max_attempts(pool: sqlx::PgPool) {
    let mut runs = 0u32;
    let err = in_transaction(&pool, 2, |_store| {
        runs += 1;
        let pool = pool.clone();
        async move {
            Err::<(PgProductStore, ()), _>(CatalogError::Store(serialization_failure(&pool).await))
        }
    })
    .await
    .expect_err("retries exhausted");

    assert_eq!(runs, 2);
    assert!(matches!(err, CatalogError::Store(ref e) if e.is_retryable()));
}

#[sqlx::test(migrations = "../../migrations")]
async fn in_transaction_does_not_retry_other_errors(pool: sqlx::PgPool) {
    let missing = ProductId::new();
    let mut runs = 0u32;
    let err = in_transaction(&pool, 3, |mut store| {
        runs += 1;
        async move {
            let deleted = delete_product(&mut store, missing).await?;
            Ok::<_, CatalogError<DbError>>((store, deleted))
        }
    })
    .await
    .expect_err("unknown product");

    assert_eq!(runs, 1);
    assert!(matches!(err, CatalogError::NotFound(id) if id == missing));
}
