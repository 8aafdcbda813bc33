//! Integration tests for token upserts and the change filter.

mod common;

use common::fixtures::*;
use common::{CatalogHandle, TestCatalog, run_catalog_test_both};
use tokencat_catalog::{CatalogError, Combinator, MergePolicy};
use tokencat_core::{Cataloged, TokenParams, TotalSupply};

#[tokio::test]
async fn test_new_token_gets_defaults() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        let rows = h
            .store
            .upsert_tokens(vec![named(key, "Alpha")], &upsert_at(0, 0))
            .await
            .expect("upsert failed");

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.contract_address_hash, key);
        assert_eq!(row.name.as_deref(), Some("Alpha"));
        assert_eq!(row.holder_count, Some(0));
        assert_eq!(row.cataloged, Cataloged::Unknown);
        assert_eq!(row.inserted_at, ts(0));
        assert_eq!(row.updated_at, ts(0));

        let stored = h.store.get_token(&key).await.unwrap().unwrap();
        assert_eq!(&stored, row);
    })
    .await;
}

#[tokio::test]
async fn test_full_record_round_trips() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        let mut candidate = TokenParams::new(key);
        candidate.name = Some("Wrapped Ether".to_string());
        candidate.symbol = Some("WETH".to_string());
        candidate.total_supply = Some(
            TotalSupply::parse("115792089237316195423570985008687907853269984665640564039457")
                .unwrap(),
        );
        candidate.decimals = Some(18);
        candidate.token_type = Some("ERC-20".to_string());
        candidate.cataloged = Cataloged::True;
        candidate.skip_metadata = Some(false);
        candidate.holder_count = Some(42);

        let rows = h
            .store
            .upsert_tokens(vec![candidate], &upsert_at(0, 0))
            .await
            .expect("upsert failed");

        let row = &rows[0];
        assert_eq!(
            row.total_supply.as_deref(),
            Some("115792089237316195423570985008687907853269984665640564039457")
        );
        assert_eq!(row.decimals, Some(18));
        assert_eq!(row.token_type.as_deref(), Some("ERC-20"));
        assert_eq!(row.cataloged, Cataloged::True);
        assert_eq!(row.skip_metadata, Some(false));
        assert_eq!(row.holder_count, Some(42));
    })
    .await;
}

#[tokio::test]
async fn test_upsert_is_idempotent() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let batch = vec![named(addr(1), "Alpha"), named(addr(2), "Beta")];

        let first = h
            .store
            .upsert_tokens(batch.clone(), &upsert_at(0, 0))
            .await
            .unwrap();
        let second = h
            .store
            .upsert_tokens(batch, &upsert_at(1, 5))
            .await
            .unwrap();

        // The write guard skips unchanged rows, so their timestamps stay put.
        assert_eq!(first, second);
        assert_eq!(second[0].updated_at, ts(0));
    })
    .await;
}

#[tokio::test]
async fn test_coalesce_keeps_stored_values() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        h.store
            .upsert_tokens(vec![named(key, "Foo")], &upsert_at(0, 0))
            .await
            .unwrap();

        let mut candidate = TokenParams::new(key);
        candidate.symbol = Some("BAR".to_string());
        let rows = h
            .store
            .upsert_tokens(vec![candidate], &upsert_at(1, 1))
            .await
            .unwrap();

        assert_eq!(rows[0].name.as_deref(), Some("Foo"));
        assert_eq!(rows[0].symbol.as_deref(), Some("BAR"));
        assert_eq!(rows[0].updated_at, ts(1));

        let rows = h
            .store
            .upsert_tokens(vec![named(key, "Renamed")], &upsert_at(2, 2))
            .await
            .unwrap();
        assert_eq!(rows[0].name.as_deref(), Some("Renamed"));
        assert_eq!(rows[0].symbol.as_deref(), Some("BAR"));
    })
    .await;
}

#[tokio::test]
async fn test_timestamps_take_earliest_insert_and_latest_update() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        h.store
            .upsert_tokens(vec![named(key, "One")], &upsert_at(10, 20))
            .await
            .unwrap();

        let rows = h
            .store
            .upsert_tokens(vec![named(key, "Two")], &upsert_at(5, 30))
            .await
            .unwrap();
        assert_eq!(rows[0].inserted_at, ts(5));
        assert_eq!(rows[0].updated_at, ts(30));

        // A late-arriving older batch never moves timestamps backwards.
        let rows = h
            .store
            .upsert_tokens(vec![named(key, "Three")], &upsert_at(15, 25))
            .await
            .unwrap();
        assert_eq!(rows[0].name.as_deref(), Some("Three"));
        assert_eq!(rows[0].inserted_at, ts(5));
        assert_eq!(rows[0].updated_at, ts(30));
    })
    .await;
}

#[tokio::test]
async fn test_upsert_never_touches_existing_holder_count() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        h.store
            .upsert_tokens(vec![counted(key, 5)], &upsert_at(0, 0))
            .await
            .unwrap();

        let mut candidate = named(key, "Renamed");
        candidate.holder_count = Some(99);
        let rows = h
            .store
            .upsert_tokens(vec![candidate], &upsert_at(1, 1))
            .await
            .unwrap();
        assert_eq!(rows[0].name.as_deref(), Some("Renamed"));
        assert_eq!(rows[0].holder_count, Some(5));

        // An uninitialized counter stays uninitialized.
        h.pool.set_holder_count(key, None).await;
        let rows = h
            .store
            .upsert_tokens(vec![named(key, "Again")], &upsert_at(2, 2))
            .await
            .unwrap();
        assert_eq!(rows[0].holder_count, None);
    })
    .await;
}

#[tokio::test]
async fn test_returns_every_key_sorted() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        h.store
            .upsert_tokens(vec![counted(addr(2), 7)], &upsert_at(0, 0))
            .await
            .unwrap();

        // addr(2) is unchanged and skipped by the write, but still reported.
        let batch = vec![counted(addr(3), 3), counted(addr(2), 7), counted(addr(1), 1)];
        let rows = h
            .store
            .upsert_tokens(batch, &upsert_at(1, 1))
            .await
            .unwrap();

        let keys: Vec<_> = rows.iter().map(|r| r.contract_address_hash).collect();
        assert_eq!(keys, vec![addr(1), addr(2), addr(3)]);
        let counts: Vec<_> = rows.iter().map(|r| r.holder_count).collect();
        assert_eq!(counts, vec![Some(1), Some(7), Some(3)]);
        assert_eq!(rows[1].updated_at, ts(0));
    })
    .await;
}

#[tokio::test]
async fn test_duplicate_keys_rejected_without_side_effects() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let batch = vec![
            named(addr(2), "Other"),
            named(addr(1), "First"),
            named(addr(1), "Second"),
        ];

        match h.store.upsert_tokens(batch, &upsert_at(0, 0)).await {
            Err(CatalogError::DuplicateKey(key)) => assert_eq!(key, addr(1)),
            other => panic!("expected duplicate key error, got {other:?}"),
        }

        assert!(h.store.get_token(&addr(1)).await.unwrap().is_none());
        assert!(h.store.get_token(&addr(2)).await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_invalid_candidate_rejected_with_key() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let mut bad = TokenParams::new(addr(9));
        bad.decimals = Some(300);
        let batch = vec![named(addr(1), "Fine"), bad];

        match h.store.upsert_tokens(batch, &upsert_at(0, 0)).await {
            Err(CatalogError::Validation { key, message }) => {
                assert_eq!(key, Some(addr(9)));
                assert!(message.contains("decimals"), "{message}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        assert!(h.store.get_token(&addr(1)).await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_empty_batch_is_noop() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let rows = h
            .store
            .upsert_tokens(Vec::new(), &upsert_at(0, 0))
            .await
            .unwrap();
        assert!(rows.is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_known_false_replaces_unknown_cataloged() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        h.store
            .upsert_tokens(vec![named(key, "Alpha")], &upsert_at(0, 0))
            .await
            .unwrap();

        let mut candidate = TokenParams::new(key);
        candidate.cataloged = Cataloged::False;
        let rows = h
            .store
            .upsert_tokens(vec![candidate], &upsert_at(1, 1))
            .await
            .unwrap();
        assert_eq!(rows[0].cataloged, Cataloged::False);
        assert_eq!(rows[0].updated_at, ts(1));

        // Unknown carries no opinion and leaves the stored flag alone.
        let rows = h
            .store
            .upsert_tokens(vec![TokenParams::new(key)], &upsert_at(2, 2))
            .await
            .unwrap();
        assert_eq!(rows[0].cataloged, Cataloged::False);
        assert_eq!(rows[0].updated_at, ts(1));
    })
    .await;
}

#[tokio::test]
async fn test_bridged_requires_extended_field_set() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let mut candidate = named(addr(1), "Bridged");
        candidate.bridged = Some(true);

        let rows = h
            .store
            .upsert_tokens(vec![candidate.clone()], &upsert_at(0, 0))
            .await
            .unwrap();
        assert_eq!(rows[0].bridged, None);

        let rows = h
            .store
            .upsert_tokens(vec![candidate], &extended_upsert_at(1, 1))
            .await
            .unwrap();
        assert_eq!(rows[0].bridged, Some(true));
        assert_eq!(rows[0].updated_at, ts(1));
    })
    .await;
}

#[tokio::test]
async fn test_custom_policy_keeps_existing_values() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let key = addr(1);
        h.store
            .upsert_tokens(vec![named(key, "Original")], &upsert_at(0, 0))
            .await
            .unwrap();

        let policy = MergePolicy::custom([
            ("name", Combinator::KeepExisting),
            ("symbol", Combinator::KeepExisting),
        ])
        .unwrap();

        let mut candidate = named(key, "Replacement");
        candidate.symbol = Some("ORIG".to_string());
        candidate.decimals = Some(6);
        let rows = h
            .store
            .upsert_tokens(vec![candidate], &upsert_at(1, 1).with_policy(policy))
            .await
            .unwrap();

        assert_eq!(rows[0].name.as_deref(), Some("Original"));
        assert_eq!(rows[0].symbol.as_deref(), Some("ORIG"));
        // Fields outside the custom policy are not written.
        assert_eq!(rows[0].decimals, None);
        assert_eq!(rows[0].updated_at, ts(1));
    })
    .await;
}

#[tokio::test]
async fn test_batch_split_across_statements() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        let mut options = upsert_at(0, 0);
        options.max_batch_rows = 2;

        let batch: Vec<_> = (1..=7u8)
            .rev()
            .map(|n| counted(addr(n), i64::from(n)))
            .collect();
        let rows = h.store.upsert_tokens(batch, &options).await.unwrap();

        assert_eq!(rows.len(), 7);
        for (i, row) in rows.iter().enumerate() {
            let n = i as u8 + 1;
            assert_eq!(row.contract_address_hash, addr(n));
            assert_eq!(row.holder_count, Some(i64::from(n)));
        }
    })
    .await;
}

#[tokio::test]
async fn test_filter_changed_tokens() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        h.store
            .upsert_tokens(
                vec![named(addr(1), "Same"), named(addr(2), "Old")],
                &upsert_at(0, 0),
            )
            .await
            .unwrap();

        let candidates = vec![
            named(addr(3), "New"),
            named(addr(2), "Changed"),
            named(addr(1), "Same"),
            TokenParams::new(addr(2)),
        ];
        let kept = h
            .store
            .filter_changed_tokens(candidates, &MergePolicy::default())
            .await
            .unwrap();

        let kept: Vec<_> = kept
            .iter()
            .map(|c| (c.contract_address_hash, c.name.clone()))
            .collect();
        assert_eq!(
            kept,
            vec![
                (addr(3), Some("New".to_string())),
                (addr(2), Some("Changed".to_string())),
            ]
        );
    })
    .await;
}

#[tokio::test]
async fn test_get_tokens_batch_returns_existing_only() {
    run_catalog_test_both(|h: CatalogHandle| async move {
        h.store
            .upsert_tokens(
                vec![named(addr(1), "One"), named(addr(3), "Three")],
                &upsert_at(0, 0),
            )
            .await
            .unwrap();

        let found = h
            .store
            .get_tokens_batch(&[addr(1), addr(2), addr(3)])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&addr(3)].name.as_deref(), Some("Three"));
        assert!(!found.contains_key(&addr(2)));

        assert!(h.store.get_tokens_batch(&[]).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_sqlite_lookup_splits_large_key_sets() {
    let catalog = TestCatalog::new().await.unwrap();
    let store = catalog.store();

    let keys: Vec<_> = (0..2_000).map(|_| unique_addr()).collect();
    let batch: Vec<_> = keys.iter().map(|k| TokenParams::new(*k)).collect();
    store.upsert_tokens(batch, &upsert_at(0, 0)).await.unwrap();

    let found = store.get_tokens_batch(&keys).await.unwrap();
    assert_eq!(found.len(), keys.len());
}

#[tokio::test]
async fn test_sqlite_upsert_times_out_behind_writer() {
    let catalog = TestCatalog::new().await.unwrap();
    let store = catalog.store();
    store
        .upsert_tokens(vec![named(addr(1), "Held")], &upsert_at(0, 0))
        .await
        .unwrap();

    // Hold the only connection inside an open write transaction.
    let mut tx = catalog.pool().begin().await.unwrap();
    sqlx::query("UPDATE tokens SET name = 'Locked'")
        .execute(&mut *tx)
        .await
        .unwrap();

    let options = upsert_at(1, 1).with_timeout(SHORT_TIMEOUT);
    match store
        .upsert_tokens(vec![named(addr(1), "Blocked")], &options)
        .await
    {
        Err(err @ CatalogError::LockTimeout { .. }) => assert!(err.is_retryable()),
        other => panic!("expected lock timeout, got {other:?}"),
    }

    tx.rollback().await.unwrap();
    let row = store.get_token(&addr(1)).await.unwrap().unwrap();
    assert_eq!(row.name.as_deref(), Some("Held"));
}
