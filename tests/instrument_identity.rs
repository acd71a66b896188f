mod common;

use chrono::{Duration, TimeZone, Utc};
use gtnet::domain::context::ActorContext;
use gtnet::domain::import::AdvertisedInstrument;
use gtnet::domain::instrument::InstrumentKey;
use gtnet::domain::price::{PriceMergeReport, PriceObservation};
use gtnet::domain::repositories::LocalEntityRepository;
use rust_decimal::Decimal;
use std::collections::HashSet;

fn tuple(isin: &str, currency: &str) -> (String, String) {
    (isin.to_string(), currency.to_string())
}

#[tokio::test]
async fn test_find_or_create_is_idempotent_and_normalizes() {
    let services = common::services().await;
    let pool = &services.instruments;

    let first = pool.find_or_create_security("ch0012032048", "chf").await.unwrap();
    let second = pool.find_or_create_security(" CH0012032048 ", "CHF").await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(
        first.key,
        InstrumentKey::security("CH0012032048", "CHF").unwrap()
    );

    let other_currency = pool.find_or_create_security("CH0012032048", "EUR").await.unwrap();
    assert_ne!(first.id, other_currency.id);
}

#[tokio::test]
async fn test_invalid_keys_are_rejected() {
    let services = common::services().await;
    assert!(services.instruments.find_or_create_security("", "CHF").await.is_err());
    assert!(services.instruments.find_or_create_security("CH0012032048", "CH").await.is_err());
    assert!(services.instruments.find_or_create_currency_pair("EUR", "C1F").await.is_err());
}

#[tokio::test]
async fn test_batched_tuple_lookup_is_exact() {
    let services = common::services().await;
    let pool = &services.instruments;

    let a = pool.find_or_create_security("US0000001", "USD").await.unwrap();
    pool.find_or_create_security("US0000001", "EUR").await.unwrap();
    let b = pool.find_or_create_security("US0000002", "EUR").await.unwrap();
    pool.find_or_create_security("US0000002", "USD").await.unwrap();

    // Cross combinations of the requested ISINs and currencies must not match
    let found = pool
        .find_by_isin_currency_tuples(&[tuple("US0000001", "USD"), tuple("US0000002", "EUR")])
        .await
        .unwrap();
    let ids: HashSet<i64> = found.iter().map(|i| i.id).collect();
    assert_eq!(ids, HashSet::from([a.id, b.id]));

    assert!(pool.find_by_isin_currency_tuples(&[]).await.unwrap().is_empty());
    assert!(
        pool.find_by_isin_currency_tuples(&[tuple("US0000003", "USD")])
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_currency_pair_lookup_respects_direction() {
    let services = common::services().await;
    let pool = &services.instruments;

    let eur_chf = pool.find_or_create_currency_pair("EUR", "CHF").await.unwrap();
    let chf_eur = pool.find_or_create_currency_pair("CHF", "EUR").await.unwrap();
    assert_ne!(eur_chf.id, chf_eur.id);

    let found = pool
        .find_by_currency_tuples(&[tuple("EUR", "CHF")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, eur_chf.id);
}

#[tokio::test]
async fn test_locality_follows_local_securities() {
    let services = common::services().await;
    let local = &services.persistence.local_entity_repository;

    let instrument = services
        .instruments
        .find_or_create_security("CH0012032048", "CHF")
        .await
        .unwrap();
    assert!(!instrument.is_local());

    let security = local
        .save_security("CH0012032048", "CHF", "Roche Holding")
        .await
        .unwrap();
    let reread = services.instruments.get(instrument.id).await.unwrap().unwrap();
    assert_eq!(reread.local_id, Some(security.id));

    local.delete_security(security.id).await.unwrap();
    let reread = services.instruments.get(instrument.id).await.unwrap().unwrap();
    assert!(!reread.is_local());
}

#[tokio::test]
async fn test_local_currency_pair_makes_instrument_local() {
    let services = common::services().await;
    let pair = services
        .persistence
        .local_entity_repository
        .save_currency_pair("usd", "chf")
        .await
        .unwrap();
    let instrument = services
        .instruments
        .find_or_create_currency_pair("USD", "CHF")
        .await
        .unwrap();
    assert_eq!(instrument.local_id, Some(pair.id));
}

#[tokio::test]
async fn test_concurrent_find_or_create_yields_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let services = common::file_services(dir.path()).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let pool = services.instruments.clone();
        handles.push(tokio::spawn(async move {
            pool.find_or_create_security("CH0012032048", "CHF").await
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap().id);
    }
    assert_eq!(ids.len(), 1);

    let found = services
        .instruments
        .find_by_isin_currency_tuples(&[tuple("CH0012032048", "CHF")])
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_concurrent_price_merges_keep_the_newest() {
    let dir = tempfile::tempdir().unwrap();
    let services = common::file_services(dir.path()).await;
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

    let mut handles = Vec::new();
    for i in 0..16i64 {
        let prices = services.prices.clone();
        let observation = PriceObservation::security(
            "CH0038863350",
            "CHF",
            Decimal::from(i),
            base + Duration::microseconds(i * 250),
        )
        .unwrap();
        handles.push(tokio::spawn(async move {
            prices.update_from_connector_fetch(&[observation], None).await
        }));
    }

    let mut total = PriceMergeReport::default();
    for handle in handles {
        let report = handle.await.unwrap().unwrap();
        total.inserted += report.inserted;
        total.updated += report.updated;
        total.discarded += report.discarded;
    }
    assert_eq!(total.inserted, 1);
    assert_eq!(total.inserted + total.updated + total.discarded, 16);

    let instrument = services
        .instruments
        .find_or_create_security("CH0038863350", "CHF")
        .await
        .unwrap();
    let stored = services.prices.last_price(instrument.id).await.unwrap().unwrap();
    assert_eq!(stored.last, Decimal::from(15));
    assert_eq!(stored.timestamp, base + Duration::microseconds(15 * 250));
    assert_eq!(stored.version, 1 + total.updated as i64);
}

#[tokio::test]
async fn test_concurrent_queue_requests_create_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let services = common::file_services(dir.path()).await;
    let ctx = ActorContext::new(1, 10);
    let head = services.imports.create_header(&ctx, "catalog").await.unwrap();
    services
        .imports
        .add_positions(&ctx, head.id, &[AdvertisedInstrument::new("CH0012032048", "CHF")])
        .await
        .unwrap();

    let head_id = head.id;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let imports = services.imports.clone();
        handles.push(tokio::spawn(async move {
            imports.queue_import_job_if_not_exists(&ctx, head_id).await
        }));
    }

    let mut queued = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            queued += 1;
        }
    }
    assert_eq!(queued, 1);
}
