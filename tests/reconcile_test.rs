//! Bulk reconciliation across a mixed customer list.

use billsync::billing::{
    Account, AccountLocks, AccountStore, BillingError, CustomerReconciler, InMemoryAccountStore,
    MockBillingProvider,
};
use billsync::testing::CustomerFixture;
use chrono::{TimeZone, Utc};

#[tokio::test]
async fn test_mixed_customer_list() {
    let now = Utc.with_ymd_and_hms(2024, 7, 1, 3, 0, 0).unwrap();
    let store = InMemoryAccountStore::new();
    let provider = MockBillingProvider::new();

    // Matching account, refreshed by the pass.
    let mut matched = Account::new("match@y.com", now);
    matched.set_customer(CustomerFixture::new("cus_a", "match@y.com").build(), now);
    store.put(&matched).await.unwrap();
    provider.insert_customer(
        CustomerFixture::new("cus_a", "match@y.com")
            .with_source()
            .with_subscription("active", "plan_yearly", 0)
            .build(),
    );

    // No local account and no card: deleted.
    provider.insert_customer(CustomerFixture::new("cus_b", "x@y.com").build());

    // Duplicate of a local account, with a card: flagged and kept.
    let mut owner = Account::new("dup@y.com", now);
    owner.set_customer(CustomerFixture::new("cus_c", "dup@y.com").build(), now);
    store.put(&owner).await.unwrap();
    provider.insert_customer(CustomerFixture::new("cus_c", "dup@y.com").build());
    provider.insert_customer(CustomerFixture::new("cus_d", "dup@y.com").with_source().build());

    let report = CustomerReconciler::new(store.clone(), provider.clone(), AccountLocks::new())
        .with_page_size(2)
        .run_at(now)
        .await
        .unwrap();

    assert_eq!(report.processed, 4);
    assert_eq!(report.updated, 2);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.flagged, vec!["cus_d".to_string()]);
    assert_eq!(report.skipped, 0);

    assert!(provider.customer("cus_b").is_none());
    assert!(store.get("x@y.com").await.unwrap().is_none());
    assert!(provider.customer("cus_d").is_some());
    assert_eq!(
        store.get("dup@y.com").await.unwrap().unwrap().customer_id(),
        Some("cus_c")
    );
    let refreshed = store.get("match@y.com").await.unwrap().unwrap();
    assert!(refreshed.customer().unwrap().has_payment_source());
}

#[tokio::test]
async fn test_aborts_with_counts_after_retry_cap() {
    let store = InMemoryAccountStore::new();
    let provider = MockBillingProvider::new();
    provider.insert_customer(CustomerFixture::new("cus_b", "x@y.com").build());
    provider.fail_next(
        "list_customers",
        BillingError::Provider {
            operation: "list_customers".to_string(),
            message: "Too many requests".to_string(),
            code: Some("rate_limit".to_string()),
            http_status: Some(429),
        },
        100,
    );

    let err = CustomerReconciler::new(store, provider.clone(), AccountLocks::new())
        .run()
        .await
        .unwrap_err();

    assert!(err.is_transient());
    match err.as_billing() {
        Some(BillingError::RetryLimitExceeded {
            attempts, processed, ..
        }) => {
            assert_eq!(*attempts, 100);
            assert_eq!(*processed, 0);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(provider.customer("cus_b").is_some());
}
