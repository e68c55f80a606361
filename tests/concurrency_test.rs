//! Concurrent webhook and user updates on the same account.

use std::sync::Arc;
use std::time::Duration;

use billsync::billing::{
    AccountLocks, AccountStore, BillingDetails, FileAccountStore, InMemoryAccountStore,
    MockBillingProvider, Plans, SubscribeRequest, SubscriptionManager, SubscriptionStatus,
    WebhookConsumer, WebhookEvent, WebhookOutcome, derive_status,
};
use billsync::testing::CustomerFixture;
use chrono::Utc;
use serde_json::json;

fn setup() -> (
    SubscriptionManager<InMemoryAccountStore, MockBillingProvider>,
    WebhookConsumer<InMemoryAccountStore, MockBillingProvider>,
    InMemoryAccountStore,
    MockBillingProvider,
) {
    let store = InMemoryAccountStore::new();
    let provider = MockBillingProvider::new();
    let locks = AccountLocks::new();
    let plans = Arc::new(Plans::builder().simple("plan_yearly", "Yearly").build());
    let manager = SubscriptionManager::new(store.clone(), provider.clone(), locks.clone(), plans);
    let webhooks = WebhookConsumer::new(store.clone(), provider.clone(), locks);
    (manager, webhooks, store, provider)
}

fn subscription_updated(customer_id: &str) -> WebhookEvent {
    serde_json::from_value(json!({
        "id": "evt_concurrent",
        "type": "customer.subscription.updated",
        "data": {"object": {"id": "sub_x", "customer": customer_id}}
    }))
    .unwrap()
}

fn subscribe_request() -> SubscribeRequest {
    SubscribeRequest {
        plan: Some("plan_yearly".to_string()),
        token: Some("tok_visa".to_string()),
        coupon: None,
    }
}

/// Pin the racy interleaving: the webhook reads the customer before the
/// subscription exists, then stalls before persisting. A subscribe arriving
/// meanwhile must wait for the webhook instead of committing underneath it.
async fn assert_subscribe_waits_for_stale_webhook<S>(
    manager: SubscriptionManager<S, MockBillingProvider>,
    webhooks: WebhookConsumer<S, MockBillingProvider>,
    store: S,
    provider: MockBillingProvider,
) where
    S: AccountStore + Clone + 'static,
{
    let account = manager.account("a@x", true).await.unwrap();
    let customer_id = account.customer_id().unwrap().to_string();
    let manager = Arc::new(manager);
    let webhooks = Arc::new(webhooks);

    let mut hold = provider.hold_next("get_customer");
    let webhook = {
        let webhooks = Arc::clone(&webhooks);
        let event = subscription_updated(&customer_id);
        tokio::spawn(async move { webhooks.handle_event(&event).await })
    };
    hold.reached().await;

    let mut subscribe = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.subscribe("a@x", subscribe_request()).await })
    };
    let early = tokio::time::timeout(Duration::from_millis(300), &mut subscribe).await;
    assert!(
        early.is_err(),
        "subscribe committed while a webhook held a stale snapshot"
    );
    assert_eq!(provider.call_count("create_subscription"), 0);

    hold.release();
    assert_eq!(webhook.await.unwrap().unwrap(), WebhookOutcome::Updated);
    subscribe.await.unwrap().unwrap();

    let stored = store.get("a@x").await.unwrap().unwrap();
    let customer = stored.customer().unwrap();
    assert!(customer.has_payment_source());
    assert_eq!(customer.subscription().unwrap().plan.as_deref(), Some("plan_yearly"));
    assert_eq!(derive_status(Some(customer)).status, SubscriptionStatus::Active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_webhook_cannot_overwrite_subscribe() {
    let (manager, webhooks, store, provider) = setup();
    assert_subscribe_waits_for_stale_webhook(manager, webhooks, store, provider).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_separate_registries_on_one_directory_exclude_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileAccountStore::open(dir.path()).await.unwrap();
    let provider = MockBillingProvider::new();
    let plans = Arc::new(Plans::builder().simple("plan_yearly", "Yearly").build());

    // An operator command and the server each build their own registry.
    let manager = SubscriptionManager::new(store.clone(), provider.clone(), store.locks(), plans);
    let webhooks = WebhookConsumer::new(store.clone(), provider.clone(), store.locks());
    assert_subscribe_waits_for_stale_webhook(manager, webhooks, store, provider).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_billing_updates_keep_last_provider_state() {
    let (manager, _, store, provider) = setup();
    provider.insert_customer(CustomerFixture::new("cus_1", "a@x").build());
    manager.account("a@x", true).await.unwrap();
    provider.set_latency(Duration::from_millis(5));

    let manager = Arc::new(manager);
    let mut tasks = Vec::new();
    for i in 0..6 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            let details = BillingDetails {
                shipping: None,
                vat: Some(format!("VAT{}", i)),
            };
            manager.update_billing("a@x", details).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let stored = store.get("a@x").await.unwrap().unwrap();
    let remote = provider.customer("cus_1").unwrap();
    assert_eq!(stored.customer().unwrap().vat(), remote.vat());
    assert!(stored.customer_refreshed().unwrap() <= Utc::now());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_accounts_progress_independently() {
    let (manager, _, _, provider) = setup();
    provider.set_latency(Duration::from_millis(20));
    let manager = Arc::new(manager);

    let started = std::time::Instant::now();
    let mut tasks = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager.account(&format!("user{}@x", i), true).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Two provider calls per account; serialized they would take 320ms.
    assert!(started.elapsed() < Duration::from_millis(300));
}
