//! Subscribe, change plan, cancel and resubscribe against the mock provider.

use std::sync::Arc;

use billsync::billing::{
    AccountLocks, AccountStore, BillingError, InMemoryAccountStore, MockBillingProvider, Plans,
    SubscribeRequest, SubscriptionManager, SubscriptionStatus, derive_status,
};

type Manager = SubscriptionManager<InMemoryAccountStore, MockBillingProvider>;

fn setup() -> (Manager, InMemoryAccountStore, MockBillingProvider) {
    let store = InMemoryAccountStore::new();
    let provider = MockBillingProvider::new();
    let plans = Plans::builder()
        .simple("plan_monthly", "Monthly")
        .simple("plan_yearly", "Yearly")
        .default_plan("plan_yearly")
        .build();
    let manager = SubscriptionManager::new(
        store.clone(),
        provider.clone(),
        AccountLocks::new(),
        Arc::new(plans),
    );
    (manager, store, provider)
}

fn request(plan: &str, token: Option<&str>) -> SubscribeRequest {
    SubscribeRequest {
        plan: Some(plan.to_string()),
        token: token.map(str::to_string),
        coupon: None,
    }
}

#[tokio::test]
async fn test_subscribe_new_account_ends_trial_now() {
    let (manager, store, provider) = setup();

    let account = manager
        .subscribe("a@example.com", request("plan_yearly", Some("tok_visa")))
        .await
        .unwrap();

    let options = provider.subscription_options();
    assert_eq!(options.len(), 1);
    assert!(options[0].trial_end_now);

    let stored = store.get("a@example.com").await.unwrap().unwrap();
    assert_eq!(stored, account);
    let subscription = stored.customer().unwrap().subscription().unwrap();
    assert_eq!(subscription.plan.as_deref(), Some("plan_yearly"));
    assert_eq!(
        derive_status(stored.customer()).status,
        SubscriptionStatus::Active
    );
    assert!(stored.customer().unwrap().has_payment_source());
}

#[tokio::test]
async fn test_plan_change_updates_the_live_subscription() {
    let (manager, store, provider) = setup();
    manager
        .subscribe("a@example.com", request("plan_yearly", Some("tok_visa")))
        .await
        .unwrap();

    // The card is already on file, so no token this time.
    manager
        .subscribe("a@example.com", request("plan_monthly", None))
        .await
        .unwrap();

    assert_eq!(provider.call_count("create_subscription"), 1);
    let updates = provider.subscription_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].plan.as_deref(), Some("plan_monthly"));
    assert!(updates[0].trial_end_now);

    let stored = store.get("a@example.com").await.unwrap().unwrap();
    let subscription = stored.customer().unwrap().subscription().unwrap();
    assert_eq!(subscription.plan.as_deref(), Some("plan_monthly"));
}

#[tokio::test]
async fn test_cancel_then_resubscribe() {
    let (manager, _, provider) = setup();
    manager
        .subscribe("a@example.com", request("plan_yearly", Some("tok_visa")))
        .await
        .unwrap();

    let account = manager.unsubscribe("a@example.com").await.unwrap();
    assert_eq!(
        derive_status(account.customer()).status,
        SubscriptionStatus::Canceled
    );

    let err = manager.unsubscribe("a@example.com").await.unwrap_err();
    assert!(matches!(
        err.as_billing(),
        Some(BillingError::NoSubscription { .. })
    ));

    let account = manager
        .subscribe("a@example.com", request("plan_yearly", None))
        .await
        .unwrap();
    assert_eq!(
        derive_status(account.customer()).status,
        SubscriptionStatus::Active
    );
    assert_eq!(provider.call_count("create_subscription"), 2);
}

#[tokio::test]
async fn test_rejected_requests_make_no_subscription() {
    let (manager, store, provider) = setup();

    let err = manager
        .subscribe("a@example.com", request("plan_weekly", Some("tok_visa")))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_billing(),
        Some(BillingError::PlanNotFound { .. })
    ));
    assert!(provider.calls().is_empty());

    let err = manager
        .subscribe("a@example.com", request("plan_yearly", None))
        .await
        .unwrap_err();
    assert!(matches!(
        err.as_billing(),
        Some(BillingError::NoPaymentSource { .. })
    ));

    provider.decline_token("tok_declined");
    let err = manager
        .subscribe("a@example.com", request("plan_yearly", Some("tok_declined")))
        .await
        .unwrap_err();
    assert!(err.is_card_error());

    assert_eq!(provider.call_count("create_subscription"), 0);
    let stored = store.get("a@example.com").await.unwrap().unwrap();
    assert_eq!(
        derive_status(stored.customer()).status,
        SubscriptionStatus::Inactive
    );
}
