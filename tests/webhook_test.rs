//! Webhook delivery through the HTTP route.

use billsync::BillingConfig;
use billsync::billing::{AccountCreation, SubscriptionStatus, derive_status};
use billsync::billing::webhook::sign_payload;
use billsync::testing::{self, BillingHarness, CustomerFixture};
use chrono::Utc;
use serde_json::json;

fn subscription_created(customer_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_sub_created",
        "type": "customer.subscription.created",
        "created": 1_699_000_000,
        "data": {"object": {
            "id": "sub_1",
            "object": "subscription",
            "customer": customer_id,
            "status": "trialing"
        }}
    }))
    .unwrap()
}

#[tokio::test]
async fn test_subscription_created_creates_account_when_allowed() {
    let config = BillingConfig {
        webhook_accounts: AccountCreation::CreateMissing,
        ..Default::default()
    };
    let harness = BillingHarness::with_config(&config);
    harness.provider.insert_customer(
        CustomerFixture::new("cus_a", "a@example.com")
            .with_subscription("trialing", "plan_yearly", 1_700_000_000)
            .build(),
    );

    testing::post(harness.app(), "/webhooks/stripe")
        .raw_body(subscription_created("cus_a"))
        .execute()
        .await
        .assert_ok()
        .assert_json_path("outcome", json!("created"))
        .await;

    let account = harness.account("a@example.com").await.unwrap();
    assert_eq!(account.customer_id(), Some("cus_a"));
    let info = derive_status(account.customer());
    assert_eq!(info.status, SubscriptionStatus::Trialing);
    assert_eq!(info.trial_end, 1_700_000_000);
}

#[tokio::test]
async fn test_subscription_created_for_unknown_email_is_ignored_by_default() {
    let harness = BillingHarness::new();
    harness.provider.insert_customer(
        CustomerFixture::new("cus_a", "a@example.com")
            .with_subscription("trialing", "plan_yearly", 1_700_000_000)
            .build(),
    );

    testing::post(harness.app(), "/webhooks/stripe")
        .raw_body(subscription_created("cus_a"))
        .execute()
        .await
        .assert_ok()
        .assert_json_path("outcome", json!("unknown_account"))
        .await;

    assert!(harness.account("a@example.com").await.is_none());
}

#[tokio::test]
async fn test_provider_outage_still_acknowledges() {
    let harness = BillingHarness::new();
    harness
        .seed_account(
            "a@example.com",
            Some(CustomerFixture::new("cus_a", "a@example.com").build()),
            Utc::now(),
        )
        .await;
    harness.provider.fail_next(
        "get_customer",
        billsync::billing::BillingError::provider("get_customer", "connection refused"),
        1,
    );

    testing::post(harness.app(), "/webhooks/stripe")
        .raw_body(subscription_created("cus_a"))
        .execute()
        .await
        .assert_ok()
        .assert_json_path("outcome", json!("dropped"))
        .await;
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let harness = BillingHarness::new();

    testing::post(harness.app(), "/webhooks/stripe")
        .raw_body(b"not json".to_vec())
        .execute()
        .await
        .assert_bad_request();
}

#[tokio::test]
async fn test_signed_webhooks() {
    let secret = "whsec_integration";
    let mut config = BillingConfig::default();
    config.webhook_secret = Some(secret.to_string().into());
    let harness = BillingHarness::with_config(&config);
    harness
        .seed_account(
            "a@example.com",
            Some(CustomerFixture::new("cus_a", "a@example.com").build()),
            Utc::now(),
        )
        .await;

    let payload = serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "customer.updated",
        "data": {"object": {
            "id": "cus_a",
            "email": "a@example.com",
            "default_source": "card_1",
            "subscriptions": {"data": [{"id": "sub_1", "status": "active", "plan": "plan_yearly"}]}
        }}
    }))
    .unwrap();

    testing::post(harness.app(), "/webhooks/stripe")
        .raw_body(payload.clone())
        .execute()
        .await
        .assert_bad_request();

    let signature = sign_payload("whsec_wrong", &payload, Utc::now().timestamp());
    testing::post(harness.app(), "/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw_body(payload.clone())
        .execute()
        .await
        .assert_bad_request();

    let signature = sign_payload(secret, &payload, Utc::now().timestamp());
    testing::post(harness.app(), "/webhooks/stripe")
        .header("stripe-signature", &signature)
        .raw_body(payload)
        .execute()
        .await
        .assert_ok()
        .assert_json_path("outcome", json!("updated"))
        .await;

    let account = harness.account("a@example.com").await.unwrap();
    assert_eq!(derive_status(account.customer()).status, SubscriptionStatus::Active);
}
