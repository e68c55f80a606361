//! Account and subscription routes end to end.

use billsync::billing::view::{SUBSCRIPTION_STATUS_HEADER, SUBSCRIPTION_TRIAL_END_HEADER};
use billsync::billing::{Coupon, Invoice, InvoiceStatus};
use billsync::testing::{self, BillingHarness, CustomerFixture};
use chrono::Utc;
use serde_json::json;

const EMAIL: &str = "a@example.com";

#[tokio::test]
async fn test_requires_authentication() {
    let harness = BillingHarness::new();

    testing::get(harness.app(), "/account")
        .execute()
        .await
        .assert_unauthorized();
}

#[tokio::test]
async fn test_first_access_creates_inactive_account() {
    let harness = BillingHarness::new();

    testing::get(harness.app(), "/account")
        .authenticated(EMAIL)
        .execute()
        .await
        .assert_ok()
        .assert_header(SUBSCRIPTION_STATUS_HEADER, "inactive")
        .assert_header(SUBSCRIPTION_TRIAL_END_HEADER, "0")
        .assert_json_path("email", json!(EMAIL))
        .await
        .assert_json_path("has_payment_source", json!(false))
        .await;

    assert!(harness.account(EMAIL).await.unwrap().customer_id().is_some());
}

#[tokio::test]
async fn test_subscribe_with_token() {
    let harness = BillingHarness::new();

    testing::post(harness.app(), "/subscription")
        .authenticated(EMAIL)
        .form_body(&[("plan", "plan_yearly"), ("token", "tok_visa")])
        .execute()
        .await
        .assert_ok()
        .assert_header(SUBSCRIPTION_STATUS_HEADER, "active")
        .assert_json_path("plan.id", json!("plan_yearly"))
        .await
        .assert_json_path("plan.name", json!("Yearly"))
        .await;
}

#[tokio::test]
async fn test_declined_card_is_payment_required() {
    let harness = BillingHarness::new();
    harness.provider.decline_token("tok_declined");

    testing::post(harness.app(), "/subscription")
        .authenticated(EMAIL)
        .form_body(&[("plan", "plan_yearly"), ("token", "tok_declined")])
        .execute()
        .await
        .assert_payment_required()
        .assert_json_path("code", json!("card_declined"))
        .await
        .assert_json_path("message", json!("Your card was declined."))
        .await;
}

#[tokio::test]
async fn test_provider_failure_is_generic() {
    let harness = BillingHarness::new();
    harness.provider.fail_next(
        "list_customers",
        billsync::billing::BillingError::provider("list_customers", "secret upstream detail"),
        1,
    );

    let body = testing::get(harness.app(), "/account")
        .authenticated(EMAIL)
        .execute()
        .await
        .assert_status(axum::http::StatusCode::BAD_GATEWAY)
        .body_string()
        .await;
    assert!(!body.contains("secret upstream detail"));
}

#[tokio::test]
async fn test_unsubscribe_without_subscription_is_not_found() {
    let harness = BillingHarness::new();
    harness
        .seed_account(EMAIL, Some(CustomerFixture::new("cus_a", EMAIL).build()), Utc::now())
        .await;

    testing::delete(harness.app(), "/subscription")
        .authenticated(EMAIL)
        .execute()
        .await
        .assert_not_found()
        .assert_json_path("code", json!("no_subscription"))
        .await;
}

#[tokio::test]
async fn test_subscription_gate() {
    let harness = BillingHarness::new();
    harness
        .seed_account(
            "paid@example.com",
            Some(
                CustomerFixture::new("cus_paid", "paid@example.com")
                    .with_source()
                    .with_subscription("active", "plan_yearly", 0)
                    .build(),
            ),
            Utc::now(),
        )
        .await;
    harness
        .seed_account(
            "lapsed@example.com",
            Some(
                CustomerFixture::new("cus_lapsed", "lapsed@example.com")
                    .with_subscription("past_due", "plan_yearly", 0)
                    .build(),
            ),
            Utc::now(),
        )
        .await;

    testing::get(harness.app(), "/subscription/check")
        .authenticated("paid@example.com")
        .execute()
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT)
        .assert_header(SUBSCRIPTION_STATUS_HEADER, "active");

    testing::get(harness.app(), "/subscription/check")
        .authenticated("lapsed@example.com")
        .execute()
        .await
        .assert_forbidden()
        .assert_header(SUBSCRIPTION_STATUS_HEADER, "trial_expired")
        .assert_json_path("code", json!("plan_required"))
        .await;
}

#[tokio::test]
async fn test_update_billing() {
    let harness = BillingHarness::new();

    testing::put(harness.app(), "/billing")
        .authenticated(EMAIL)
        .json_body(&json!({
            "vat": "NL123456789B01",
            "shipping": {"name": "Ada", "address": {"city": "Utrecht", "country": "NL"}}
        }))
        .execute()
        .await
        .assert_ok()
        .assert_json_path("vat", json!("NL123456789B01"))
        .await
        .assert_json_path("shipping.address.city", json!("Utrecht"))
        .await;
}

#[tokio::test]
async fn test_dashboard_applies_coupon_and_lists_invoices() {
    let harness = BillingHarness::new();
    harness
        .seed_account(EMAIL, Some(CustomerFixture::new("cus_a", EMAIL).build()), Utc::now())
        .await;
    harness.provider.add_coupon(Coupon {
        id: "SPRING".to_string(),
        name: Some("Spring offer".to_string()),
        valid: true,
        ..Default::default()
    });
    harness.provider.add_invoice(Invoice {
        id: "in_1".to_string(),
        customer: Some("cus_a".to_string()),
        status: Some(InvoiceStatus::Paid),
        paid: true,
        amount_due: 1299,
        currency: Some("eur".to_string()),
        created: 1_700_000_000,
        ..Default::default()
    });

    testing::get(harness.app(), "/dashboard")
        .authenticated(EMAIL)
        .with_query(&[("coupon", "SPRING")])
        .execute()
        .await
        .assert_ok()
        .assert_json_path("account.promo.title", json!("Spring offer"))
        .await
        .assert_json_path("invoices.0.amount", json!("12.99 EUR"))
        .await
        .assert_json_path("plans.1.id", json!("plan_yearly"))
        .await;
}

#[tokio::test]
async fn test_delete_account() {
    let harness = BillingHarness::new();
    harness
        .seed_account(EMAIL, Some(CustomerFixture::new("cus_a", EMAIL).build()), Utc::now())
        .await;

    testing::delete(harness.app(), "/account")
        .authenticated(EMAIL)
        .execute()
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    assert!(harness.account(EMAIL).await.is_none());
    assert!(harness.provider.customer("cus_a").is_none());
}
