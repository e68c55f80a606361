//! Read-only projections of an account for the HTTP layer and the CLI.

use axum::http::{HeaderName, HeaderValue};
use axum::response::{IntoResponseParts, ResponseParts};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::convert::Infallible;

use super::account::{Account, Promo, Shipping};
use super::client::{Invoice, InvoiceStatus};
use super::plans::Plans;
use super::status::{StatusInfo, SubscriptionStatus, derive_status};

pub const SUBSCRIPTION_STATUS_HEADER: &str = "x-subscription-status";
pub const SUBSCRIPTION_TRIAL_END_HEADER: &str = "x-subscription-trial-end";

/// Status headers attached to every authenticated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusHeaders {
    pub status: SubscriptionStatus,
    pub trial_end: i64,
}

impl From<StatusInfo> for StatusHeaders {
    fn from(info: StatusInfo) -> Self {
        Self {
            status: info.status,
            trial_end: info.trial_end,
        }
    }
}

impl StatusHeaders {
    pub fn for_account(account: &Account) -> Self {
        derive_status(account.customer()).into()
    }
}

impl IntoResponseParts for StatusHeaders {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let headers = res.headers_mut();
        headers.insert(
            HeaderName::from_static(SUBSCRIPTION_STATUS_HEADER),
            HeaderValue::from_static(self.status.as_str()),
        );
        headers.insert(
            HeaderName::from_static(SUBSCRIPTION_TRIAL_END_HEADER),
            HeaderValue::from(self.trial_end),
        );
        Ok(res)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountView {
    pub email: String,
    pub created: DateTime<Utc>,
    pub status: SubscriptionStatus,
    pub trial_end: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_days_left: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanView>,
    pub has_payment_source: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipping: Option<Shipping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promo: Option<PromoView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromoView {
    pub coupon: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl From<&Promo> for PromoView {
    fn from(promo: &Promo) -> Self {
        Self {
            coupon: promo.coupon.clone(),
            title: promo.title.clone(),
            description: promo.description.clone(),
            expires: promo.expires(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceView {
    pub id: String,
    pub date: Option<DateTime<Utc>>,
    pub amount: String,
    pub status: Option<InvoiceStatus>,
    pub paid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl From<&Invoice> for InvoiceView {
    fn from(invoice: &Invoice) -> Self {
        Self {
            id: invoice.id.clone(),
            date: DateTime::from_timestamp(invoice.created, 0),
            amount: format_currency(invoice.amount_due, invoice.currency.as_deref()),
            status: invoice.status,
            paid: invoice.paid,
            url: invoice.hosted_invoice_url.clone(),
        }
    }
}

/// Everything the account dashboard shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub account: AccountView,
    pub invoices: Vec<InvoiceView>,
    pub plans: Vec<PlanView>,
}

/// Project an account for the JSON API.
///
/// An expired promo is left out.
pub fn project_account(account: &Account, plans: &Plans, now: DateTime<Utc>) -> AccountView {
    let customer = account.customer();
    let info = derive_status(customer);
    let plan = customer
        .and_then(|c| c.subscription())
        .and_then(|s| s.plan.as_deref())
        .map(|id| match plans.get(id) {
            Some(plan) => plan_view(plan),
            None => PlanView {
                id: id.to_string(),
                name: None,
                amount: None,
                currency: None,
                interval: None,
            },
        });

    AccountView {
        email: account.email.clone(),
        created: account.created,
        status: info.status,
        trial_end: info.trial_end,
        trial_days_left: account.remaining_trial_days(now),
        plan,
        has_payment_source: customer.is_some_and(|c| c.has_payment_source()),
        shipping: customer.and_then(|c| c.shipping.clone()),
        vat: customer.and_then(|c| c.vat()).map(str::to_string),
        promo: account
            .promo
            .as_ref()
            .filter(|p| !p.is_expired(now))
            .map(PromoView::from),
    }
}

pub fn project_dashboard(
    account: &Account,
    invoices: &[Invoice],
    plans: &Plans,
    now: DateTime<Utc>,
) -> DashboardView {
    DashboardView {
        account: project_account(account, plans, now),
        invoices: invoices.iter().map(InvoiceView::from).collect(),
        plans: plans.iter().map(plan_view).collect(),
    }
}

fn plan_view(plan: &super::client::Plan) -> PlanView {
    PlanView {
        id: plan.id.clone(),
        name: plan.nickname.clone(),
        amount: plan.amount,
        currency: plan.currency.clone(),
        interval: plan.interval.clone(),
    }
}

/// Format an amount in minor units, e.g. `1299, "eur"` as `12.99 EUR`.
pub fn format_currency(amount: i64, currency: Option<&str>) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let major = format!("{}{}.{:02}", sign, abs / 100, abs % 100);
    match currency {
        Some(c) => format!("{} {}", major, c.to_uppercase()),
        None => major,
    }
}
