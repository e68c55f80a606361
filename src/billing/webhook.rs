//! Stripe webhook consumer.
//!
//! Turns customer and subscription events into refreshed account snapshots.
//! Delivery is treated as at-most-once: when the provider cannot be reached
//! to look up the customer, the event is logged and dropped, and the next
//! stale read or bulk sync catches the account up.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::Result;

use super::account::{Account, Customer};
use super::client::BillingProvider;
use super::error::BillingError;
use super::lock::AccountLocks;
use super::storage::AccountStore;

/// Accepted clock skew for signed payloads.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// What to do with an event for an email that has no local account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountCreation {
    /// Only update accounts that already exist.
    #[default]
    ExistingOnly,
    /// Create an account for any customer the provider reports.
    CreateMissing,
}

impl AccountCreation {
    pub fn from_str_lossy(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "existing_only" | "existing" => Some(Self::ExistingOnly),
            "create_missing" | "create" => Some(Self::CreateMissing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExistingOnly => "existing_only",
            Self::CreateMissing => "create_missing",
        }
    }
}

/// Parsed webhook event.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

/// Outcome of webhook processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// An existing account got a new snapshot.
    Updated,
    /// A new account was created from the event.
    Created,
    /// Event type is not one we act on.
    Ignored,
    /// No local account for the customer's email.
    UnknownAccount,
    /// The account is bound to a different customer id; nothing changed.
    IdentityMismatch,
    /// The customer could not be fetched; the event was dropped.
    Dropped,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Created => "created",
            Self::Ignored => "ignored",
            Self::UnknownAccount => "unknown_account",
            Self::IdentityMismatch => "identity_mismatch",
            Self::Dropped => "dropped",
        }
    }
}

/// Applies webhook events to the account store.
pub struct WebhookConsumer<S, P> {
    store: S,
    provider: P,
    locks: AccountLocks,
    creation: AccountCreation,
    signing_secret: Option<SecretString>,
}

impl<S, P> WebhookConsumer<S, P>
where
    S: AccountStore,
    P: BillingProvider,
{
    /// Create a consumer. `locks` must be the registry shared with every
    /// other writer of the same store.
    #[must_use]
    pub fn new(store: S, provider: P, locks: AccountLocks) -> Self {
        Self {
            store,
            provider,
            locks,
            creation: AccountCreation::default(),
            signing_secret: None,
        }
    }

    #[must_use]
    pub fn with_account_creation(mut self, creation: AccountCreation) -> Self {
        self.creation = creation;
        self
    }

    /// Require a valid `Stripe-Signature` on every payload.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<SecretString>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    pub fn account_creation(&self) -> AccountCreation {
        self.creation
    }

    /// Verify (when a secret is configured) and decode a raw payload.
    pub fn parse(&self, payload: &[u8], signature: Option<&str>) -> Result<WebhookEvent> {
        if let Some(secret) = &self.signing_secret {
            let header = signature.ok_or(BillingError::InvalidWebhookSignature)?;
            verify_signature(
                secret.expose_secret(),
                payload,
                header,
                Utc::now().timestamp(),
            )?;
        }
        parse_event(payload)
    }

    /// Verify, decode and apply a raw payload.
    pub async fn handle_payload(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let event = self.parse(payload, signature)?;
        self.handle_event(&event).await
    }

    pub async fn handle_event(&self, event: &WebhookEvent) -> Result<WebhookOutcome> {
        self.handle_event_at(event, Utc::now()).await
    }

    /// Apply an event, stamping any new snapshot with `now`.
    pub async fn handle_event_at(
        &self,
        event: &WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let customer = match event.event_type.as_str() {
            "customer.updated" => {
                let customer =
                    serde_json::from_value::<Customer>(event.data.object.clone()).map_err(|e| {
                        tracing::warn!(
                            target: "billsync::billing::webhook",
                            event_id = %event.id,
                            error = %e,
                            "Malformed customer in webhook"
                        );
                        BillingError::InvalidWebhookPayload {
                            message: "malformed customer object".to_string(),
                        }
                    })?;

                // Stripe omits `subscriptions` unless expanded; an absent key
                // is not an empty list.
                if event.data.object.get("subscriptions").is_some() {
                    customer
                } else {
                    match self.fetch_customer(event, &customer.id).await {
                        Some(customer) => customer,
                        None => return Ok(WebhookOutcome::Dropped),
                    }
                }
            }
            "customer.subscription.created"
            | "customer.subscription.updated"
            | "customer.subscription.deleted" => {
                let customer_id = event
                    .data
                    .object
                    .get("customer")
                    .and_then(|c| c.as_str().or_else(|| c.get("id").and_then(|id| id.as_str())))
                    .ok_or_else(|| BillingError::InvalidWebhookPayload {
                        message: "subscription has no customer".to_string(),
                    })?;

                match self.fetch_customer(event, customer_id).await {
                    Some(customer) => customer,
                    None => return Ok(WebhookOutcome::Dropped),
                }
            }
            _ => return Ok(WebhookOutcome::Ignored),
        };

        let outcome = self.apply_customer(customer, now).await?;
        tracing::info!(
            target: "billsync::billing::webhook",
            event_id = %event.id,
            event_type = %event.event_type,
            outcome = outcome.as_str(),
            "Processed webhook"
        );
        Ok(outcome)
    }

    /// Full customer from the provider; `None` when the lookup fails and the
    /// event should be dropped.
    async fn fetch_customer(&self, event: &WebhookEvent, customer_id: &str) -> Option<Customer> {
        match self.provider.get_customer(customer_id).await {
            Ok(customer) => Some(customer),
            Err(e) => {
                tracing::error!(
                    target: "billsync::billing::webhook",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    customer_id = customer_id,
                    error = %e,
                    "Could not fetch customer for webhook, dropping event"
                );
                None
            }
        }
    }

    /// Store a customer snapshot on the account its email resolves to.
    async fn apply_customer(&self, customer: Customer, now: DateTime<Utc>) -> Result<WebhookOutcome> {
        let Some(email) = customer.email.clone().filter(|e| !e.is_empty()) else {
            tracing::debug!(
                target: "billsync::billing::webhook",
                customer_id = %customer.id,
                "Customer has no email, nothing to resolve"
            );
            return Ok(WebhookOutcome::UnknownAccount);
        };

        let _guard = self.locks.lock(&email).await?;

        let (mut account, outcome) = match self.store.get(&email).await? {
            Some(account) => (account, WebhookOutcome::Updated),
            None => match self.creation {
                AccountCreation::ExistingOnly => {
                    tracing::debug!(
                        target: "billsync::billing::webhook",
                        email = %email,
                        customer_id = %customer.id,
                        "No local account for customer"
                    );
                    return Ok(WebhookOutcome::UnknownAccount);
                }
                AccountCreation::CreateMissing => (Account::new(&email, now), WebhookOutcome::Created),
            },
        };

        if let Some(stored) = account.customer_id() {
            if stored != customer.id {
                tracing::warn!(
                    target: "billsync::billing::webhook",
                    email = %email,
                    stored_customer_id = stored,
                    event_customer_id = %customer.id,
                    "Customer id does not match the account, ignoring event"
                );
                return Ok(WebhookOutcome::IdentityMismatch);
            }
        }

        account.set_customer(customer, now);
        self.store.put(&account).await?;
        Ok(outcome)
    }
}

/// Decode an event body.
pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent> {
    serde_json::from_slice(payload).map_err(|e| {
        tracing::warn!(
            target: "billsync::billing::webhook",
            error = %e,
            "Failed to parse webhook payload"
        );
        BillingError::InvalidWebhookPayload {
            message: "malformed JSON payload".to_string(),
        }
        .into()
    })
}

struct SignatureParts {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> std::result::Result<SignatureParts, BillingError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or(BillingError::InvalidWebhookSignature)?;
        match key.trim() {
            "t" => timestamp = value.trim().parse().ok(),
            "v1" => signatures.push(value.trim().to_string()),
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureParts {
            timestamp,
            signatures,
        }),
        _ => Err(BillingError::InvalidWebhookSignature),
    }
}

fn compute_signature(secret: &str, payload: &[u8]) -> std::result::Result<Vec<u8>, BillingError> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| BillingError::Internal {
        message: "HMAC key error".to_string(),
    })?;
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Check a `Stripe-Signature` header (`t=...,v1=...`) against `payload`.
///
/// Any one matching `v1` signature is enough. The timestamp must be within
/// [`SIGNATURE_TOLERANCE_SECS`] of `now`.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
) -> std::result::Result<(), BillingError> {
    let parts = parse_signature_header(header)?;

    let age = now.abs_diff(parts.timestamp);
    if age > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(BillingError::WebhookTimestampExpired {
            age_seconds: i64::try_from(age).unwrap_or(i64::MAX),
        });
    }

    let mut signed = Vec::with_capacity(payload.len() + 12);
    signed.extend_from_slice(parts.timestamp.to_string().as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(payload);
    let expected = compute_signature(secret, &signed)?;

    let matched = parts.signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|provided| expected.ct_eq(&provided).unwrap_u8() == 1)
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(BillingError::InvalidWebhookSignature)
    }
}

/// Build a valid `Stripe-Signature` header for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut signed = Vec::with_capacity(payload.len() + 12);
    signed.extend_from_slice(timestamp.to_string().as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(payload);
    let signature = compute_signature(secret, &signed).map(hex::encode).unwrap_or_default();
    format!("t={},v1={}", timestamp, signature)
}
