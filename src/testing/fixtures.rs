//! Fixtures for billing tests: fake data, customer builders and a wired-up
//! harness around the mock provider.

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::billing::{
    Account, AccountStore, Customer, InMemoryAccountStore, MockBillingProvider, Plans,
    SubscriptionRef,
};
use crate::config::BillingConfig;
use crate::http::{AppState, router};

/// Helper functions for generating fake test data
pub mod fake {
    use uuid::Uuid;

    pub fn email() -> String {
        format!("test-{}@example.com", Uuid::new_v4().simple())
    }

    pub fn customer_id() -> String {
        format!("cus_{}", &Uuid::new_v4().simple().to_string()[..14])
    }

    pub fn card_token() -> String {
        format!("tok_{}", fastrand::u32(100_000..999_999))
    }
}

/// Builder for provider customers.
#[derive(Debug, Clone)]
pub struct CustomerFixture {
    customer: Customer,
}

impl CustomerFixture {
    pub fn new(id: &str, email: &str) -> Self {
        Self {
            customer: Customer {
                id: id.to_string(),
                email: Some(email.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn with_source(mut self) -> Self {
        self.customer.default_source = Some(format!("card_{}", self.customer.id));
        self
    }

    pub fn with_subscription(mut self, status: &str, plan: &str, trial_end: i64) -> Self {
        let id = format!("sub_{}", self.customer.subscriptions.data.len() + 1);
        self.customer.subscriptions.data.push(SubscriptionRef {
            id,
            plan: Some(plan.to_string()),
            status: status.to_string(),
            trial_end,
        });
        self
    }

    pub fn build(self) -> Customer {
        self.customer
    }
}

/// Store, mock provider and router wired together the way a server would.
pub struct BillingHarness {
    pub store: InMemoryAccountStore,
    pub provider: MockBillingProvider,
    pub plans: Arc<Plans>,
    pub state: AppState,
}

impl BillingHarness {
    /// Harness with a two-plan catalogue (`plan_monthly`, default `plan_yearly`).
    pub fn new() -> Self {
        Self::with_config(&BillingConfig::default())
    }

    pub fn with_config(config: &BillingConfig) -> Self {
        let store = InMemoryAccountStore::new();
        let provider = MockBillingProvider::new();
        let plans = Arc::new(
            Plans::builder()
                .simple("plan_monthly", "Monthly")
                .simple("plan_yearly", "Yearly")
                .default_plan("plan_yearly")
                .build(),
        );
        let state = AppState::from_config(
            Arc::new(store.clone()),
            Arc::new(provider.clone()),
            Arc::clone(&plans),
            config,
        );
        Self {
            store,
            provider,
            plans,
            state,
        }
    }

    pub fn app(&self) -> Router {
        router(self.state.clone())
    }

    /// Put an account in the store, with `customer` as its snapshot when
    /// given. The customer is also registered with the mock provider.
    pub async fn seed_account(
        &self,
        email: &str,
        customer: Option<Customer>,
        refreshed: DateTime<Utc>,
    ) -> Account {
        let mut account = Account::new(email, refreshed);
        if let Some(customer) = customer {
            self.provider.insert_customer(customer.clone());
            account.set_customer(customer, refreshed);
        }
        self.store.put(&account).await.unwrap();
        account
    }

    pub async fn account(&self, email: &str) -> Option<Account> {
        self.store.get(email).await.unwrap()
    }
}

impl Default for BillingHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_fixture() {
        let customer = CustomerFixture::new("cus_1", "a@x")
            .with_source()
            .with_subscription("trialing", "plan_yearly", 1_700_000_000)
            .build();
        assert!(customer.has_payment_source());
        assert_eq!(customer.subscription().unwrap().trial_end, 1_700_000_000);
    }

    #[test]
    fn test_fake_values_are_unique() {
        assert_ne!(fake::email(), fake::email());
        assert!(fake::customer_id().starts_with("cus_"));
    }
}
