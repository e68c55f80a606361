//! Plan catalogue.
//!
//! Built once at startup (from the provider or by hand) and shared
//! read-only behind an `Arc`.

use crate::error::Result;

use super::client::{BillingProvider, Plan};
use super::error::BillingError;

/// Immutable set of plans customers may subscribe to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plans {
    plans: Vec<Plan>,
    default_plan: Option<String>,
}

impl Plans {
    #[must_use]
    pub fn builder() -> PlansBuilder {
        PlansBuilder::default()
    }

    /// Load every active plan from the provider.
    ///
    /// The first plan returned becomes the default.
    pub async fn from_provider<P>(provider: &P) -> Result<Self>
    where
        P: BillingProvider + ?Sized,
    {
        let plans: Vec<Plan> = provider
            .list_plans()
            .await?
            .into_iter()
            .filter(|p| p.active)
            .collect();

        tracing::info!(
            target: "billsync::billing::plans",
            count = plans.len(),
            "Loaded plan catalogue"
        );

        let default_plan = plans.first().map(|p| p.id.clone());
        Ok(Self {
            plans,
            default_plan,
        })
    }

    pub fn get(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Plan> {
        self.plans.iter()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn default_plan(&self) -> Option<&str> {
        self.default_plan.as_deref()
    }

    /// Pick the plan to subscribe to.
    ///
    /// An explicit id must be in the catalogue, unless the catalogue is empty
    /// (nothing was loaded, so nothing is checked). Without an id the default
    /// plan is used.
    pub fn resolve(&self, requested: Option<&str>) -> std::result::Result<String, BillingError> {
        match requested.filter(|id| !id.is_empty()) {
            Some(id) if self.is_empty() || self.contains(id) => Ok(id.to_string()),
            Some(id) => Err(BillingError::PlanNotFound {
                plan_id: id.to_string(),
            }),
            None => self
                .default_plan()
                .map(str::to_string)
                .ok_or_else(|| BillingError::MissingField {
                    field: "plan".to_string(),
                }),
        }
    }
}

/// Builder for [`Plans`].
#[derive(Debug, Default)]
#[must_use = "builder does nothing until you call build()"]
pub struct PlansBuilder {
    plans: Vec<Plan>,
    default_plan: Option<String>,
}

impl PlansBuilder {
    pub fn plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    /// Add a plan with just an id and a display name.
    pub fn simple(self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.plan(Plan {
            id: id.into(),
            nickname: Some(name.into()),
            active: true,
            ..Default::default()
        })
    }

    pub fn default_plan(mut self, id: impl Into<String>) -> Self {
        self.default_plan = Some(id.into());
        self
    }

    pub fn build(self) -> Plans {
        let default_plan = self
            .default_plan
            .or_else(|| self.plans.first().map(|p| p.id.clone()));
        Plans {
            plans: self.plans,
            default_plan,
        }
    }
}
