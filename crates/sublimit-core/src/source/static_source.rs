use super::{ActiveSubscription, PlanSource, SourceError};
use crate::{
    identity::Identity,
    plan::{Plan, PlanDefinition},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A subscription granted in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDefinition {
    pub address: String,
    /// Name of a plan declared in the same source.
    pub plan: String,
    pub expires_at: DateTime<Utc>,
}

/// Declaration of a [`StaticPlanSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSourceConfig {
    pub name: String,
    #[serde(default)]
    pub plans: Vec<PlanDefinition>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionDefinition>,
}

/// Plans and subscriptions fixed at startup.
///
/// Useful for operator-granted access and for running the gateway without a chain.
#[derive(Debug, Clone)]
pub struct StaticPlanSource {
    name: String,
    plans: Vec<Plan>,
    subscriptions: HashMap<Identity, Vec<ActiveSubscription>>,
}

impl StaticPlanSource {
    #[must_use]
    pub fn new(name: impl Into<String>, plans: Vec<Plan>) -> Self {
        Self { name: name.into(), plans, subscriptions: HashMap::new() }
    }

    /// Grants `plan` to `user` until `expires_at`.
    #[must_use]
    pub fn with_subscription(
        mut self,
        user: Identity,
        plan: Plan,
        expires_at: DateTime<Utc>,
    ) -> Self {
        self.subscriptions.entry(user).or_default().push(ActiveSubscription { plan, expires_at });
        self
    }

    /// Builds the source from its configuration section.
    ///
    /// # Errors
    /// - [`SourceError::InvalidPlan`] if a plan definition has a zero cap
    /// - [`SourceError::Config`] if a subscription names an unknown plan or a bad address
    pub fn from_config(config: &StaticSourceConfig) -> Result<Self, SourceError> {
        let mut by_name = HashMap::new();
        let mut plans = Vec::with_capacity(config.plans.len());

        for (index, def) in config.plans.iter().enumerate() {
            let plan = Plan::try_from(def).map_err(|source| SourceError::InvalidPlan {
                id: def.name.clone().unwrap_or_else(|| format!("{}#{index}", config.name)),
                source,
            })?;
            if let Some(name) = &def.name {
                by_name.insert(name.clone(), plan.clone());
            }
            plans.push(plan);
        }

        let mut source = Self::new(config.name.clone(), plans);
        for sub in &config.subscriptions {
            let user = Identity::parse(&sub.address)
                .map_err(|e| SourceError::Config(format!("{}: {e}", config.name)))?;
            let plan = by_name.get(&sub.plan).cloned().ok_or_else(|| {
                SourceError::Config(format!("{}: unknown plan '{}'", config.name, sub.plan))
            })?;
            source = source.with_subscription(user, plan, sub.expires_at);
        }

        Ok(source)
    }
}

#[async_trait]
impl PlanSource for StaticPlanSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError> {
        Ok(self.plans.iter().filter(|plan| plan.is_active()).cloned().collect())
    }

    async fn active_subscriptions_for(
        &self,
        user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError> {
        Ok(self.subscriptions.get(user).cloned().unwrap_or_default())
    }
}
