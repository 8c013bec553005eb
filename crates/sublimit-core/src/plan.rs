//! Quota tiers.

use crate::ledger::window::{Window, WindowLimit};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("requests_per_minute must be greater than 0")]
    InvalidRate,

    #[error("requests_per_day must be greater than 0")]
    InvalidDailyCap,
}

/// An immutable quota tier.
///
/// Plans are loaded from a [`crate::source::PlanSource`] and re-fetched rather than
/// mutated. Construct through [`Plan::new`] or [`Plan::trial`] so both caps are
/// guaranteed positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    name: Option<String>,
    price: u128,
    requests_per_minute: u64,
    requests_per_day: u64,
    is_active: bool,
}

impl Plan {
    /// # Errors
    ///
    /// Returns [`PlanError`] if either cap is zero.
    pub fn new(
        name: Option<String>,
        price: u128,
        requests_per_minute: u64,
        requests_per_day: u64,
        is_active: bool,
    ) -> Result<Self, PlanError> {
        if requests_per_minute == 0 {
            return Err(PlanError::InvalidRate);
        }
        if requests_per_day == 0 {
            return Err(PlanError::InvalidDailyCap);
        }
        Ok(Self { name, price, requests_per_minute, requests_per_day, is_active })
    }

    /// A plan with no independent daily cap: the day cap is a full day at the minute rate.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidRate`] if `requests_per_minute` is zero.
    pub fn with_minute_rate(
        name: Option<String>,
        price: u128,
        requests_per_minute: u64,
        is_active: bool,
    ) -> Result<Self, PlanError> {
        let per_day = requests_per_minute.saturating_mul(60 * 24);
        Self::new(name, price, requests_per_minute, per_day, is_active)
    }

    /// The free trial plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::InvalidRate`] if `requests_per_minute` is zero.
    pub fn trial(requests_per_minute: u64) -> Result<Self, PlanError> {
        Self::with_minute_rate(Some("trial".to_string()), 0, requests_per_minute, true)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn price(&self) -> u128 {
        self.price
    }

    #[must_use]
    pub fn requests_per_minute(&self) -> u64 {
        self.requests_per_minute
    }

    #[must_use]
    pub fn requests_per_day(&self) -> u64 {
        self.requests_per_day
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Average spacing between requests at the minute rate.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_per_request(&self) -> f64 {
        60.0 / self.requests_per_minute as f64
    }

    /// The caps this plan enforces, one per window.
    #[must_use]
    pub fn limits(&self) -> [WindowLimit; 2] {
        [
            WindowLimit { window: Window::MINUTE, cap: self.requests_per_minute },
            WindowLimit { window: Window::DAY, cap: self.requests_per_day },
        ]
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<Plan {name}>"),
            None => f.write_str("<Unnamed Plan>"),
        }
    }
}

/// Serialized plan definition, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: u64,
    pub requests_per_minute: u64,
    /// Defaults to a full day at the minute rate.
    #[serde(default)]
    pub requests_per_day: Option<u64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl TryFrom<&PlanDefinition> for Plan {
    type Error = PlanError;

    fn try_from(def: &PlanDefinition) -> Result<Self, Self::Error> {
        match def.requests_per_day {
            Some(per_day) => Plan::new(
                def.name.clone(),
                u128::from(def.price),
                def.requests_per_minute,
                per_day,
                def.is_active,
            ),
            None => Plan::with_minute_rate(
                def.name.clone(),
                u128::from(def.price),
                def.requests_per_minute,
                def.is_active,
            ),
        }
    }
}
