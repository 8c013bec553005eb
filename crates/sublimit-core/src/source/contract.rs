//! Subscriber contract client.
//!
//! Plans live on a Subscriber contract exposing three views:
//!
//! ```text
//! num_plans() -> uint256
//! get_plan(uint256 plan_id)
//!     -> (uint256 price, uint256 rate_limit, uint256 time_interval, bool is_active)
//! subscription_end(uint256 plan_id, address user) -> uint256 unix_seconds
//! ```
//!
//! Plan ids run from 1 up to, but excluding, `num_plans()`. A `subscription_end` of zero
//! means the user never subscribed to that plan.
//!
//! Calls are ABI-encoded here and handed to a [`ContractReader`], which owns the node
//! transport.
//!
//! No node client ships with this crate, and the server only wires static sources from
//! configuration. A deployment that reads plans on chain implements [`ContractReader`]
//! over its own RPC client and registers `CachedPlanSource::new(SubscriberContract::new(..))`
//! with [`SubscriptionResolver::with_source`](crate::resolver::SubscriptionResolver::with_source).

use super::{ActiveSubscription, PlanSource, SourceError};
use crate::{
    identity::{signature::keccak256, Identity},
    plan::Plan,
};
use async_trait::async_trait;
use chrono::DateTime;
use futures::future::try_join_all;
use std::sync::Arc;

const WORD: usize = 32;

/// Upper bound on `num_plans()`; larger answers are treated as corrupt.
pub const MAX_PLANS: u64 = 1024;

/// Executes read-only contract calls (`eth_call`).
#[async_trait]
pub trait ContractReader: Send + Sync {
    /// Returns the raw return data of calling `contract` with `calldata`.
    async fn call(&self, contract: &Identity, calldata: Vec<u8>) -> Result<Vec<u8>, SourceError>;
}

#[async_trait]
impl<R: ContractReader + ?Sized> ContractReader for Arc<R> {
    async fn call(&self, contract: &Identity, calldata: Vec<u8>) -> Result<Vec<u8>, SourceError> {
        (**self).call(contract, calldata).await
    }
}

/// A deployed Subscriber contract.
#[derive(Debug, Clone)]
pub struct SubscriberContract<R> {
    name: String,
    address: Identity,
    reader: R,
}

impl<R: ContractReader> SubscriberContract<R> {
    #[must_use]
    pub fn new(address: Identity, reader: R) -> Self {
        Self { name: address.to_checksum(), address, reader }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn address(&self) -> &Identity {
        &self.address
    }

    async fn call(&self, calldata: Vec<u8>) -> Result<Vec<u8>, SourceError> {
        self.reader.call(&self.address, calldata).await
    }

    /// # Errors
    /// Returns [`SourceError`] if the call fails or the answer exceeds [`MAX_PLANS`].
    pub async fn num_plans(&self) -> Result<u64, SourceError> {
        let data = self.call(selector("num_plans()").to_vec()).await?;
        let count = decode_u64(word(&data, 0)?)?;
        if count > MAX_PLANS {
            return Err(SourceError::Decode(format!("num_plans() returned {count}")));
        }
        Ok(count)
    }

    /// Ids of every plan the contract defines.
    ///
    /// # Errors
    /// Returns [`SourceError`] if `num_plans()` fails.
    pub async fn plan_ids(&self) -> Result<Vec<u64>, SourceError> {
        Ok((1..self.num_plans().await?).collect())
    }

    /// Fetches one plan. Plans with a zero rate limit cannot admit anything and decode
    /// to `None`.
    ///
    /// # Errors
    /// Returns [`SourceError`] if the call fails or the return data is malformed.
    pub async fn get_plan(&self, plan_id: u64) -> Result<Option<Plan>, SourceError> {
        let mut calldata = selector("get_plan(uint256)").to_vec();
        calldata.extend_from_slice(&encode_u64(plan_id));
        let data = self.call(calldata).await?;

        let price = decode_u128(word(&data, 0)?)?;
        let rate_limit = decode_u64(word(&data, 1)?)?;
        let is_active = decode_bool(word(&data, 3)?)?;

        match Plan::with_minute_rate(None, price, rate_limit, is_active) {
            Ok(plan) => Ok(Some(plan)),
            Err(e) => {
                tracing::warn!(
                    contract = %self.name,
                    plan_id,
                    error = %e,
                    "skipping unusable plan"
                );
                Ok(None)
            }
        }
    }

    /// Unix seconds at which `user`'s subscription to `plan_id` ends, zero if never held.
    ///
    /// # Errors
    /// Returns [`SourceError`] if the call fails or the return data is malformed.
    pub async fn subscription_end(
        &self,
        plan_id: u64,
        user: &Identity,
    ) -> Result<u64, SourceError> {
        let mut calldata = selector("subscription_end(uint256,address)").to_vec();
        calldata.extend_from_slice(&encode_u64(plan_id));
        calldata.extend_from_slice(&encode_address(user));
        let data = self.call(calldata).await?;
        decode_u64(word(&data, 0)?)
    }
}

#[async_trait]
impl<R: ContractReader> PlanSource for SubscriberContract<R> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_active_plans(&self) -> Result<Vec<Plan>, SourceError> {
        let ids = self.plan_ids().await?;
        let plans = try_join_all(ids.iter().map(|&id| self.get_plan(id))).await?;
        Ok(plans.into_iter().flatten().filter(Plan::is_active).collect())
    }

    async fn active_subscriptions_for(
        &self,
        user: &Identity,
    ) -> Result<Vec<ActiveSubscription>, SourceError> {
        let ids = self.plan_ids().await?;
        let ends = try_join_all(ids.iter().map(|&id| self.subscription_end(id, user))).await?;

        let held: Vec<(u64, u64)> =
            ids.into_iter().zip(ends).filter(|&(_, end)| end > 0).collect();

        let plans = try_join_all(held.iter().map(|&(id, _)| self.get_plan(id))).await?;

        let mut subscriptions = Vec::with_capacity(held.len());
        for ((plan_id, end), plan) in held.into_iter().zip(plans) {
            let Some(plan) = plan else { continue };
            let expires_at = i64::try_from(end)
                .ok()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| {
                    SourceError::Decode(format!("plan {plan_id}: subscription_end {end}"))
                })?;
            subscriptions.push(ActiveSubscription { plan, expires_at });
        }

        tracing::debug!(
            contract = %self.name,
            user = %user,
            held = subscriptions.len(),
            "fetched subscriptions"
        );
        Ok(subscriptions)
    }
}

/// First four bytes of the keccak-256 hash of a function signature.
#[must_use]
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

#[must_use]
pub fn encode_u64(value: u64) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    out[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    out
}

#[must_use]
pub fn encode_address(address: &Identity) -> [u8; WORD] {
    let mut out = [0u8; WORD];
    out[WORD - 20..].copy_from_slice(address.as_bytes());
    out
}

fn word(data: &[u8], index: usize) -> Result<&[u8], SourceError> {
    data.get(index * WORD..(index + 1) * WORD).ok_or_else(|| {
        SourceError::Decode(format!("return data too short for word {index}: {}", data.len()))
    })
}

fn decode_u128(word: &[u8]) -> Result<u128, SourceError> {
    let (high, low) = word.split_at(WORD - 16);
    if high.iter().any(|&b| b != 0) {
        return Err(SourceError::Decode("uint256 exceeds 128 bits".into()));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(low);
    Ok(u128::from_be_bytes(bytes))
}

fn decode_u64(word: &[u8]) -> Result<u64, SourceError> {
    u64::try_from(decode_u128(word)?)
        .map_err(|_| SourceError::Decode("uint256 exceeds 64 bits".into()))
}

fn decode_bool(word: &[u8]) -> Result<bool, SourceError> {
    match decode_u128(word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SourceError::Decode(format!("invalid bool word {other}"))),
    }
}
