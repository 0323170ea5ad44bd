//! Fee resolution.
//!
//! Layered strategy, first success wins:
//!
//! 1. Operator override (`max_fee_per_gas`, optional priority fee)
//! 2. Network dynamic estimate (base fee + priority fee)
//! 3. Legacy single gas price
//! 4. Unknown
//!
//! [`resolve_fee`] is the pure decision; [`FeeResolver`] queries the network
//! lazily so an override never costs an RPC round trip it does not need.

use keeper_chain::{FeePlan, FeeSource, GasParams, NetworkFees};
use std::sync::Arc;
use tracing::{debug, warn};

/// Operator fee overrides, wei.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeeOverrides {
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl FeeOverrides {
    /// Whether resolving needs the network's dynamic estimate.
    fn needs_dynamic(&self) -> bool {
        self.max_fee_per_gas.is_none() || self.max_priority_fee_per_gas.is_none()
    }
}

/// Pick a fee plan from the available inputs.
pub fn resolve_fee(
    overrides: &FeeOverrides,
    dynamic: Option<&GasParams>,
    legacy: Option<u128>,
) -> FeePlan {
    if let Some(max_fee) = overrides.max_fee_per_gas {
        let (priority, known) = match overrides.max_priority_fee_per_gas {
            Some(p) => (p, true),
            None => match dynamic.and_then(GasParams::priority_fee) {
                // A tip above the cap would make the transaction invalid
                Some(p) => (p.min(max_fee), true),
                None => (0, false),
            },
        };
        return FeePlan::eip1559(max_fee, priority, FeeSource::Config, known);
    }

    match dynamic {
        Some(GasParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
            ..
        }) => {
            return FeePlan::eip1559(
                *max_fee_per_gas,
                *max_priority_fee_per_gas,
                FeeSource::Estimate,
                true,
            )
        }
        Some(GasParams::Legacy { gas_price }) => {
            return FeePlan::legacy(*gas_price, FeeSource::Estimate)
        }
        None => {}
    }

    match legacy {
        Some(gas_price) => FeePlan::legacy(gas_price, FeeSource::Estimate),
        None => FeePlan::unknown(),
    }
}

/// Resolves fee plans against live network fee sources.
#[derive(Debug, Clone)]
pub struct FeeResolver {
    fees: Arc<dyn NetworkFees>,
    overrides: FeeOverrides,
}

impl FeeResolver {
    pub fn new(fees: Arc<dyn NetworkFees>, overrides: FeeOverrides) -> Self {
        Self { fees, overrides }
    }

    pub async fn resolve(&self) -> FeePlan {
        let dynamic = if self.overrides.needs_dynamic() {
            match self.fees.dynamic_estimate().await {
                Ok(params) => Some(params),
                Err(e) => {
                    debug!(error = %e, "Dynamic fee estimate unavailable");
                    None
                }
            }
        } else {
            None
        };

        let legacy = if self.overrides.max_fee_per_gas.is_none() && dynamic.is_none() {
            match self.fees.legacy_estimate().await {
                Ok(price) => Some(price),
                Err(e) => {
                    warn!(error = %e, "Legacy gas price unavailable");
                    None
                }
            }
        } else {
            None
        };

        resolve_fee(&self.overrides, dynamic.as_ref(), legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFees;
    use keeper_chain::FeeMode;

    const GWEI: u128 = 1_000_000_000;

    fn dynamic(max: u128, prio: u128) -> GasParams {
        GasParams::Eip1559 {
            max_fee_per_gas: max,
            max_priority_fee_per_gas: prio,
            base_fee: max / 2,
        }
    }

    #[test]
    fn test_override_used_verbatim() {
        let overrides = FeeOverrides {
            max_fee_per_gas: Some(40 * GWEI),
            max_priority_fee_per_gas: Some(3 * GWEI),
        };
        let plan = resolve_fee(&overrides, Some(&dynamic(90 * GWEI, 9 * GWEI)), Some(70 * GWEI));
        assert_eq!(plan.mode, FeeMode::Eip1559);
        assert_eq!(plan.source, FeeSource::Config);
        assert_eq!(plan.max_fee_per_gas, Some(40 * GWEI));
        assert_eq!(plan.max_priority_fee_per_gas, Some(3 * GWEI));
        assert!(plan.known && plan.priority_known);
    }

    #[test]
    fn test_removing_override_uses_dynamic() {
        let plan = resolve_fee(
            &FeeOverrides::default(),
            Some(&dynamic(90 * GWEI, 9 * GWEI)),
            Some(70 * GWEI),
        );
        assert_eq!(plan.source, FeeSource::Estimate);
        assert_eq!(plan.mode, FeeMode::Eip1559);
        assert_eq!(plan.max_fee_per_gas, Some(90 * GWEI));
    }

    #[test]
    fn test_override_priority_sourced_from_network() {
        let overrides = FeeOverrides {
            max_fee_per_gas: Some(40 * GWEI),
            max_priority_fee_per_gas: None,
        };
        let plan = resolve_fee(&overrides, Some(&dynamic(90 * GWEI, 2 * GWEI)), None);
        assert_eq!(plan.max_priority_fee_per_gas, Some(2 * GWEI));
        assert!(plan.priority_known);

        // Network tip above the cap is clamped
        let plan = resolve_fee(&overrides, Some(&dynamic(900 * GWEI, 50 * GWEI)), None);
        assert_eq!(plan.max_priority_fee_per_gas, Some(40 * GWEI));

        let plan = resolve_fee(&overrides, None, Some(70 * GWEI));
        assert_eq!(plan.max_priority_fee_per_gas, Some(0));
        assert!(!plan.priority_known);
        assert!(plan.known);
    }

    #[test]
    fn test_legacy_and_unknown() {
        let plan = resolve_fee(&FeeOverrides::default(), None, Some(7 * GWEI));
        assert_eq!(plan.mode, FeeMode::Legacy);
        assert_eq!(plan.gas_price, Some(7 * GWEI));

        let plan = resolve_fee(&FeeOverrides::default(), None, None);
        assert_eq!(plan.mode, FeeMode::Unknown);
        assert!(!plan.known);
        assert_eq!(plan.price_per_gas(), None);
    }

    #[tokio::test]
    async fn test_resolver_queries_lazily() {
        let fees = Arc::new(MockFees::dynamic(90 * GWEI, 2 * GWEI));
        let full = FeeOverrides {
            max_fee_per_gas: Some(40 * GWEI),
            max_priority_fee_per_gas: Some(GWEI),
        };
        let plan = FeeResolver::new(fees.clone(), full).resolve().await;
        assert_eq!(plan.source, FeeSource::Config);
        assert_eq!(fees.calls(), (0, 0));

        let plan = FeeResolver::new(fees.clone(), FeeOverrides::default())
            .resolve()
            .await;
        assert_eq!(plan.source, FeeSource::Estimate);
        assert_eq!(fees.calls(), (1, 0));
    }

    #[tokio::test]
    async fn test_resolver_falls_through_to_legacy() {
        let fees = Arc::new(MockFees::legacy(5 * GWEI));
        let plan = FeeResolver::new(fees.clone(), FeeOverrides::default())
            .resolve()
            .await;
        assert_eq!(plan.mode, FeeMode::Legacy);
        assert_eq!(fees.calls(), (1, 1));

        let plan = FeeResolver::new(Arc::new(MockFees::unavailable()), FeeOverrides::default())
            .resolve()
            .await;
        assert!(!plan.known);
    }
}
