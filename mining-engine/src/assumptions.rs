//! Versioned calculation assumptions.
//!
//! Every published methodology stays in the registry so a result can always
//! be reproduced from the version tag it reports. Bump the version whenever a
//! constant or a simplification changes.

use serde::Serialize;

use crate::error::{Error, Result};

/// Seconds in a day.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Constants consumed by the calculation engine and the live data derivations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assumptions {
    /// Version identifier for the calculation methodology
    pub assumptions_version: &'static str,
    /// Target block interval in seconds
    pub seconds_per_block: u32,
    /// Block subsidy in BTC used for projections
    pub block_reward_btc: f64,
    /// Days used to normalize monthly opex to a daily figure
    pub days_per_month: f64,
    /// Known simplifications, copied verbatim into every result
    pub simplifications: &'static [&'static str],
}

impl Assumptions {
    /// Expected number of blocks per day.
    pub fn blocks_per_day(&self) -> f64 {
        f64::from(SECONDS_PER_DAY) / f64::from(self.seconds_per_block)
    }
}

/// API view of an assumptions version, including derived values.
#[derive(Debug, Serialize)]
pub struct AssumptionsView<'a> {
    #[serde(flatten)]
    pub assumptions: &'a Assumptions,
    pub blocks_per_day: f64,
}

impl<'a> From<&'a Assumptions> for AssumptionsView<'a> {
    fn from(assumptions: &'a Assumptions) -> Self {
        Self {
            assumptions,
            blocks_per_day: assumptions.blocks_per_day(),
        }
    }
}

/// Published versions, oldest first. The last entry is current.
static REGISTRY: &[Assumptions] = &[
    Assumptions {
        assumptions_version: "2024.04.0",
        seconds_per_block: 600,
        block_reward_btc: 3.125,
        days_per_month: 30.0,
        simplifications: &[
            "Transaction fees not included in revenue",
            "Constant block subsidy (halving events not modeled)",
            "Network hashrate provided as fixed input",
        ],
    },
    Assumptions {
        assumptions_version: "2026.01.0",
        seconds_per_block: 600,
        block_reward_btc: 3.125,
        days_per_month: 30.0,
        simplifications: &[
            "Transaction fees not included in revenue",
            "Constant block subsidy (3.125 BTC), halving events not modeled",
            "Network hashrate assumed constant at input value",
            "Difficulty adjustments approximated through hashrate",
            "CAPEX amortized linearly over the horizon",
            "First-order approximation suitable for initial analysis",
        ],
    },
];

/// The current assumptions version.
pub fn current() -> &'static Assumptions {
    // REGISTRY is a non-empty literal
    &REGISTRY[REGISTRY.len() - 1]
}

/// Look up an assumptions version, or the current one when `version` is None.
pub fn get_assumptions(version: Option<&str>) -> Result<&'static Assumptions> {
    match version {
        None => Ok(current()),
        Some(tag) => REGISTRY
            .iter()
            .find(|a| a.assumptions_version == tag)
            .ok_or_else(|| Error::not_found("assumptions version", tag)),
    }
}

/// All published version tags, oldest first.
pub fn versions() -> Vec<&'static str> {
    REGISTRY.iter().map(|a| a.assumptions_version).collect()
}
