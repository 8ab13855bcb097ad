//! Mining economics calculation engine.
//!
//! [`calculate`] is a pure function of the request, an assumptions version
//! and the miner catalog. It validates every input before doing any
//! arithmetic, so the divisions below never see a zero denominator.
//!
//! No rounding happens here. Profit is always computed as revenue minus cost
//! from the same `f64` values that are reported, so the identity holds
//! exactly.

use serde::{Deserialize, Serialize};

use crate::{
    assumptions::Assumptions,
    catalog::Catalog,
    error::{Error, Result},
};

const HASHES_PER_TH: f64 = 1e12;
const HASHES_PER_EH: f64 = 1e18;
const HOURS_PER_DAY: f64 = 24.0;
const WATTS_PER_KW: f64 = 1000.0;

fn default_horizon_days() -> u32 {
    365
}

/// Request for a mining economics calculation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CalculationRequest {
    /// Assumptions version to use (defaults to current)
    #[serde(default)]
    pub assumptions_version: Option<String>,
    /// Number of mining units
    pub miners_count: u32,
    /// Miner id from the catalog; overrides the explicit values below
    #[serde(default)]
    pub miner_id: Option<String>,
    /// Power per miner in watts
    #[serde(default)]
    pub miner_power_w: Option<f64>,
    /// Hashrate per miner in TH/s
    #[serde(default)]
    pub miner_hashrate_th: Option<f64>,
    pub electricity_eur_per_kwh: f64,
    /// Fraction of time the fleet is hashing, in (0, 1]
    pub uptime: f64,
    pub btc_price_eur: f64,
    pub network_hashrate_eh: f64,
    /// Pool fee ratio in [0, 1)
    pub pool_fee: f64,
    pub capex_eur: f64,
    pub opex_eur_month: f64,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
}

/// When the initial investment is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payback {
    /// First whole day on which cumulative operating profit covers capex
    Days(u64),
    /// Operating profit is not positive
    Never,
}

impl Payback {
    pub fn days(&self) -> Option<u64> {
        match self {
            Payback::Days(days) => Some(*days),
            Payback::Never => None,
        }
    }
}

/// Effective inputs after miner resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputsEcho {
    pub miners_count: u32,
    pub miner_id: Option<String>,
    pub miner_power_w: f64,
    pub miner_hashrate_th: f64,
    pub electricity_eur_per_kwh: f64,
    pub uptime: f64,
    pub btc_price_eur: f64,
    pub network_hashrate_eh: f64,
    pub pool_fee: f64,
    pub capex_eur: f64,
    pub opex_eur_month: f64,
    pub horizon_days: u32,
}

/// Outcome of a calculation. Currency values are EUR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub assumptions_version: String,

    pub daily_energy_kwh: f64,
    pub daily_energy_cost_eur: f64,
    /// BTC earned per day after pool fee
    pub daily_btc_mined: f64,

    pub daily_revenue_eur: f64,
    pub daily_opex_eur: f64,
    pub daily_capex_amortized_eur: f64,
    /// Energy, opex and amortized capex
    pub daily_cost_eur: f64,
    pub daily_profit_eur: f64,
    /// Revenue minus energy and opex, before capex
    pub daily_operating_profit_eur: f64,

    pub total_revenue_eur: f64,
    pub total_cost_eur: f64,
    pub total_profit_eur: f64,

    /// BTC price at which total profit over the horizon is zero
    pub breakeven_btc_price_eur: f64,
    pub payback: Payback,
    /// Same as `payback`, flattened for older clients
    pub breakeven_days: Option<u64>,
    /// Total profit over capex; absent when capex is zero
    pub roi: Option<f64>,

    pub notes: Vec<String>,
    pub inputs_echo: InputsEcho,
}

/// Run a calculation.
pub fn calculate(
    request: &CalculationRequest,
    assumptions: &Assumptions,
    catalog: &Catalog,
) -> Result<CalculationResult> {
    validate(request)?;
    let (hashrate_th, power_w) = resolve_miner(request, catalog)?;

    let miners = f64::from(request.miners_count);
    let horizon = f64::from(request.horizon_days);

    // Energy: machines only draw power while they are up.
    let daily_energy_kwh = miners * power_w * HOURS_PER_DAY / WATTS_PER_KW * request.uptime;
    let daily_energy_cost_eur = daily_energy_kwh * request.electricity_eur_per_kwh;

    // Revenue: our share of the network times the daily subsidy.
    let total_hashrate_th = miners * hashrate_th * request.uptime;
    let network_share =
        total_hashrate_th * HASHES_PER_TH / (request.network_hashrate_eh * HASHES_PER_EH);
    let daily_btc_gross =
        network_share * assumptions.blocks_per_day() * assumptions.block_reward_btc;
    let daily_btc_mined = daily_btc_gross * (1.0 - request.pool_fee);
    let daily_revenue_eur = daily_btc_mined * request.btc_price_eur;

    let daily_opex_eur = request.opex_eur_month / assumptions.days_per_month;
    let daily_capex_amortized_eur = request.capex_eur / horizon;
    let daily_cost_eur = daily_energy_cost_eur + daily_opex_eur + daily_capex_amortized_eur;
    let daily_profit_eur = daily_revenue_eur - daily_cost_eur;
    let daily_operating_profit_eur = daily_revenue_eur - daily_energy_cost_eur - daily_opex_eur;

    let total_revenue_eur = daily_revenue_eur * horizon;
    let total_cost_eur = (daily_energy_cost_eur + daily_opex_eur) * horizon + request.capex_eur;
    let total_profit_eur = total_revenue_eur - total_cost_eur;

    // Revenue is linear in price, so the zero-profit price is closed form.
    let breakeven_btc_price_eur = total_cost_eur / (daily_btc_mined * horizon);

    let payback = payback(request.capex_eur, daily_operating_profit_eur);

    let roi = if request.capex_eur > 0.0 {
        Some(total_profit_eur / request.capex_eur)
    } else {
        None
    };

    Ok(CalculationResult {
        assumptions_version: assumptions.assumptions_version.to_string(),
        daily_energy_kwh,
        daily_energy_cost_eur,
        daily_btc_mined,
        daily_revenue_eur,
        daily_opex_eur,
        daily_capex_amortized_eur,
        daily_cost_eur,
        daily_profit_eur,
        daily_operating_profit_eur,
        total_revenue_eur,
        total_cost_eur,
        total_profit_eur,
        breakeven_btc_price_eur,
        payback,
        breakeven_days: payback.days(),
        roi,
        notes: assumptions
            .simplifications
            .iter()
            .map(|note| note.to_string())
            .collect(),
        inputs_echo: InputsEcho {
            miners_count: request.miners_count,
            miner_id: request.miner_id.clone(),
            miner_power_w: power_w,
            miner_hashrate_th: hashrate_th,
            electricity_eur_per_kwh: request.electricity_eur_per_kwh,
            uptime: request.uptime,
            btc_price_eur: request.btc_price_eur,
            network_hashrate_eh: request.network_hashrate_eh,
            pool_fee: request.pool_fee,
            capex_eur: request.capex_eur,
            opex_eur_month: request.opex_eur_month,
            horizon_days: request.horizon_days,
        },
    })
}

fn payback(capex_eur: f64, daily_operating_profit_eur: f64) -> Payback {
    if daily_operating_profit_eur <= 0.0 {
        return Payback::Never;
    }
    // Saturating cast; a payback beyond u64 days is as good as never anyway.
    Payback::Days((capex_eur / daily_operating_profit_eur).ceil() as u64)
}

fn validate(request: &CalculationRequest) -> Result<()> {
    if request.miners_count == 0 {
        return Err(Error::validation("miners_count", "must be positive"));
    }
    if request.horizon_days == 0 {
        return Err(Error::validation("horizon_days", "must be positive"));
    }
    if !(request.uptime > 0.0 && request.uptime <= 1.0) {
        return Err(Error::validation(
            "uptime",
            format!("must be in (0, 1], got {}", request.uptime),
        ));
    }
    if !(request.pool_fee >= 0.0 && request.pool_fee < 1.0) {
        return Err(Error::validation(
            "pool_fee",
            format!("must be in [0, 1), got {}", request.pool_fee),
        ));
    }
    require_positive("btc_price_eur", request.btc_price_eur)?;
    require_positive("network_hashrate_eh", request.network_hashrate_eh)?;
    require_non_negative("electricity_eur_per_kwh", request.electricity_eur_per_kwh)?;
    require_non_negative("capex_eur", request.capex_eur)?;
    require_non_negative("opex_eur_month", request.opex_eur_month)?;

    // Explicit hardware values only matter without a catalog id.
    if request.miner_id.is_none() {
        match request.miner_hashrate_th {
            Some(th) => require_positive("miner_hashrate_th", th)?,
            None => {
                return Err(Error::validation(
                    "miner_hashrate_th",
                    "required when miner_id is not given",
                ))
            }
        }
        match request.miner_power_w {
            Some(w) => require_positive("miner_power_w", w)?,
            None => {
                return Err(Error::validation(
                    "miner_power_w",
                    "required when miner_id is not given",
                ))
            }
        }
    }
    Ok(())
}

fn require_positive(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::validation(field, format!("must be positive, got {}", value)))
    }
}

fn require_non_negative(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::validation(field, format!("must not be negative, got {}", value)))
    }
}

/// Returns (hashrate TH/s, power W) per miner.
fn resolve_miner(request: &CalculationRequest, catalog: &Catalog) -> Result<(f64, f64)> {
    match &request.miner_id {
        Some(id) => {
            let miner = catalog
                .miner(id)
                .ok_or_else(|| Error::not_found("miner", id.as_str()))?;
            Ok((miner.hashrate_th, f64::from(miner.power_w)))
        }
        // validate() has already checked both are present
        None => match (request.miner_hashrate_th, request.miner_power_w) {
            (Some(th), Some(w)) => Ok((th, w)),
            _ => Err(Error::validation(
                "miner_id",
                "either miner_id or explicit hashrate and power are required",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assumptions;
    use test_case::test_case;

    fn reference_request() -> CalculationRequest {
        CalculationRequest {
            assumptions_version: None,
            miners_count: 10,
            miner_id: None,
            miner_power_w: Some(3500.0),
            miner_hashrate_th: Some(200.0),
            electricity_eur_per_kwh: 0.05,
            uptime: 0.95,
            btc_price_eur: 40_000.0,
            network_hashrate_eh: 500.0,
            pool_fee: 0.02,
            capex_eur: 50_000.0,
            opex_eur_month: 500.0,
            horizon_days: 365,
        }
    }

    fn run(request: &CalculationRequest) -> Result<CalculationResult> {
        calculate(request, assumptions::current(), &Catalog::builtin())
    }

    fn assert_close(actual: f64, expected: f64) {
        let tolerance = 1e-9 * expected.abs().max(1.0);
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_reference_fixture() {
        let result = run(&reference_request()).unwrap();

        // 10 x 200 TH/s x 0.95 = 1900 TH/s of 500 EH/s, 144 x 3.125 BTC/day
        assert_close(result.daily_btc_mined, 0.0016758);
        assert_close(result.daily_revenue_eur, 67.032);
        assert_close(result.daily_energy_kwh, 798.0);
        assert_close(result.daily_energy_cost_eur, 39.9);
        assert_close(result.daily_opex_eur, 500.0 / 30.0);
        assert_close(result.daily_capex_amortized_eur, 50_000.0 / 365.0);
        assert_close(result.daily_operating_profit_eur, 67.032 - 39.9 - 500.0 / 30.0);
        assert_close(result.total_revenue_eur, 67.032 * 365.0);
        assert_close(result.total_cost_eur, (39.9 + 500.0 / 30.0) * 365.0 + 50_000.0);
        assert_eq!(result.payback, Payback::Days(4778));
        assert_eq!(result.breakeven_days, Some(4778));
        assert_eq!(result.assumptions_version, "2026.01.0");
        assert_eq!(result.inputs_echo.miner_power_w, 3500.0);
        assert!(result.roi.unwrap() < 0.0);
    }

    #[test]
    fn test_reference_fixture_bytes() {
        let json = serde_json::to_string(&run(&reference_request()).unwrap()).unwrap();
        let golden = include_str!("../testdata/reference_result.json");
        assert_eq!(json, golden.trim_end());
    }

    #[test]
    fn test_deterministic_bytes() {
        let request = reference_request();
        let first = serde_json::to_string(&run(&request).unwrap()).unwrap();
        let second = serde_json::to_string(&run(&request).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_profit_is_revenue_minus_cost() {
        for (uptime, fee, price, capex) in [
            (0.95, 0.02, 40_000.0, 50_000.0),
            (0.5, 0.0, 15_000.0, 0.0),
            (1.0, 0.3, 120_000.0, 1_000_000.0),
            (0.01, 0.999, 1.0, 3.3),
        ] {
            let request = CalculationRequest {
                uptime,
                pool_fee: fee,
                btc_price_eur: price,
                capex_eur: capex,
                ..reference_request()
            };
            let result = run(&request).unwrap();
            assert_eq!(
                result.daily_profit_eur,
                result.daily_revenue_eur - result.daily_cost_eur
            );
            assert_eq!(
                result.total_profit_eur,
                result.total_revenue_eur - result.total_cost_eur
            );
        }
    }

    #[test]
    fn test_unthrottled_revenue_is_theoretical_share() {
        let request = CalculationRequest {
            uptime: 1.0,
            pool_fee: 0.0,
            ..reference_request()
        };
        let result = run(&request).unwrap();
        // 2000 TH/s / 500 EH/s = 4e-6 of 450 BTC/day
        assert_close(result.daily_btc_mined, 4e-6 * 144.0 * 3.125);
        assert_close(result.daily_revenue_eur, 4e-6 * 450.0 * 40_000.0);
    }

    #[test]
    fn test_breakeven_price_zeroes_profit() {
        let result = run(&reference_request()).unwrap();
        let request = CalculationRequest {
            btc_price_eur: result.breakeven_btc_price_eur,
            ..reference_request()
        };
        let at_breakeven = run(&request).unwrap();
        assert!(
            at_breakeven.total_profit_eur.abs() < 1e-6,
            "profit at breakeven was {}",
            at_breakeven.total_profit_eur
        );
    }

    #[test]
    fn test_never_pays_back() {
        let request = CalculationRequest {
            electricity_eur_per_kwh: 1.0,
            ..reference_request()
        };
        let result = run(&request).unwrap();
        assert_eq!(result.payback, Payback::Never);
        assert_eq!(result.breakeven_days, None);
        assert_eq!(
            serde_json::to_value(result.payback).unwrap(),
            serde_json::json!("never")
        );
    }

    #[test]
    fn test_payback_serializes_days() {
        assert_eq!(
            serde_json::to_value(Payback::Days(12)).unwrap(),
            serde_json::json!({ "days": 12 })
        );
    }

    #[test]
    fn test_zero_capex() {
        let request = CalculationRequest {
            capex_eur: 0.0,
            ..reference_request()
        };
        let result = run(&request).unwrap();
        assert_eq!(result.payback, Payback::Days(0));
        assert_eq!(result.roi, None);
        assert_eq!(result.daily_capex_amortized_eur, 0.0);
    }

    #[test]
    fn test_miner_id_overrides_explicit_values() {
        let request = CalculationRequest {
            miner_id: Some("antminer_s21_200th_air".into()),
            miner_power_w: Some(9999.0),
            miner_hashrate_th: Some(9999.0),
            ..reference_request()
        };
        let result = run(&request).unwrap();
        assert_eq!(result.inputs_echo.miner_power_w, 3500.0);
        assert_eq!(result.inputs_echo.miner_hashrate_th, 200.0);
        assert_eq!(result, {
            let mut explicit = run(&reference_request()).unwrap();
            explicit.inputs_echo.miner_id = Some("antminer_s21_200th_air".into());
            explicit
        });
    }

    #[test]
    fn test_unknown_miner() {
        let request = CalculationRequest {
            miner_id: Some("antminer_s9".into()),
            ..reference_request()
        };
        let err = run(&request).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "miner", .. }));
    }

    #[test]
    fn test_notes_copied_from_assumptions() {
        let old = assumptions::get_assumptions(Some("2024.04.0")).unwrap();
        let result = calculate(&reference_request(), old, &Catalog::builtin()).unwrap();
        assert_eq!(result.assumptions_version, "2024.04.0");
        assert_eq!(result.notes, old.simplifications);
    }

    #[test_case(|r| r.miners_count = 0, "miners_count" ; "zero miners")]
    #[test_case(|r| r.horizon_days = 0, "horizon_days" ; "zero horizon")]
    #[test_case(|r| r.uptime = 0.0, "uptime" ; "zero uptime")]
    #[test_case(|r| r.uptime = 1.01, "uptime" ; "uptime above one")]
    #[test_case(|r| r.uptime = f64::NAN, "uptime" ; "uptime nan")]
    #[test_case(|r| r.pool_fee = 1.0, "pool_fee" ; "pool fee one")]
    #[test_case(|r| r.pool_fee = -0.1, "pool_fee" ; "negative pool fee")]
    #[test_case(|r| r.btc_price_eur = 0.0, "btc_price_eur" ; "zero price")]
    #[test_case(|r| r.network_hashrate_eh = 0.0, "network_hashrate_eh" ; "zero network")]
    #[test_case(
        |r| r.network_hashrate_eh = f64::INFINITY, "network_hashrate_eh" ; "infinite network"
    )]
    #[test_case(
        |r| r.electricity_eur_per_kwh = -0.01, "electricity_eur_per_kwh" ; "negative electricity"
    )]
    #[test_case(|r| r.capex_eur = -1.0, "capex_eur" ; "negative capex")]
    #[test_case(|r| r.opex_eur_month = -1.0, "opex_eur_month" ; "negative opex")]
    #[test_case(|r| r.miner_hashrate_th = Some(0.0), "miner_hashrate_th" ; "zero hashrate")]
    #[test_case(|r| r.miner_hashrate_th = None, "miner_hashrate_th" ; "missing hashrate")]
    #[test_case(|r| r.miner_power_w = None, "miner_power_w" ; "missing power")]
    fn test_validation(mutate: fn(&mut CalculationRequest), expected_field: &str) {
        let mut request = reference_request();
        mutate(&mut request);
        match run(&request) {
            Err(Error::Validation { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_defaults() {
        let request: CalculationRequest = serde_json::from_value(serde_json::json!({
            "miners_count": 1,
            "miner_id": "whatsminer_m60_186th_air",
            "electricity_eur_per_kwh": 0.1,
            "uptime": 1.0,
            "btc_price_eur": 50000.0,
            "network_hashrate_eh": 600.0,
            "pool_fee": 0.0,
            "capex_eur": 0.0,
            "opex_eur_month": 0.0
        }))
        .unwrap();
        assert_eq!(request.horizon_days, 365);
        assert_eq!(request.assumptions_version, None);
        assert!(run(&request).is_ok());
    }
}
