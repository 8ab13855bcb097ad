//! Static miner and preset catalogs.
//!
//! Plain data records, loaded once as statics. Add hardware or scenarios by
//! appending to the tables.

use serde::{Serialize, Serializer};
use strum::{Display, EnumString};

use crate::calc::CalculationRequest;

/// Cooling method of a miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Cooling {
    Air,
    Hydro,
}

/// One model of mining hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerSpec {
    /// Unique identifier
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Hashrate in TH/s
    pub hashrate_th: f64,
    /// Power draw in watts
    pub power_w: u32,
    pub cooling: Cooling,
    pub notes: Option<&'static str>,
}

impl MinerSpec {
    /// Energy efficiency in J/TH.
    pub fn efficiency_j_th(&self) -> f64 {
        f64::from(self.power_w) / self.hashrate_th
    }
}

// Hand-written so the derived efficiency travels with the record.
impl Serialize for MinerSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut s = serializer.serialize_struct("MinerSpec", 7)?;
        s.serialize_field("id", self.id)?;
        s.serialize_field("name", self.name)?;
        s.serialize_field("hashrate_th", &self.hashrate_th)?;
        s.serialize_field("power_w", &self.power_w)?;
        s.serialize_field("cooling", &self.cooling)?;
        s.serialize_field("notes", &self.notes)?;
        s.serialize_field("efficiency_j_th", &self.efficiency_j_th())?;
        s.end()
    }
}

/// Predefined calculation scenario.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub miners_count: u32,
    /// Reference into the miner catalog
    pub miner_id: &'static str,
    pub electricity_eur_per_kwh: f64,
    pub uptime: f64,
    pub btc_price_eur: f64,
    pub network_hashrate_eh: f64,
    pub pool_fee: f64,
    pub capex_eur: f64,
    pub opex_eur_month: f64,
    pub horizon_days: u32,
}

impl Preset {
    /// Turn the scenario into a request against the current assumptions.
    pub fn to_request(&self) -> CalculationRequest {
        CalculationRequest {
            assumptions_version: None,
            miners_count: self.miners_count,
            miner_id: Some(self.miner_id.to_string()),
            miner_power_w: None,
            miner_hashrate_th: None,
            electricity_eur_per_kwh: self.electricity_eur_per_kwh,
            uptime: self.uptime,
            btc_price_eur: self.btc_price_eur,
            network_hashrate_eh: self.network_hashrate_eh,
            pool_fee: self.pool_fee,
            capex_eur: self.capex_eur,
            opex_eur_month: self.opex_eur_month,
            horizon_days: self.horizon_days,
        }
    }
}

static MINERS: &[MinerSpec] = &[
    MinerSpec {
        id: "antminer_s21_200th_air",
        name: "Antminer S21 (200 TH/s)",
        hashrate_th: 200.0,
        power_w: 3500,
        cooling: Cooling::Air,
        notes: Some("Standard air-cooled configuration"),
    },
    MinerSpec {
        id: "antminer_s21_pro_234th_air",
        name: "Antminer S21 Pro (234 TH/s)",
        hashrate_th: 234.0,
        power_w: 3510,
        cooling: Cooling::Air,
        notes: Some("Pro model with enhanced performance"),
    },
    MinerSpec {
        id: "antminer_s21_hydro_335th",
        name: "Antminer S21 Hydro (335 TH/s)",
        hashrate_th: 335.0,
        power_w: 5360,
        cooling: Cooling::Hydro,
        notes: Some("Requires a water loop and dry cooler"),
    },
    MinerSpec {
        id: "whatsminer_m60_186th_air",
        name: "Whatsminer M60 (186 TH/s)",
        hashrate_th: 186.0,
        power_w: 3400,
        cooling: Cooling::Air,
        notes: Some("Efficient air-cooled option"),
    },
];

static PRESETS: &[Preset] = &[
    Preset {
        id: "home_miner",
        name: "Home Miner",
        description: "Small-scale home mining setup with a few units",
        miners_count: 5,
        miner_id: "antminer_s21_200th_air",
        electricity_eur_per_kwh: 0.10,
        uptime: 0.90,
        btc_price_eur: 40_000.0,
        network_hashrate_eh: 500.0,
        pool_fee: 0.02,
        capex_eur: 25_000.0,
        opex_eur_month: 300.0,
        horizon_days: 365,
    },
    Preset {
        id: "hydro_1mw",
        name: "1 MW Hydro Facility",
        description: "Medium-scale facility with renewable hydro power",
        miners_count: 280,
        miner_id: "antminer_s21_pro_234th_air",
        electricity_eur_per_kwh: 0.04,
        uptime: 0.97,
        btc_price_eur: 40_000.0,
        network_hashrate_eh: 500.0,
        pool_fee: 0.015,
        capex_eur: 1_500_000.0,
        opex_eur_month: 15_000.0,
        horizon_days: 730,
    },
];

/// Read-only view over the miner and preset tables.
///
/// The calculation engine takes a catalog by reference so tests can supply
/// their own hardware.
#[derive(Debug, Clone, Copy)]
pub struct Catalog {
    miners: &'static [MinerSpec],
    presets: &'static [Preset],
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// The compiled-in catalog.
    pub const fn builtin() -> Self {
        Self {
            miners: MINERS,
            presets: PRESETS,
        }
    }

    /// A catalog over caller-provided tables.
    pub const fn new(miners: &'static [MinerSpec], presets: &'static [Preset]) -> Self {
        Self { miners, presets }
    }

    pub fn miners(&self) -> &'static [MinerSpec] {
        self.miners
    }

    pub fn presets(&self) -> &'static [Preset] {
        self.presets
    }

    /// Find a miner by id.
    pub fn miner(&self, id: &str) -> Option<&'static MinerSpec> {
        self.miners.iter().find(|m| m.id == id)
    }

    /// Find a preset by id.
    pub fn preset(&self, id: &str) -> Option<&'static Preset> {
        self.presets.iter().find(|p| p.id == id)
    }
}
