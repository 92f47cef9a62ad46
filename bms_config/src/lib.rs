#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and chemistry-table parsing for the pack management core.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Chemistry table CSV loader enforces headers and strict monotonicity of
//!   the domain column before the table is handed to the lookup engine.
use serde::Deserialize;

/// Upper bounds shared with the core's fixed-capacity containers.
pub const MAX_MODULES: usize = 32;
pub const MAX_BRICKS_PER_MODULE: usize = 16;
pub const MAX_BOARD_TEMPS_PER_MODULE: usize = 8;

/// One row of a two-column chemistry table CSV.
///
/// Expected headers depend on the table, e.g. for SOC-by-OCV:
/// ocv_v,soc
/// 2.4833,0.00
/// 2.6490,0.01
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TableRow {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PackCfg {
    /// Number of BMBs in the daisy chain
    pub modules: usize,
    pub bricks_per_module: usize,
    pub board_temps_per_module: usize,
    /// Rated capacity of a single cell
    pub cell_capacity_mah: f32,
    /// Cells wired in parallel inside each brick
    pub parallel_cells: u32,
}

impl Default for PackCfg {
    fn default() -> Self {
        Self {
            modules: 1,
            bricks_per_module: 12,
            board_temps_per_module: 4,
            cell_capacity_mah: 3000.0,
            parallel_cells: 1,
        }
    }
}

/// Leaky bucket parameters for a single acquisition channel.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct BucketCfg {
    pub fill_threshold: u32,
    pub clear_threshold: u32,
    pub failure_fill_count: u32,
    pub success_drain_count: u32,
}

impl Default for BucketCfg {
    fn default() -> Self {
        Self {
            fill_threshold: 200,
            clear_threshold: 100,
            failure_fill_count: 10,
            success_drain_count: 1,
        }
    }
}

/// Which lookup table converts a temperature sense voltage to Celsius.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SenseKind {
    #[default]
    Ntc,
    Zener,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AcquisitionCfg {
    pub voltage: BucketCfg,
    pub temperature: BucketCfg,
    pub current: BucketCfg,
    pub brick_sensor: SenseKind,
    pub board_sensor: SenseKind,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AggregationCfg {
    pub min_valid_brick_v: f32,
    pub max_valid_brick_v: f32,
    pub min_valid_temp_c: f32,
    pub max_valid_temp_c: f32,
    /// Allowed |stack - block| before a module is flagged
    pub stack_block_tolerance_v: f32,
}

impl Default for AggregationCfg {
    fn default() -> Self {
        Self {
            min_valid_brick_v: 0.5,
            max_valid_brick_v: 5.0,
            min_valid_temp_c: -40.0,
            max_valid_temp_c: 120.0,
            stack_block_tolerance_v: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BalancingCfg {
    /// Max allowable voltage difference above the pack minimum before bleeding
    pub threshold_v: f32,
    /// No bleeding above this cell temperature
    pub max_bleed_temp_c: f32,
}

impl Default for BalancingCfg {
    fn default() -> Self {
        Self {
            threshold_v: 0.002,
            max_bleed_temp_c: 60.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EstimatorCfg {
    /// |current| below this counts as resting
    pub rest_current_a: f32,
    /// Rest time before SOC-by-OCV is trusted
    pub qualification_s: u64,
    /// Re-seed the coulomb counter from OCV whenever qualification completes
    pub reseed_on_ocv_good: bool,
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            rest_current_a: 0.5,
            qualification_s: 5 * 60,
            reseed_on_ocv_good: false,
        }
    }
}

/// Optional CSV overrides for the built-in chemistry curves.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ChemistryCfg {
    /// headers: ocv_v,soc
    pub soc_by_ocv_csv: Option<String>,
    /// headers: soc,soe
    pub soe_from_soc_csv: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PersistenceCfg {
    /// Where the coulomb counter seed is stored; None disables persistence
    pub state_file: Option<String>,
    /// Seeds older than this are ignored on restart
    pub max_seed_age_s: u64,
    /// Save the seed every N cycles (0 = only on shutdown)
    pub save_every_cycles: u64,
}

impl Default for PersistenceCfg {
    fn default() -> Self {
        Self {
            state_file: None,
            max_seed_age_s: 24 * 60 * 60,
            save_every_cycles: 600,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Current sensor sampled on its own thread
    #[default]
    Sampler,
    /// Current read inside the cycle
    Direct,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerCfg {
    pub mode: RunMode,
    /// Voltage/temperature acquisition period
    pub cycle_ms: u64,
    /// Current sensor sampling rate in sampler mode
    pub current_sample_hz: u32,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Sampler,
            cycle_ms: 50,
            current_sample_hz: 200,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Parameters of the simulated pack used when no hardware backend is present.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationCfg {
    pub initial_soc: f32,
    /// Constant bus current drawn by the simulated load (positive = discharge)
    pub load_current_a: f32,
    /// Per-brick voltage spread in millivolts, applied as a ramp across bricks
    pub brick_spread_mv: f32,
    /// Fail every Nth voltage acquisition (0 = never)
    pub fail_voltage_every: u32,
    /// Sense voltage reported on all temperature channels
    pub temperature_sense_v: f32,
    /// Run against simulated time instead of the wall clock
    pub fast_forward: bool,
}

impl Default for SimulationCfg {
    fn default() -> Self {
        Self {
            initial_soc: 0.6,
            load_current_a: 0.0,
            brick_spread_mv: 10.0,
            fail_voltage_every: 0,
            // ~25 C on the NTC curve
            temperature_sense_v: 2.645,
            fast_forward: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub pack: PackCfg,
    pub acquisition: AcquisitionCfg,
    pub aggregation: AggregationCfg,
    pub balancing: BalancingCfg,
    pub estimator: EstimatorCfg,
    pub chemistry: ChemistryCfg,
    pub persistence: PersistenceCfg,
    pub runner: RunnerCfg,
    pub logging: Logging,
    pub simulation: SimulationCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Parsed two-column table, domain strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
}

impl TableData {
    /// Build from rows, rejecting short tables, non-finite values and a domain
    /// that is not strictly increasing.
    pub fn from_rows(rows: Vec<TableRow>) -> eyre::Result<Self> {
        if rows.len() < 2 {
            eyre::bail!("table requires at least two rows, got {}", rows.len());
        }
        for (i, r) in rows.iter().enumerate() {
            if !r.x.is_finite() || !r.y.is_finite() {
                eyre::bail!("table row {} has a non-finite value", i);
            }
        }
        for i in 1..rows.len() {
            if rows[i].x <= rows[i - 1].x {
                eyre::bail!(
                    "table domain must be strictly increasing (rows {} and {})",
                    i - 1,
                    i
                );
            }
        }
        let (x, y) = rows.iter().map(|r| (r.x, r.y)).unzip();
        Ok(Self { x, y })
    }
}

impl TryFrom<Vec<TableRow>> for TableData {
    type Error = eyre::Report;
    fn try_from(rows: Vec<TableRow>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

/// Load a chemistry table from CSV with the exact two `headers` given.
pub fn load_table_csv(path: &std::path::Path, headers: [&str; 2]) -> eyre::Result<TableData> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open table CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let actual: Vec<String> = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .iter()
        .map(|s| s.to_string())
        .collect();
    if actual != headers {
        eyre::bail!(
            "table CSV must have headers '{}', got: {}",
            headers.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        let parse = |col: usize| -> eyre::Result<f32> {
            let field = rec
                .get(col)
                .ok_or_else(|| eyre::eyre!("invalid CSV row {}: missing column", idx + 2))?;
            field
                .parse::<f32>()
                .map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))
        };
        rows.push(TableRow {
            x: parse(0)?,
            y: parse(1)?,
        });
    }

    TableData::try_from(rows)
}

impl BucketCfg {
    fn validate(&self, name: &str) -> eyre::Result<()> {
        if self.fill_threshold == 0 {
            eyre::bail!("acquisition.{name}.fill_threshold must be >= 1");
        }
        if self.clear_threshold >= self.fill_threshold {
            eyre::bail!("acquisition.{name}.clear_threshold must be < fill_threshold");
        }
        if self.failure_fill_count == 0 {
            eyre::bail!("acquisition.{name}.failure_fill_count must be >= 1");
        }
        if self.success_drain_count == 0 {
            eyre::bail!("acquisition.{name}.success_drain_count must be >= 1");
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pack
        if self.pack.modules == 0 || self.pack.modules > MAX_MODULES {
            eyre::bail!("pack.modules must be in [1, {MAX_MODULES}]");
        }
        if self.pack.bricks_per_module == 0 || self.pack.bricks_per_module > MAX_BRICKS_PER_MODULE
        {
            eyre::bail!("pack.bricks_per_module must be in [1, {MAX_BRICKS_PER_MODULE}]");
        }
        if self.pack.board_temps_per_module > MAX_BOARD_TEMPS_PER_MODULE {
            eyre::bail!("pack.board_temps_per_module must be <= {MAX_BOARD_TEMPS_PER_MODULE}");
        }
        if !(self.pack.cell_capacity_mah.is_finite() && self.pack.cell_capacity_mah > 0.0) {
            eyre::bail!("pack.cell_capacity_mah must be > 0");
        }
        if self.pack.parallel_cells == 0 {
            eyre::bail!("pack.parallel_cells must be >= 1");
        }

        // Acquisition
        self.acquisition.voltage.validate("voltage")?;
        self.acquisition.temperature.validate("temperature")?;
        self.acquisition.current.validate("current")?;

        // Aggregation
        let a = &self.aggregation;
        if !(a.min_valid_brick_v < a.max_valid_brick_v) {
            eyre::bail!("aggregation.min_valid_brick_v must be < max_valid_brick_v");
        }
        if !(a.min_valid_temp_c < a.max_valid_temp_c) {
            eyre::bail!("aggregation.min_valid_temp_c must be < max_valid_temp_c");
        }
        if !(a.stack_block_tolerance_v >= 0.0) {
            eyre::bail!("aggregation.stack_block_tolerance_v must be >= 0");
        }

        // Balancing
        if !(self.balancing.threshold_v >= 0.0 && self.balancing.threshold_v <= 0.5) {
            eyre::bail!("balancing.threshold_v must be in [0.0, 0.5]");
        }
        if !self.balancing.max_bleed_temp_c.is_finite() {
            eyre::bail!("balancing.max_bleed_temp_c must be finite");
        }

        // Estimator
        if !(self.estimator.rest_current_a > 0.0 && self.estimator.rest_current_a.is_finite()) {
            eyre::bail!("estimator.rest_current_a must be > 0");
        }
        if self.estimator.qualification_s == 0 {
            eyre::bail!("estimator.qualification_s must be >= 1");
        }
        if self.estimator.qualification_s > 24 * 60 * 60 {
            eyre::bail!("estimator.qualification_s is unreasonably large (>24h)");
        }

        // Runner
        if self.runner.cycle_ms == 0 {
            eyre::bail!("runner.cycle_ms must be >= 1");
        }
        if self.runner.current_sample_hz == 0 {
            eyre::bail!("runner.current_sample_hz must be > 0");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly (got {r:?})");
        }

        // Simulation
        if !(0.0..=1.0).contains(&self.simulation.initial_soc) {
            eyre::bail!("simulation.initial_soc must be in [0.0, 1.0]");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_firmware_defaults() {
        let cfg = load_toml("").expect("parse empty");
        assert_eq!(cfg.pack.modules, 1);
        assert_eq!(cfg.pack.bricks_per_module, 12);
        assert_eq!(cfg.acquisition.voltage.fill_threshold, 200);
        assert_eq!(cfg.estimator.qualification_s, 300);
        cfg.validate().expect("defaults validate");
    }

    #[test]
    fn sense_kind_parses_lowercase() {
        let cfg = load_toml("[acquisition]\nboard_sensor = \"zener\"\n").expect("parse");
        assert_eq!(cfg.acquisition.board_sensor, SenseKind::Zener);
        assert_eq!(cfg.acquisition.brick_sensor, SenseKind::Ntc);
    }

    #[test]
    fn table_rejects_flat_domain() {
        let rows = vec![TableRow { x: 1.0, y: 0.0 }, TableRow { x: 1.0, y: 1.0 }];
        let err = TableData::from_rows(rows).expect_err("flat domain");
        assert!(err.to_string().contains("strictly increasing"));
    }
}
