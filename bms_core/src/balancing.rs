//! Balancing policy.
//!
//! Decides which bricks to bleed; never touches hardware. The caller applies
//! the returned [`BleedMask`] through a `BleedDriver`.

use bms_config::{MAX_BRICKS_PER_MODULE, MAX_MODULES};

use crate::config::{AggregationCfg, BalancingCfg};
use crate::pack::Pack;

// One bit per brick.
const _: () = assert!(MAX_BRICKS_PER_MODULE <= u16::BITS as usize);

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BalanceMode {
    #[default]
    Off,
    /// Bleed every brick above the pack minimum plus the threshold.
    Relative,
    /// Bleed every brick above an absolute target, volts.
    ToVoltage(f32),
}

impl BalanceMode {
    /// Relative balancing when requested, otherwise off.
    pub fn relative(requested: bool) -> Self {
        if requested { Self::Relative } else { Self::Off }
    }
}

/// Externally surfaced conditions the policy must respect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interlocks {
    pub charging_disabled: bool,
    pub fault_active: bool,
    pub acquisition_degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InhibitReason {
    ChargingDisabled,
    FaultActive,
    AcquisitionDegraded,
    AggregatesUnavailable,
    TemperatureUnavailable,
    OverTemperature { max_c: f32 },
    InvalidTarget,
}

impl std::fmt::Display for InhibitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChargingDisabled => f.write_str("charging disabled"),
            Self::FaultActive => f.write_str("fault active"),
            Self::AcquisitionDegraded => f.write_str("acquisition degraded"),
            Self::AggregatesUnavailable => f.write_str("pack voltages unavailable"),
            Self::TemperatureUnavailable => f.write_str("cell temperatures unavailable"),
            Self::OverTemperature { max_c } => write!(f, "temperature {max_c:.1} C too high"),
            Self::InvalidTarget => f.write_str("invalid target voltage"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BalanceOutcome {
    Off,
    Inhibited(InhibitReason),
    Applied { threshold_v: f32, bleeding: usize },
}

/// Bleed enable per brick, one `u16` per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleedMask([u16; MAX_MODULES]);

impl Default for BleedMask {
    fn default() -> Self {
        Self([0; MAX_MODULES])
    }
}

impl BleedMask {
    pub fn set(&mut self, module: usize, brick: usize) {
        if module < MAX_MODULES && brick < MAX_BRICKS_PER_MODULE {
            self.0[module] |= 1 << brick;
        }
    }

    pub fn assign(&mut self, module: usize, brick: usize, enabled: bool) {
        if enabled {
            self.set(module, brick);
        } else if module < MAX_MODULES && brick < MAX_BRICKS_PER_MODULE {
            self.0[module] &= !(1 << brick);
        }
    }

    pub fn is_set(&self, module: usize, brick: usize) -> bool {
        module < MAX_MODULES && brick < MAX_BRICKS_PER_MODULE && self.0[module] & (1 << brick) != 0
    }

    pub fn module_bits(&self, module: usize) -> u16 {
        self.0.get(module).copied().unwrap_or(0)
    }

    pub fn count(&self) -> usize {
        self.0.iter().map(|m| m.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|m| *m == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceDecision {
    pub mask: BleedMask,
    pub outcome: BalanceOutcome,
}

impl BalanceDecision {
    fn all_off(outcome: BalanceOutcome) -> Self {
        Self {
            mask: BleedMask::default(),
            outcome,
        }
    }
}

/// Plan one balancing cycle against freshly aggregated pack data.
///
/// Any interlock yields an empty mask; the plan is never partially applied.
pub fn plan_balancing(
    pack: &Pack,
    mode: BalanceMode,
    interlocks: Interlocks,
    cfg: &BalancingCfg,
    agg_cfg: &AggregationCfg,
) -> BalanceDecision {
    if mode == BalanceMode::Off {
        return BalanceDecision::all_off(BalanceOutcome::Off);
    }
    if let Some(reason) = check_interlocks(pack, interlocks, cfg) {
        return BalanceDecision::all_off(BalanceOutcome::Inhibited(reason));
    }
    let agg = pack.aggregates();
    let threshold_v = match (mode, agg.brick_v) {
        (BalanceMode::Relative, Some(v)) => v.min + cfg.threshold_v,
        (BalanceMode::ToVoltage(target), _) if target.is_finite() => target,
        (BalanceMode::ToVoltage(_), _) => {
            return BalanceDecision::all_off(BalanceOutcome::Inhibited(
                InhibitReason::InvalidTarget,
            ));
        }
        _ => {
            return BalanceDecision::all_off(BalanceOutcome::Inhibited(
                InhibitReason::AggregatesUnavailable,
            ));
        }
    };

    let mut mask = BleedMask::default();
    for (m, module) in pack.modules().iter().enumerate() {
        // Tolerance-equal bricks keep arrival order, so the ranking is not
        // strictly ascending near the threshold; test every brick.
        let ranking = module.ranking(agg_cfg);
        for brick in ranking.descending().filter(|b| b.voltage_v > threshold_v) {
            mask.set(m, brick.index);
        }
    }
    BalanceDecision {
        mask,
        outcome: BalanceOutcome::Applied {
            threshold_v,
            bleeding: mask.count(),
        },
    }
}

fn check_interlocks(
    pack: &Pack,
    interlocks: Interlocks,
    cfg: &BalancingCfg,
) -> Option<InhibitReason> {
    if interlocks.charging_disabled {
        return Some(InhibitReason::ChargingDisabled);
    }
    if interlocks.fault_active {
        return Some(InhibitReason::FaultActive);
    }
    if interlocks.acquisition_degraded {
        return Some(InhibitReason::AcquisitionDegraded);
    }
    let agg = pack.aggregates();
    if agg.brick_v.is_none() || agg.unavailable_modules > 0 {
        return Some(InhibitReason::AggregatesUnavailable);
    }
    if agg.brick_temp_c.is_none() {
        return Some(InhibitReason::TemperatureUnavailable);
    }
    // Board sensors sit next to the bleed resistors.
    match agg.max_temp_c() {
        Some(max_c) if max_c > cfg.max_bleed_temp_c => {
            Some(InhibitReason::OverTemperature { max_c })
        }
        _ => None,
    }
}
