//! Pack state and aggregation.
//!
//! Every module holds fixed-capacity sample arrays plus the active counts the
//! pack was built with. Frames are checked against those counts before they
//! are stored. [`Pack::aggregate`] recomputes every statistic from the stored
//! samples; nothing is carried over between calls.

use bms_config::{MAX_BOARD_TEMPS_PER_MODULE, MAX_BRICKS_PER_MODULE, MAX_MODULES};
use thiserror::Error;

use crate::config::{AggregationCfg, PackLayout};
use crate::error::BuildError;
use crate::ranking::{Brick, BrickRanking, rank_bricks};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected {expected} module frames, got {got}")]
    ModuleCount { expected: usize, got: usize },
    #[error("module {0} out of range")]
    ModuleOutOfRange(usize),
    #[error("module {module}: expected {expected} {what} readings, got {got}")]
    ChannelCount {
        module: usize,
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Max / min / mean over the valid readings of a group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub max: f32,
    pub min: f32,
    pub avg: f32,
}

/// Running accumulator; `finish` is None when nothing valid was pushed.
#[derive(Debug, Clone, Copy)]
struct Acc {
    max: f32,
    min: f32,
    sum: f64,
    count: usize,
}

impl Acc {
    const EMPTY: Self = Self {
        max: f32::NEG_INFINITY,
        min: f32::INFINITY,
        sum: 0.0,
        count: 0,
    };

    fn push(&mut self, v: f32) {
        self.max = self.max.max(v);
        self.min = self.min.min(v);
        self.sum += f64::from(v);
        self.count += 1;
    }

    /// Fold in a group's stats weighted by its valid count.
    fn merge(&mut self, stats: Option<Stats>, count: usize) {
        if let Some(s) = stats {
            self.max = self.max.max(s.max);
            self.min = self.min.min(s.min);
            self.sum += f64::from(s.avg) * count as f64;
            self.count += count;
        }
    }

    fn finish(&self) -> Option<Stats> {
        (self.count > 0).then(|| Stats {
            max: self.max,
            min: self.min,
            avg: (self.sum / self.count as f64) as f32,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModuleAggregates {
    /// None when the module has no valid brick voltage.
    pub brick_v: Option<Stats>,
    pub valid_bricks: usize,
    /// Sum of brick voltages; None unless every brick is valid.
    pub stack_v: Option<f32>,
    pub block_v: Option<f32>,
    pub stack_block_mismatch: bool,
    pub brick_temp_c: Option<Stats>,
    pub valid_brick_temps: usize,
    pub board_temp_c: Option<Stats>,
    pub valid_board_temps: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PackAggregates {
    pub brick_v: Option<Stats>,
    pub valid_bricks: usize,
    pub brick_temp_c: Option<Stats>,
    pub board_temp_c: Option<Stats>,
    /// Modules whose brick-voltage aggregate is unavailable.
    pub unavailable_modules: usize,
    pub mismatched_modules: usize,
}

impl PackAggregates {
    /// Hottest valid reading over cells and boards.
    pub fn max_temp_c(&self) -> Option<f32> {
        match (self.brick_temp_c, self.board_temp_c) {
            (Some(a), Some(b)) => Some(a.max.max(b.max)),
            (Some(a), None) | (None, Some(a)) => Some(a.max),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    brick_v: [f32; MAX_BRICKS_PER_MODULE],
    brick_temp_c: [f32; MAX_BRICKS_PER_MODULE],
    board_temp_c: [f32; MAX_BOARD_TEMPS_PER_MODULE],
    brick_count: usize,
    board_count: usize,
    block_v: Option<f32>,
    aggregates: ModuleAggregates,
}

impl Module {
    fn new(brick_count: usize, board_count: usize) -> Self {
        Self {
            brick_v: [f32::NAN; MAX_BRICKS_PER_MODULE],
            brick_temp_c: [f32::NAN; MAX_BRICKS_PER_MODULE],
            board_temp_c: [f32::NAN; MAX_BOARD_TEMPS_PER_MODULE],
            brick_count,
            board_count,
            block_v: None,
            aggregates: ModuleAggregates::default(),
        }
    }

    pub fn brick_voltages(&self) -> &[f32] {
        &self.brick_v[..self.brick_count]
    }

    pub fn brick_temperatures(&self) -> &[f32] {
        &self.brick_temp_c[..self.brick_count]
    }

    pub fn board_temperatures(&self) -> &[f32] {
        &self.board_temp_c[..self.board_count]
    }

    pub fn block_voltage(&self) -> Option<f32> {
        self.block_v
    }

    pub fn aggregates(&self) -> &ModuleAggregates {
        &self.aggregates
    }

    /// Ascending ranking of the valid bricks.
    pub fn ranking(&self, cfg: &AggregationCfg) -> BrickRanking {
        rank_bricks(
            self.brick_voltages()
                .iter()
                .enumerate()
                .filter(|(_, v)| cfg.brick_valid(**v))
                .map(|(i, v)| Brick::new(i, *v)),
        )
    }

    fn aggregate(&mut self, cfg: &AggregationCfg) {
        let mut volts = Acc::EMPTY;
        for v in self.brick_voltages().iter().copied().filter(|v| cfg.brick_valid(*v)) {
            volts.push(v);
        }
        let all_valid = volts.count == self.brick_count;
        let stack_v = (all_valid && self.brick_count > 0)
            .then(|| self.brick_voltages().iter().sum::<f32>());
        let block_v = self.block_v.filter(|v| v.is_finite());
        let stack_block_mismatch = match (stack_v, block_v) {
            (Some(s), Some(b)) => (s - b).abs() > cfg.stack_block_tolerance_v,
            _ => false,
        };

        let mut brick_t = Acc::EMPTY;
        for c in self.brick_temperatures().iter().copied().filter(|c| cfg.temp_valid(*c)) {
            brick_t.push(c);
        }
        let mut board_t = Acc::EMPTY;
        for c in self.board_temperatures().iter().copied().filter(|c| cfg.temp_valid(*c)) {
            board_t.push(c);
        }

        self.aggregates = ModuleAggregates {
            brick_v: volts.finish(),
            valid_bricks: volts.count,
            stack_v,
            block_v,
            stack_block_mismatch,
            brick_temp_c: brick_t.finish(),
            valid_brick_temps: brick_t.count,
            board_temp_c: board_t.finish(),
            valid_board_temps: board_t.count,
        };
    }
}

#[derive(Debug, Clone)]
pub struct Pack {
    layout: PackLayout,
    modules: Vec<Module>,
    aggregates: PackAggregates,
}

impl Pack {
    pub fn new(layout: PackLayout) -> Result<Self, BuildError> {
        if layout.modules == 0 || layout.modules > MAX_MODULES {
            return Err(BuildError::InvalidConfig("modules must be in [1, MAX_MODULES]"));
        }
        if layout.bricks_per_module == 0 || layout.bricks_per_module > MAX_BRICKS_PER_MODULE {
            return Err(BuildError::InvalidConfig(
                "bricks_per_module must be in [1, MAX_BRICKS_PER_MODULE]",
            ));
        }
        if layout.board_temps_per_module > MAX_BOARD_TEMPS_PER_MODULE {
            return Err(BuildError::InvalidConfig(
                "board_temps_per_module must be <= MAX_BOARD_TEMPS_PER_MODULE",
            ));
        }
        // Allocated once here; never resized afterwards.
        let modules = (0..layout.modules)
            .map(|_| Module::new(layout.bricks_per_module, layout.board_temps_per_module))
            .collect();
        Ok(Self {
            layout,
            modules,
            aggregates: PackAggregates::default(),
        })
    }

    pub fn layout(&self) -> PackLayout {
        self.layout
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, index: usize) -> Option<&Module> {
        self.modules.get(index)
    }

    pub fn aggregates(&self) -> &PackAggregates {
        &self.aggregates
    }

    fn check_count(
        module: usize,
        what: &'static str,
        expected: usize,
        got: usize,
    ) -> Result<(), FrameError> {
        if expected == got {
            Ok(())
        } else {
            Err(FrameError::ChannelCount {
                module,
                what,
                expected,
                got,
            })
        }
    }

    /// Store one module's brick voltages and measured block voltage.
    pub fn set_module_voltages(
        &mut self,
        index: usize,
        brick_v: &[f32],
        block_v: Option<f32>,
    ) -> Result<(), FrameError> {
        let m = self
            .modules
            .get_mut(index)
            .ok_or(FrameError::ModuleOutOfRange(index))?;
        Self::check_count(index, "brick voltage", m.brick_count, brick_v.len())?;
        m.brick_v[..brick_v.len()].copy_from_slice(brick_v);
        m.block_v = block_v;
        Ok(())
    }

    /// Store one module's converted temperatures, degrees Celsius. A
    /// missing conversion is stored as NaN and never counts as valid.
    pub fn set_module_temperatures(
        &mut self,
        index: usize,
        brick_c: &[Option<f32>],
        board_c: &[Option<f32>],
    ) -> Result<(), FrameError> {
        let m = self
            .modules
            .get_mut(index)
            .ok_or(FrameError::ModuleOutOfRange(index))?;
        Self::check_count(index, "brick temperature", m.brick_count, brick_c.len())?;
        Self::check_count(index, "board temperature", m.board_count, board_c.len())?;
        for (slot, c) in m.brick_temp_c.iter_mut().zip(brick_c) {
            *slot = c.unwrap_or(f32::NAN);
        }
        for (slot, c) in m.board_temp_c.iter_mut().zip(board_c) {
            *slot = c.unwrap_or(f32::NAN);
        }
        Ok(())
    }

    /// Mark every brick voltage unavailable.
    pub fn clear_voltages(&mut self) {
        for m in &mut self.modules {
            m.brick_v = [f32::NAN; MAX_BRICKS_PER_MODULE];
            m.block_v = None;
        }
    }

    /// Mark every temperature unavailable.
    pub fn clear_temperatures(&mut self) {
        for m in &mut self.modules {
            m.brick_temp_c = [f32::NAN; MAX_BRICKS_PER_MODULE];
            m.board_temp_c = [f32::NAN; MAX_BOARD_TEMPS_PER_MODULE];
        }
    }

    /// Recompute module and pack aggregates from the stored samples.
    pub fn aggregate(&mut self, cfg: &AggregationCfg) -> &PackAggregates {
        let mut volts = Acc::EMPTY;
        let mut brick_t = Acc::EMPTY;
        let mut board_t = Acc::EMPTY;
        let mut unavailable_modules = 0;
        let mut mismatched_modules = 0;
        for m in &mut self.modules {
            m.aggregate(cfg);
            let a = &m.aggregates;
            volts.merge(a.brick_v, a.valid_bricks);
            brick_t.merge(a.brick_temp_c, a.valid_brick_temps);
            board_t.merge(a.board_temp_c, a.valid_board_temps);
            if a.brick_v.is_none() {
                unavailable_modules += 1;
            }
            if a.stack_block_mismatch {
                mismatched_modules += 1;
            }
        }
        self.aggregates = PackAggregates {
            brick_v: volts.finish(),
            valid_bricks: volts.count,
            brick_temp_c: brick_t.finish(),
            board_temp_c: board_t.finish(),
            unavailable_modules,
            mismatched_modules,
        };
        &self.aggregates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(modules: usize, bricks: usize) -> PackLayout {
        PackLayout {
            modules,
            bricks_per_module: bricks,
            board_temps_per_module: 2,
        }
    }

    #[test]
    fn module_and_pack_stats() {
        let cfg = AggregationCfg::default();
        let mut p = Pack::new(layout(2, 3)).unwrap();
        p.set_module_voltages(0, &[3.6, 3.7, 3.8], Some(11.1)).unwrap();
        p.set_module_voltages(1, &[3.5, 3.9, 3.9], None).unwrap();
        let agg = *p.aggregate(&cfg);

        let m0 = p.module(0).unwrap().aggregates();
        let s = m0.brick_v.unwrap();
        assert_eq!((s.max, s.min), (3.8, 3.6));
        assert!((s.avg - 3.7).abs() < 1e-6);
        assert!((m0.stack_v.unwrap() - 11.1).abs() < 1e-5);
        assert!(!m0.stack_block_mismatch);

        let pv = agg.brick_v.unwrap();
        assert_eq!((pv.max, pv.min), (3.9, 3.5));
        assert!((pv.avg - 22.4 / 6.0).abs() < 1e-5);
        assert_eq!(agg.valid_bricks, 6);
    }

    #[test]
    fn pack_average_is_brick_weighted() {
        let cfg = AggregationCfg::default();
        let mut p = Pack::new(layout(2, 3)).unwrap();
        // module 0 has one valid brick at 3.0, module 1 three at 4.0
        p.set_module_voltages(0, &[3.0, f32::NAN, 9.0], None).unwrap();
        p.set_module_voltages(1, &[4.0, 4.0, 4.0], None).unwrap();
        let agg = p.aggregate(&cfg);
        assert!((agg.brick_v.unwrap().avg - 3.75).abs() < 1e-6);
        assert_eq!(agg.valid_bricks, 4);
    }

    #[test]
    fn zero_valid_bricks_is_unavailable() {
        let cfg = AggregationCfg::default();
        let mut p = Pack::new(layout(2, 2)).unwrap();
        p.set_module_voltages(0, &[f32::NAN, 0.0], None).unwrap();
        p.set_module_voltages(1, &[3.7, 3.7], None).unwrap();
        let agg = *p.aggregate(&cfg);
        let m0 = p.module(0).unwrap().aggregates();
        assert_eq!(m0.brick_v, None);
        assert_eq!(m0.stack_v, None);
        assert_eq!(agg.unavailable_modules, 1);
        assert!(agg.brick_v.unwrap().avg.is_finite());

        p.clear_voltages();
        let agg = p.aggregate(&cfg);
        assert_eq!(agg.brick_v, None);
        assert_eq!(agg.unavailable_modules, 2);
    }

    #[test]
    fn flags_stack_block_divergence() {
        let cfg = AggregationCfg::default();
        let mut p = Pack::new(layout(1, 2)).unwrap();
        p.set_module_voltages(0, &[3.7, 3.7], Some(8.0)).unwrap();
        let agg = p.aggregate(&cfg);
        assert_eq!(agg.mismatched_modules, 1);
        assert!(p.module(0).unwrap().aggregates().stack_block_mismatch);
    }

    #[test]
    fn rejects_wrong_channel_counts() {
        let mut p = Pack::new(layout(1, 3)).unwrap();
        assert_eq!(
            p.set_module_voltages(0, &[3.7, 3.7], None),
            Err(FrameError::ChannelCount {
                module: 0,
                what: "brick voltage",
                expected: 3,
                got: 2
            })
        );
        assert_eq!(
            p.set_module_voltages(1, &[3.7; 3], None),
            Err(FrameError::ModuleOutOfRange(1))
        );
        assert!(p.set_module_temperatures(0, &[Some(25.0); 3], &[None]).is_err());
    }

    #[test]
    fn temperatures_aggregate_separately() {
        let cfg = AggregationCfg::default();
        let mut p = Pack::new(layout(1, 2)).unwrap();
        p.set_module_temperatures(0, &[Some(30.0), None], &[Some(40.0), Some(20.0)])
            .unwrap();
        let agg = *p.aggregate(&cfg);
        assert_eq!(agg.brick_temp_c.unwrap().max, 30.0);
        assert_eq!(agg.board_temp_c.unwrap().avg, 30.0);
        assert_eq!(agg.max_temp_c(), Some(40.0));
    }

    #[test]
    fn rejects_oversized_layout() {
        assert!(Pack::new(layout(MAX_MODULES + 1, 4)).is_err());
        assert!(Pack::new(layout(1, MAX_BRICKS_PER_MODULE + 1)).is_err());
        assert!(Pack::new(layout(0, 4)).is_err());
    }
}
