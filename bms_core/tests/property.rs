use bms_core::config::{AggregationCfg, LeakyBucketCfg, PackLayout};
use bms_core::leaky_bucket::LeakyBucket;
use bms_core::lookup::LookupTable;
use bms_core::pack::{ModuleAggregates, Pack};
use bms_core::ranking::{Brick, rank_bricks};
use bms_core::tables;
use proptest::prelude::*;

proptest! {
    #[test]
    fn aggregating_unchanged_data_is_idempotent(
        volts in prop::collection::vec(prop::option::of(2.5f32..4.2), 8),
        temps in prop::collection::vec(prop::option::of(-10f32..70.0), 8),
    ) {
        let cfg = AggregationCfg::default();
        let mut p = Pack::new(PackLayout { modules: 2, bricks_per_module: 4, board_temps_per_module: 0 }).unwrap();
        for m in 0..2 {
            let v: Vec<f32> = volts[m * 4..m * 4 + 4].iter().map(|v| v.unwrap_or(f32::NAN)).collect();
            p.set_module_voltages(m, &v, None).unwrap();
            p.set_module_temperatures(m, &temps[m * 4..m * 4 + 4], &[]).unwrap();
        }
        let first = *p.aggregate(&cfg);
        let modules: Vec<ModuleAggregates> = p.modules().iter().map(|m| *m.aggregates()).collect();
        let second = *p.aggregate(&cfg);
        prop_assert_eq!(first, second);
        let again: Vec<ModuleAggregates> = p.modules().iter().map(|m| *m.aggregates()).collect();
        prop_assert_eq!(modules, again);
    }

    #[test]
    fn ranking_is_sorted_and_keeps_every_finite_brick(volts in prop::collection::vec(2.5f32..4.2, 0..16)) {
        let r = rank_bricks(volts.iter().enumerate().map(|(i, v)| Brick::new(i, *v)));
        prop_assert_eq!(r.len(), volts.len());
        for w in r.as_slice().windows(2) {
            prop_assert!(w[0].voltage_v <= w[1].voltage_v + 2e-4);
        }
        let mut idx: Vec<usize> = r.as_slice().iter().map(|b| b.index).collect();
        idx.sort_unstable();
        prop_assert_eq!(idx, (0..volts.len()).collect::<Vec<_>>());
    }

    #[test]
    fn bucket_latches_only_at_threshold(outcomes in prop::collection::vec(any::<bool>(), 0..500)) {
        let cfg = LeakyBucketCfg::default();
        let mut b = LeakyBucket::new("prop", cfg).unwrap();
        for ok in outcomes {
            let was = b.is_filled();
            if ok { b.on_success(); } else { b.on_failure(); }
            prop_assert!(b.fill_level() <= cfg.fill_threshold);
            if !was && b.is_filled() {
                prop_assert_eq!(b.fill_level(), cfg.fill_threshold);
            }
            if was && !b.is_filled() {
                prop_assert!(b.fill_level() < cfg.clear_threshold);
            }
        }
    }

    #[test]
    fn soc_table_is_monotone_and_bounded(a in 2.0f32..4.5, b in 2.0f32..4.5) {
        let t = tables::vtc6_soc_by_ocv().unwrap();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (ylo, yhi) = (t.lookup(lo), t.lookup(hi));
        prop_assert!(ylo <= yhi);
        prop_assert!((0.0..=1.0).contains(&ylo) && (0.0..=1.0).contains(&yhi));
        prop_assert!(!t.has_search_fault());
    }

    #[test]
    fn custom_tables_stay_within_y_range(ys in prop::collection::vec(0.0f32..100.0, 2..64), x in -10.0f32..200.0) {
        let xs: Vec<f32> = (0..ys.len()).map(|i| i as f32).collect();
        let t = LookupTable::new("prop", xs, ys.clone()).unwrap();
        let y = t.lookup(x);
        let min = ys.iter().copied().fold(f32::INFINITY, f32::min);
        let max = ys.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        prop_assert!(y >= min - 1e-3 && y <= max + 1e-3);
    }
}
