#![no_main]
use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    points: Vec<(f32, f32)>,
    queries: Vec<f32>,
}

fuzz_target!(|input: Input| {
    let (mut x, y): (Vec<f32>, Vec<f32>) = input.points.into_iter().take(256).unzip();
    // Sorting keeps most inputs past validation so the search gets exercised.
    x.sort_by(f32::total_cmp);
    let Ok(table) = bms_core::LookupTable::new("fuzz", x, y) else {
        return;
    };
    let (lo, hi) = table.domain();
    for q in input.queries {
        let _ = table.lookup(q);
        if q.is_finite() && q >= lo && q <= hi {
            assert!(table.bracket(q).is_some(), "no bracket for in-domain {q}");
        }
    }
});
