#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not. A config that
    // validates must also make it through the core's conversions.
    let Ok(cfg) = bms_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        let _layout = bms_core::PackLayout::from(&cfg.pack);
        let _est = bms_core::EstimatorCfg::from(&cfg);
        let _acq = bms_core::AcquisitionCfg::from(&cfg.acquisition);
    }
});
