//! Chemistry table loading and the `lookup` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bms_core::error::{BmsError, Result as CoreResult};
use bms_core::lookup::LookupTable;
use bms_core::tables;
use eyre::WrapErr;

use crate::cli::TableArg;

pub const SOC_BY_OCV_HEADERS: [&str; 2] = ["ocv_v", "soc"];
pub const SOE_FROM_SOC_HEADERS: [&str; 2] = ["soc", "soe"];

/// SOC-by-OCV and SOE-from-SOC tables in effect for a config.
#[derive(Debug, Clone)]
pub struct Chemistry {
    pub soc_by_ocv: Arc<LookupTable>,
    pub soe_from_soc: Arc<LookupTable>,
}

/// CSV paths in the config are relative to the config file.
fn resolve(config_path: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    config_path
        .parent()
        .map_or_else(|| p.to_path_buf(), |dir| dir.join(p))
}

fn from_csv(name: &str, path: &Path, headers: [&str; 2]) -> CoreResult<LookupTable> {
    let data = bms_config::load_table_csv(path, headers)?;
    let table = LookupTable::new(name, data.x, data.y)
        .map_err(BmsError::from)
        .wrap_err_with(|| format!("table {name} from {}", path.display()))?;
    tracing::info!(table = name, path = %path.display(), points = table.len(), "loaded chemistry table");
    Ok(table)
}

/// Built-in VTC6 curves unless `[chemistry]` points at CSV overrides.
pub fn load_chemistry(cfg: &bms_config::Config, config_path: &Path) -> CoreResult<Chemistry> {
    let soc_by_ocv = match cfg.chemistry.soc_by_ocv_csv.as_deref() {
        Some(f) => from_csv("soc_by_ocv", &resolve(config_path, f), SOC_BY_OCV_HEADERS)?,
        None => tables::vtc6_soc_by_ocv().map_err(BmsError::from)?,
    };
    let soe_from_soc = match cfg.chemistry.soe_from_soc_csv.as_deref() {
        Some(f) => from_csv("soe_from_soc", &resolve(config_path, f), SOE_FROM_SOC_HEADERS)?,
        None => tables::vtc6_soe_from_soc().map_err(BmsError::from)?,
    };
    Ok(Chemistry {
        soc_by_ocv: Arc::new(soc_by_ocv),
        soe_from_soc: Arc::new(soe_from_soc),
    })
}

pub fn table_name(t: TableArg) -> &'static str {
    match t {
        TableArg::SocByOcv => "soc-by-ocv",
        TableArg::SoeFromSoc => "soe-from-soc",
        TableArg::Ntc => "ntc",
        TableArg::Zener => "zener",
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupResult {
    pub y: f32,
    /// `x` fell outside the table domain and was clamped to an end point.
    pub clamped: bool,
}

pub fn run_lookup(chem: &Chemistry, table: TableArg, x: f32) -> CoreResult<LookupResult> {
    let owned;
    let t: &LookupTable = match table {
        TableArg::SocByOcv => &chem.soc_by_ocv,
        TableArg::SoeFromSoc => &chem.soe_from_soc,
        TableArg::Ntc => {
            owned = tables::ntc_temperature().map_err(BmsError::from)?;
            &owned
        }
        TableArg::Zener => {
            owned = tables::zener_temperature().map_err(BmsError::from)?;
            &owned
        }
    };
    let y = t.try_lookup(x).map_err(BmsError::from)?;
    let (lo, hi) = t.domain();
    Ok(LookupResult {
        y,
        clamped: x < lo || x > hi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn builtin() -> Chemistry {
        load_chemistry(&bms_config::Config::default(), Path::new("cfg.toml")).unwrap()
    }

    #[test]
    fn relative_csv_paths_follow_the_config_file() {
        assert_eq!(
            resolve(Path::new("/etc/bms/cfg.toml"), "ocv.csv"),
            PathBuf::from("/etc/bms/ocv.csv")
        );
        assert_eq!(
            resolve(Path::new("/etc/bms/cfg.toml"), "/tmp/ocv.csv"),
            PathBuf::from("/tmp/ocv.csv")
        );
    }

    #[test]
    fn csv_override_replaces_builtin_curve() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ocv.csv"), "ocv_v,soc\n3.0,0.0\n4.0,1.0\n").unwrap();
        let cfg_path = dir.path().join("cfg.toml");
        let cfg = bms_config::load_toml("[chemistry]\nsoc_by_ocv_csv = \"ocv.csv\"\n").unwrap();
        let chem = load_chemistry(&cfg, &cfg_path).unwrap();
        let r = run_lookup(&chem, TableArg::SocByOcv, 3.5).unwrap();
        assert!((r.y - 0.5).abs() < 1e-6);
        assert!(!r.clamped);
    }

    #[test]
    fn out_of_domain_input_is_clamped() {
        let chem = builtin();
        let r = run_lookup(&chem, TableArg::SocByOcv, 5.0).unwrap();
        assert!((r.y - 1.0).abs() < 1e-6);
        assert!(r.clamped);
    }

    #[test]
    fn nan_input_is_an_error() {
        let chem = builtin();
        assert!(run_lookup(&chem, TableArg::Ntc, f32::NAN).is_err());
    }
}
