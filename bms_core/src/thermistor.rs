//! Temperature sense-voltage conversion.

use std::sync::Arc;

use crate::lookup::{LookupTable, TableError};
use crate::tables;

/// Front end a temperature channel is wired through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenseKind {
    #[default]
    Ntc,
    Zener,
}

#[derive(Debug, Clone)]
pub struct Thermistors {
    ntc: Arc<LookupTable>,
    zener: Arc<LookupTable>,
}

impl Thermistors {
    pub fn new(ntc: Arc<LookupTable>, zener: Arc<LookupTable>) -> Self {
        Self { ntc, zener }
    }

    /// Tables characterised for the monitor board's NTC and Zener channels.
    pub fn builtin() -> Result<Self, TableError> {
        Ok(Self::new(
            Arc::new(tables::ntc_temperature()?),
            Arc::new(tables::zener_temperature()?),
        ))
    }

    pub fn table(&self, kind: SenseKind) -> &LookupTable {
        match kind {
            SenseKind::Ntc => &self.ntc,
            SenseKind::Zener => &self.zener,
        }
    }

    /// Degrees Celsius for a sense voltage, clamped to the table's range.
    /// None for a non-finite reading.
    pub fn to_celsius(&self, kind: SenseKind, sense_v: f32) -> Option<f32> {
        if !sense_v.is_finite() {
            return None;
        }
        self.table(kind).try_lookup(sense_v).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_both_front_ends() {
        let t = Thermistors::builtin().unwrap();
        let ntc = t.to_celsius(SenseKind::Ntc, 2.645_348_6).unwrap();
        assert!((ntc - 25.0).abs() < 0.01);
        let zener = t.to_celsius(SenseKind::Zener, 1.896_661_5).unwrap();
        assert!((zener - 25.0).abs() < 0.01);
    }

    #[test]
    fn clamps_and_rejects_non_finite() {
        let t = Thermistors::builtin().unwrap();
        assert_eq!(t.to_celsius(SenseKind::Ntc, 0.1), Some(120.0));
        assert_eq!(t.to_celsius(SenseKind::Ntc, 3.3), Some(-40.0));
        assert_eq!(t.to_celsius(SenseKind::Ntc, f32::NAN), None);
    }
}
