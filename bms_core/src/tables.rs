//! Built-in characterisation tables.
//!
//! Chemistry tables are for Sony/Murata VTC6 cells at rest, 101 points on a
//! 1% state-of-charge grid. Thermistor tables map the sense voltage of the
//! monitor's NTC and Zener front ends to degrees Celsius.

use crate::lookup::{LookupTable, TableError};

pub const VTC6_TABLE_LEN: usize = 101;
pub const THERMISTOR_TABLE_LEN: usize = 33;

/// Open-circuit cell voltage, volts. Pairs with [`VTC6_SOC`].
pub const VTC6_OCV_V: [f32; VTC6_TABLE_LEN] = [
    2.4833, 2.6490, 2.7794, 2.8712, 2.9375, 2.9893, 3.0316, 3.0676, 3.0982, 3.1251, 3.1509,
    3.1757, 3.2010, 3.2272, 3.2541, 3.2803, 3.3053, 3.3290, 3.3514, 3.3718, 3.3904, 3.4082,
    3.4253, 3.4405, 3.4596, 3.4804, 3.4917, 3.4997, 3.5067, 3.5135, 3.5202, 3.5271, 3.5349,
    3.5482, 3.5643, 3.5787, 3.5940, 3.6077, 3.6197, 3.6318, 3.6430, 3.6542, 3.6642, 3.6738,
    3.6832, 3.6931, 3.7025, 3.7117, 3.7213, 3.7310, 3.7403, 3.7491, 3.7582, 3.7673, 3.7759,
    3.7841, 3.7918, 3.8003, 3.8079, 3.8152, 3.8219, 3.8290, 3.8355, 3.8423, 3.8493, 3.8562,
    3.8637, 3.8724, 3.8822, 3.8941, 3.9072, 3.9206, 3.9335, 3.9463, 3.9598, 3.9728, 3.9857,
    3.9979, 4.0099, 4.0219, 4.0320, 4.0413, 4.0504, 4.0566, 4.0622, 4.0660, 4.0691, 4.0723,
    4.0756, 4.0784, 4.0819, 4.0855, 4.0898, 4.0948, 4.1006, 4.1087, 4.1177, 4.1298, 4.1445,
    4.1642, 4.2000,
];

/// State of charge, fraction.
pub const VTC6_SOC: [f32; VTC6_TABLE_LEN] = [
    0.0000, 0.0100, 0.0200, 0.0300, 0.0400, 0.0500, 0.0600, 0.0700, 0.0800, 0.0900, 0.1000,
    0.1100, 0.1200, 0.1300, 0.1400, 0.1500, 0.1600, 0.1700, 0.1800, 0.1900, 0.2000, 0.2100,
    0.2200, 0.2300, 0.2400, 0.2500, 0.2600, 0.2700, 0.2800, 0.2900, 0.3000, 0.3100, 0.3200,
    0.3300, 0.3400, 0.3500, 0.3600, 0.3700, 0.3800, 0.3900, 0.4000, 0.4100, 0.4200, 0.4300,
    0.4400, 0.4500, 0.4600, 0.4700, 0.4800, 0.4900, 0.5000, 0.5100, 0.5200, 0.5300, 0.5400,
    0.5500, 0.5600, 0.5700, 0.5800, 0.5900, 0.6000, 0.6100, 0.6200, 0.6300, 0.6400, 0.6500,
    0.6600, 0.6700, 0.6800, 0.6900, 0.7000, 0.7100, 0.7200, 0.7300, 0.7400, 0.7500, 0.7600,
    0.7700, 0.7800, 0.7900, 0.8000, 0.8100, 0.8200, 0.8300, 0.8400, 0.8500, 0.8600, 0.8700,
    0.8800, 0.8900, 0.9000, 0.9100, 0.9200, 0.9300, 0.9400, 0.9500, 0.9600, 0.9700, 0.9800,
    0.9900, 1.0000,
];

/// State of energy, fraction. Pairs with [`VTC6_SOC`].
pub const VTC6_SOE: [f32; VTC6_TABLE_LEN] = [
    0.0000, 0.0070, 0.0144, 0.0221, 0.0300, 0.0381, 0.0462, 0.0545, 0.0629, 0.0714, 0.0799,
    0.0886, 0.0972, 0.1060, 0.1148, 0.1237, 0.1326, 0.1417, 0.1508, 0.1599, 0.1691, 0.1784,
    0.1877, 0.1970, 0.2064, 0.2158, 0.2253, 0.2348, 0.2444, 0.2539, 0.2635, 0.2731, 0.2827,
    0.2923, 0.3020, 0.3117, 0.3215, 0.3313, 0.3411, 0.3510, 0.3609, 0.3708, 0.3808, 0.3907,
    0.4008, 0.4108, 0.4209, 0.4309, 0.4411, 0.4512, 0.4614, 0.4716, 0.4818, 0.4920, 0.5023,
    0.5126, 0.5229, 0.5332, 0.5435, 0.5539, 0.5643, 0.5747, 0.5851, 0.5956, 0.6061, 0.6165,
    0.6270, 0.6376, 0.6481, 0.6587, 0.6693, 0.6800, 0.6907, 0.7014, 0.7121, 0.7229, 0.7338,
    0.7446, 0.7555, 0.7664, 0.7774, 0.7884, 0.7994, 0.8104, 0.8215, 0.8325, 0.8436, 0.8547,
    0.8658, 0.8769, 0.8880, 0.8991, 0.9102, 0.9213, 0.9325, 0.9437, 0.9548, 0.9661, 0.9773,
    0.9886, 1.0000,
];

/// NTC divider sense voltage, volts. Pairs with [`THERMISTOR_TEMP_C`].
pub const NTC_SENSE_V: [f32; THERMISTOR_TABLE_LEN] = [
    0.699_434_3, 0.759_843, 0.825_834_8, 0.897_726_1, 0.975_784_6, 1.060_206_5, 1.151_089_6,
    1.248_403_2, 1.351_955_5, 1.461_362_8, 1.576_022_7, 1.695_098_1, 1.817_516, 1.941_985_5,
    2.067_036_2, 2.191_076_7, 2.312_467, 2.429_601_2, 2.540_992, 2.645_348_6, 2.741_642_2,
    2.829_149, 2.907_47, 2.976_522_4, 3.036_508_6, 3.087_868_7, 3.131_223_4, 3.167_314_5,
    3.196_949_7, 3.220_956, 3.240_140_7, 3.255_265_5, 3.267_025_7,
];

/// Zener reference sense voltage, volts. Pairs with [`THERMISTOR_TEMP_C`].
pub const ZENER_SENSE_V: [f32; THERMISTOR_TABLE_LEN] = [
    1.346_660_5, 1.356_527_8, 1.366_393_2, 1.376_256_7, 1.386_118_5, 1.395_978_4, 1.415_692_9,
    1.425_547_5, 1.445_251_4, 1.474_794_3, 1.494_481, 1.523_998_6, 1.553_501_4, 1.592_815_8,
    1.632_104_6, 1.671_368_4, 1.720_413_3, 1.779_216_7, 1.837_965_9, 1.896_661_5, 1.955_304_4,
    2.023_656, 2.082_189_3, 2.140_674_8, 2.199_115_5, 2.257_514_7, 2.296_426_8, 2.345_046,
    2.374_207_7, 2.403_363, 2.422_796_7, 2.442_228_3, 2.461_657_8,
];

/// Temperature grid shared by both thermistor tables, degrees Celsius.
pub const THERMISTOR_TEMP_C: [f32; THERMISTOR_TABLE_LEN] = [
    120.0, 115.0, 110.0, 105.0, 100.0, 95.0, 90.0, 85.0, 80.0, 75.0, 70.0, 65.0, 60.0, 55.0, 50.0,
    45.0, 40.0, 35.0, 30.0, 25.0, 20.0, 15.0, 10.0, 5.0, 0.0, -5.0, -10.0, -15.0, -20.0, -25.0,
    -30.0, -35.0, -40.0,
];

/// Cell SOC from resting cell voltage.
pub fn vtc6_soc_by_ocv() -> Result<LookupTable, TableError> {
    LookupTable::new("soc_by_ocv", VTC6_OCV_V.to_vec(), VTC6_SOC.to_vec())
}

/// Cell SOE from SOC.
pub fn vtc6_soe_from_soc() -> Result<LookupTable, TableError> {
    LookupTable::new("soe_from_soc", VTC6_SOC.to_vec(), VTC6_SOE.to_vec())
}

pub fn ntc_temperature() -> Result<LookupTable, TableError> {
    LookupTable::new("ntc", NTC_SENSE_V.to_vec(), THERMISTOR_TEMP_C.to_vec())
}

pub fn zener_temperature() -> Result<LookupTable, TableError> {
    LookupTable::new("zener", ZENER_SENSE_V.to_vec(), THERMISTOR_TEMP_C.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_tables_construct() {
        assert_eq!(vtc6_soc_by_ocv().unwrap().len(), VTC6_TABLE_LEN);
        assert_eq!(vtc6_soe_from_soc().unwrap().len(), VTC6_TABLE_LEN);
        assert_eq!(ntc_temperature().unwrap().len(), THERMISTOR_TABLE_LEN);
        assert_eq!(zener_temperature().unwrap().len(), THERMISTOR_TABLE_LEN);
    }

    #[test]
    fn vtc6_end_points() {
        let soc = vtc6_soc_by_ocv().unwrap();
        assert_eq!(soc.lookup(2.0), 0.0);
        assert_eq!(soc.lookup(4.2), 1.0);
        assert_eq!(soc.lookup(4.35), 1.0);
        let soe = vtc6_soe_from_soc().unwrap();
        assert!((soe.lookup(0.5) - 0.4614).abs() < 1e-4);
    }

    #[test]
    fn ntc_room_temperature() {
        let ntc = ntc_temperature().unwrap();
        assert!((ntc.lookup(NTC_SENSE_V[19]) - 25.0).abs() < 1e-3);
        // colder reads higher on this divider
        assert!(ntc.lookup(3.0) < ntc.lookup(2.0));
    }
}
