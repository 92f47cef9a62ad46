use std::fs::File;
use std::io::Write;

use bms_config::{TableData, TableRow, load_table_csv};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn loads_table_with_exact_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ocv.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "ocv_v,soc").unwrap();
    writeln!(f, "3.0,0.0").unwrap();
    writeln!(f, " 3.6 , 0.5").unwrap();
    writeln!(f, "4.2,1.0").unwrap();
    drop(f);

    let t = load_table_csv(&path, ["ocv_v", "soc"]).unwrap();
    assert_eq!(t.x, vec![3.0, 3.6, 4.2]);
    assert_eq!(t.y, vec![0.0, 0.5, 1.0]);
}

#[rstest]
fn rejects_wrong_headers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ocv.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "voltage,soc").unwrap();
    writeln!(f, "3.0,0.0").unwrap();
    writeln!(f, "4.2,1.0").unwrap();
    drop(f);

    let err = load_table_csv(&path, ["ocv_v", "soc"]).expect_err("bad header");
    assert!(err.to_string().contains("must have headers 'ocv_v,soc'"));
}

#[rstest]
fn rejects_unparseable_row_with_line_number() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("soe.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "soc,soe").unwrap();
    writeln!(f, "0.0,0.0").unwrap();
    writeln!(f, "half,0.5").unwrap();
    drop(f);

    let err = load_table_csv(&path, ["soc", "soe"]).expect_err("bad row");
    assert!(err.to_string().contains("row 3"), "{err}");
}

#[rstest]
fn rejects_decreasing_domain() {
    let rows = vec![
        TableRow { x: 4.2, y: 1.0 },
        TableRow { x: 3.0, y: 0.0 },
    ];
    let err = TableData::from_rows(rows).expect_err("decreasing");
    assert!(err.to_string().contains("strictly increasing"));
}

#[rstest]
fn rejects_single_row() {
    let err = TableData::from_rows(vec![TableRow { x: 1.0, y: 1.0 }]).expect_err("short");
    assert!(err.to_string().contains("at least two rows"));
}

#[rstest]
fn missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_table_csv(&path, ["soc", "soe"]).expect_err("missing");
    assert!(err.to_string().contains("nope.csv"));
}
