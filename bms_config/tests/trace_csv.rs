use std::fs::File;
use std::io::Write;

use bms_config::{TRACE_HEADERS, load_trace_csv, parse_trace_csv};
use rstest::rstest;
use tempfile::tempdir;

fn header_line() -> String {
    TRACE_HEADERS.join(",")
}

#[rstest]
fn parses_well_formed_trace() {
    let csv = format!(
        "{}\n{}\n{}\n",
        header_line(),
        "true,false,false,false,false,false,3700,3710,200",
        "true,false,false,false,false,false,2850,3710,200",
    );
    let rows = parse_trace_csv(csv.as_bytes()).expect("parse trace");
    assert_eq!(rows.len(), 2);
    assert!(rows[0].ignition);
    assert!(!rows[0].charge_enable);
    assert_eq!(rows[1].low_cell_mv, 2850);
    assert_eq!(rows[1].pack_temp_dc, 200);
}

#[rstest]
fn trims_whitespace_in_fields() {
    let csv = format!(
        "{}\n{}\n",
        header_line(),
        "true, false, false, false, false, false, 3700, 3710, 200",
    );
    let rows = parse_trace_csv(csv.as_bytes()).expect("parse trace");
    assert_eq!(rows[0].high_cell_mv, 3710);
}

#[rstest]
fn rejects_wrong_headers() {
    let csv = "ignition,charge_enable,low_cell_mv\ntrue,false,3700\n";
    let err = parse_trace_csv(csv.as_bytes()).expect_err("should reject headers");
    assert!(format!("{err}").contains("must have headers"));
}

#[rstest]
fn rejects_non_boolean_row_with_line_number() {
    let csv = format!(
        "{}\n{}\n{}\n",
        header_line(),
        "true,false,false,false,false,false,3700,3710,200",
        "maybe,false,false,false,false,false,3700,3710,200",
    );
    let err = parse_trace_csv(csv.as_bytes()).expect_err("should reject bad bool");
    assert!(format!("{err}").contains("invalid CSV row 3"));
}

#[rstest]
fn rejects_empty_trace() {
    let csv = format!("{}\n", header_line());
    let err = parse_trace_csv(csv.as_bytes()).expect_err("should reject empty trace");
    assert!(format!("{err}").contains("no data rows"));
}

#[rstest]
fn loads_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("trace.csv");

    let mut f = File::create(&path).unwrap();
    writeln!(f, "{}", header_line()).unwrap();
    writeln!(f, "false,true,false,false,false,false,4100,4120,150").unwrap();

    let rows = load_trace_csv(&path).expect("load trace");
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].ignition);
    assert!(rows[0].charge_enable);
    assert_eq!(rows[0].low_cell_mv, 4100);
}

#[rstest]
fn missing_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_trace_csv(&path).expect_err("should fail on missing file");
    assert!(format!("{err}").contains("open trace CSV"));
}
