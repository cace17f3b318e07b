//! Typed records for the three OpenFlights data files.
//!
//! The `.dat` files are headerless CSV with standard quoting; `\N` and the
//! empty string both mean null. Each parse function reads raw positional rows,
//! then coerces them into a typed record. Rows that cannot be coerced are
//! dropped and counted on the stage report; they never reach the database.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use log::info;
use regex::Regex;
use serde::Deserialize;

use crate::summary::StageReport;

const NULL_SENTINEL: &str = "\\N";

/// One row of airports.dat, mapped onto `Airport` node properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Airport {
    pub airport_id: i64,
    pub name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<i64>,
    pub timezone_offset: Option<f64>,
    pub dst: Option<String>,
    pub timezone: Option<String>,
    pub airport_type: Option<String>,
    pub source: Option<String>,
}

/// One row of airlines.dat, mapped onto `Airline` node properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Airline {
    pub airline_id: i64,
    pub name: Option<String>,
    pub alias: Option<String>,
    pub iata: Option<String>,
    pub icao: Option<String>,
    pub callsign: Option<String>,
    pub country: Option<String>,
    pub active: bool,
}

/// One row of routes.dat, mapped onto a `FLIGHT` relationship between the
/// airports identified by `src_id` and `dst_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub airline_code: Option<String>,
    pub airline_id: Option<i64>,
    pub src_id: i64,
    pub dst_id: i64,
    pub codeshare: bool,
    pub stops: i64,
    pub equipment: Option<String>,
}

// Raw positional rows as they appear on disk. Fields stay strings here so
// that a malformed value fails in the coercion step with a counted RowError
// instead of killing the whole csv record stream.

#[derive(Debug, Deserialize)]
struct RawAirport {
    airport_id: String,
    name: String,
    city: String,
    country: String,
    iata: String,
    icao: String,
    latitude: String,
    longitude: String,
    altitude: String,
    timezone_offset: String,
    dst: String,
    timezone: String,
    airport_type: String,
    source: String,
}

#[derive(Debug, Deserialize)]
struct RawAirline {
    airline_id: String,
    name: String,
    alias: String,
    iata: String,
    icao: String,
    callsign: String,
    country: String,
    active: String,
}

#[derive(Debug, Deserialize)]
struct RawRoute {
    airline_code: String,
    airline_id: String,
    // The textual codes exist only to consume their columns; the numeric IDs
    // are the join keys.
    #[allow(dead_code)]
    src_code: String,
    src_id: String,
    #[allow(dead_code)]
    dst_code: String,
    dst_id: String,
    codeshare: String,
    stops: String,
    equipment: String,
}

/// Compiled shape checks for IATA/ICAO codes. Airport and airline codes have
/// different lengths, so each entity gets its own pair.
struct CodePatterns {
    iata: Regex,
    icao: Regex,
}

impl CodePatterns {
    fn airports() -> Self {
        Self {
            iata: Regex::new("^[A-Z0-9]{3}$").unwrap(),
            icao: Regex::new("^[A-Z0-9]{4}$").unwrap(),
        }
    }

    fn airlines() -> Self {
        Self {
            iata: Regex::new("^[A-Z0-9]{2}$").unwrap(),
            icao: Regex::new("^[A-Z0-9]{3}$").unwrap(),
        }
    }
}

fn non_null(value: &str) -> Option<&str> {
    if value.is_empty() || value == NULL_SENTINEL {
        None
    } else {
        Some(value)
    }
}

fn opt_string(value: &str) -> Option<String> {
    non_null(value).map(str::to_string)
}

/// Optional numeric columns degrade to null when unparsable, matching the
/// source data's tolerance for junk in non-key fields.
fn opt_f64(value: &str) -> Option<f64> {
    non_null(value).and_then(|v| v.parse().ok())
}

fn opt_i64(value: &str) -> Option<i64> {
    non_null(value).and_then(|v| v.parse().ok())
}

/// Identifier columns fail closed: a missing or non-numeric value drops the
/// whole row with a recorded RowError.
fn req_i64(
    value: &str,
    column: &str,
    row: u64,
    report: &mut StageReport,
) -> Option<i64> {
    match non_null(value).map(|v| v.parse::<i64>()) {
        Some(Ok(id)) => Some(id),
        _ => {
            report.record_row_error(
                row,
                format!("{} {:?} is not an integer, row dropped", column, value),
            );
            None
        }
    }
}

/// A code that does not match the expected shape is nulled and counted; the
/// row itself survives.
fn checked_code(
    value: &str,
    pattern: &Regex,
    column: &str,
    row: u64,
    report: &mut StageReport,
) -> Option<String> {
    let code = non_null(value)?;
    if pattern.is_match(code) {
        Some(code.to_string())
    } else {
        report.record_row_error(row, format!("{} code {:?} has invalid shape, nulled", column, code));
        None
    }
}

impl Airport {
    fn from_raw(raw: RawAirport, row: u64, codes: &CodePatterns, report: &mut StageReport) -> Option<Self> {
        let airport_id = req_i64(&raw.airport_id, "airport_id", row, report)?;
        Some(Airport {
            airport_id,
            name: opt_string(&raw.name),
            city: opt_string(&raw.city),
            country: opt_string(&raw.country),
            iata: checked_code(&raw.iata, &codes.iata, "iata", row, report),
            icao: checked_code(&raw.icao, &codes.icao, "icao", row, report),
            latitude: opt_f64(&raw.latitude),
            longitude: opt_f64(&raw.longitude),
            altitude: opt_i64(&raw.altitude),
            timezone_offset: opt_f64(&raw.timezone_offset),
            dst: opt_string(&raw.dst),
            timezone: opt_string(&raw.timezone),
            airport_type: opt_string(&raw.airport_type),
            source: opt_string(&raw.source),
        })
    }
}

impl Airline {
    fn from_raw(raw: RawAirline, row: u64, codes: &CodePatterns, report: &mut StageReport) -> Option<Self> {
        let airline_id = req_i64(&raw.airline_id, "airline_id", row, report)?;
        Some(Airline {
            airline_id,
            name: opt_string(&raw.name),
            alias: opt_string(&raw.alias),
            iata: checked_code(&raw.iata, &codes.iata, "iata", row, report),
            icao: checked_code(&raw.icao, &codes.icao, "icao", row, report),
            callsign: opt_string(&raw.callsign),
            country: opt_string(&raw.country),
            active: raw.active == "Y",
        })
    }
}

impl Route {
    fn from_raw(raw: RawRoute, row: u64, report: &mut StageReport) -> Option<Self> {
        // src_code/dst_code are redundant with the numeric IDs and are not
        // carried onto the relationship.
        let src_id = req_i64(&raw.src_id, "src_id", row, report)?;
        let dst_id = req_i64(&raw.dst_id, "dst_id", row, report)?;
        let stops = opt_i64(&raw.stops).unwrap_or(0);
        if stops < 0 {
            report.record_row_error(row, format!("negative stop count {}, row dropped", stops));
            return None;
        }
        Some(Route {
            airline_code: opt_string(&raw.airline_code),
            airline_id: opt_i64(&raw.airline_id),
            src_id,
            dst_id,
            codeshare: raw.codeshare == "Y",
            stops,
            equipment: opt_string(&raw.equipment),
        })
    }
}

macro_rules! parse_rows {
    ($input:expr, $report:expr, $raw:ty, $map:expr) => {{
        let mut rdr = ReaderBuilder::new().has_headers(false).from_reader($input);
        let mut records = Vec::new();
        for (idx, result) in rdr.deserialize::<$raw>().enumerate() {
            let row = idx as u64 + 1;
            $report.rows_read += 1;
            match result {
                Ok(raw) => {
                    if let Some(record) = $map(raw, row, &mut *$report) {
                        records.push(record);
                    }
                }
                Err(err) => $report.record_skipped(row, err),
            }
        }
        $report.rows_loadable = records.len();
        records
    }};
}

pub fn parse_airports<R: Read>(input: R, report: &mut StageReport) -> Vec<Airport> {
    let codes = CodePatterns::airports();
    parse_rows!(input, report, RawAirport, |raw, row, report| {
        Airport::from_raw(raw, row, &codes, report)
    })
}

pub fn parse_airlines<R: Read>(input: R, report: &mut StageReport) -> Vec<Airline> {
    let codes = CodePatterns::airlines();
    parse_rows!(input, report, RawAirline, |raw, row, report| {
        Airline::from_raw(raw, row, &codes, report)
    })
}

pub fn parse_routes<R: Read>(input: R, report: &mut StageReport) -> Vec<Route> {
    parse_rows!(input, report, RawRoute, Route::from_raw)
}

fn log_parse_result(path: &Path, report: &StageReport) {
    info!(
        "  Read {} rows from {:?} ({} parsed, {} skipped, {} row errors)",
        report.rows_read, path, report.rows_loadable, report.rows_skipped, report.row_errors
    );
}

pub fn parse_airports_file(path: &Path, report: &mut StageReport) -> Result<Vec<Airport>> {
    let file = File::open(path).with_context(|| format!("cannot open airports file {:?}", path))?;
    let records = parse_airports(file, report);
    log_parse_result(path, report);
    Ok(records)
}

pub fn parse_airlines_file(path: &Path, report: &mut StageReport) -> Result<Vec<Airline>> {
    let file = File::open(path).with_context(|| format!("cannot open airlines file {:?}", path))?;
    let records = parse_airlines(file, report);
    log_parse_result(path, report);
    Ok(records)
}

pub fn parse_routes_file(path: &Path, report: &mut StageReport) -> Result<Vec<Route>> {
    let file = File::open(path).with_context(|| format!("cannot open routes file {:?}", path))?;
    let records = parse_routes(file, report);
    log_parse_result(path, report);
    Ok(records)
}
