//! CSV formats.
//!
//! ## Endpoint CSV
//!
//! The intermediate file a drawing converter writes: a `X,Y,Z` header
//! followed by one row per segment endpoint. Consecutive rows pair into
//! segments (rows 1 and 2 are the first segment, rows 3 and 4 the
//! second, ...).
//!
//! ```text
//! X,Y,Z
//! 0,0,0
//! 10.5,0,0
//! ```
//!
//! ## Tour CSV
//!
//! The closed toolpath: a `X,Y` header followed by one row per tour
//! point, first point repeated at the end.
//!
//! Both writers are pure functions with no I/O; they return a `String`.

use std::fmt::Write;

use gridpath_pipeline::{Point3, Segment, Tour};

const ENDPOINT_HEADER: [&str; 3] = ["X", "Y", "Z"];

/// Errors from parsing an endpoint CSV.
///
/// Line numbers are 1-based and count blank lines.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CsvError {
    /// The input has no non-blank lines.
    #[error("missing X,Y,Z header")]
    MissingHeader,

    /// The first non-blank line is not `X,Y,Z`.
    #[error("line {line}: expected header X,Y,Z, found {found:?}")]
    InvalidHeader {
        /// Line number.
        line: usize,
        /// The offending line.
        found: String,
    },

    /// A data row does not have exactly three fields.
    #[error("line {line}: expected 3 columns, found {found}")]
    ColumnCount {
        /// Line number.
        line: usize,
        /// Number of fields present.
        found: usize,
    },

    /// A field is not a number.
    #[error("line {line}: column {column} is not a number: {value:?}")]
    InvalidNumber {
        /// Line number.
        line: usize,
        /// Column name (`X`, `Y` or `Z`).
        column: &'static str,
        /// The offending field.
        value: String,
    },
}

/// Parse an endpoint CSV into segments.
///
/// Fields may carry surrounding whitespace and blank lines are skipped.
/// A trailing unpaired endpoint is dropped with a warning.
///
/// # Errors
///
/// Returns a [`CsvError`] for a missing or wrong header, a row with the
/// wrong number of fields, or a field that does not parse as `f64`.
pub fn parse_endpoint_csv(input: &str) -> Result<Vec<Segment>, CsvError> {
    let mut lines = input
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let (header_line, header) = lines.next().ok_or(CsvError::MissingHeader)?;
    let is_header = header
        .split(',')
        .map(str::trim)
        .eq(ENDPOINT_HEADER.iter().copied());
    if !is_header {
        return Err(CsvError::InvalidHeader {
            line: header_line,
            found: header.to_owned(),
        });
    }

    let mut endpoints = Vec::new();
    for (line, row) in lines {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        let [x, y, z] = fields.as_slice() else {
            return Err(CsvError::ColumnCount {
                line,
                found: fields.len(),
            });
        };
        endpoints.push(Point3::new(
            parse_field(line, ENDPOINT_HEADER[0], x)?,
            parse_field(line, ENDPOINT_HEADER[1], y)?,
            parse_field(line, ENDPOINT_HEADER[2], z)?,
        ));
    }

    tracing::debug!(endpoints = endpoints.len(), "parsed endpoint csv");
    Ok(Segment::pairs_from_endpoints(&endpoints))
}

fn parse_field(line: usize, column: &'static str, value: &str) -> Result<f64, CsvError> {
    value.parse().map_err(|_| CsvError::InvalidNumber {
        line,
        column,
        value: value.to_owned(),
    })
}

/// Serialize segments as an endpoint CSV.
///
/// Numbers use Rust's shortest round-trip formatting, so
/// [`parse_endpoint_csv`] recovers the exact values.
#[must_use]
pub fn to_endpoint_csv(segments: &[Segment]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", ENDPOINT_HEADER.join(","));
    for p in Segment::flatten(segments) {
        let _ = writeln!(out, "{},{},{}", p.x, p.y, p.z);
    }
    out
}

/// Serialize a closed tour as `X,Y` rows.
///
/// An empty tour produces only the header.
#[must_use]
pub fn to_tour_csv(tour: &Tour) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "X,Y");
    for p in tour.points() {
        let _ = writeln!(out, "{},{}", p.x, p.y);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridpath_pipeline::Point;

    use super::*;

    #[test]
    fn parses_pairs_of_rows() {
        let csv = "X,Y,Z\n0,0,0\n3,0,0\n1.5,2.25,-1\n4,4,0\n";
        let segments = parse_endpoint_csv(csv).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::new(Point3::new(0.0, 0.0, 0.0), Point3::new(3.0, 0.0, 0.0)),
                Segment::new(Point3::new(1.5, 2.25, -1.0), Point3::new(4.0, 4.0, 0.0)),
            ],
        );
    }

    #[test]
    fn tolerates_whitespace_and_blank_lines() {
        let csv = "\n  X , Y , Z \r\n\n 1 , 2 , 3\r\n\n4,5,6\n\n";
        let segments = parse_endpoint_csv(csv).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end, Point3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn trailing_unpaired_row_is_ignored() {
        let csv = "X,Y,Z\n0,0,0\n1,1,0\n9,9,9\n";
        let segments = parse_endpoint_csv(csv).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn header_only_is_empty() {
        assert!(parse_endpoint_csv("X,Y,Z\n").unwrap().is_empty());
    }

    #[test]
    fn empty_input_is_missing_header() {
        assert_eq!(parse_endpoint_csv(" \n\n"), Err(CsvError::MissingHeader));
    }

    #[test]
    fn wrong_header_is_rejected() {
        let err = parse_endpoint_csv("\nx,y\n0,0\n").unwrap_err();
        assert_eq!(
            err,
            CsvError::InvalidHeader {
                line: 2,
                found: "x,y".to_owned()
            },
        );
    }

    #[test]
    fn wrong_column_count_reports_line() {
        let err = parse_endpoint_csv("X,Y,Z\n0,0,0\n1,1\n").unwrap_err();
        assert_eq!(err, CsvError::ColumnCount { line: 3, found: 2 });
    }

    #[test]
    fn bad_number_reports_column() {
        let err = parse_endpoint_csv("X,Y,Z\n0,abc,0\n1,1,1\n").unwrap_err();
        assert_eq!(
            err,
            CsvError::InvalidNumber {
                line: 2,
                column: "Y",
                value: "abc".to_owned()
            },
        );
        assert_eq!(err.to_string(), "line 2: column Y is not a number: \"abc\"");
    }

    #[test]
    fn endpoint_csv_preserves_values() {
        let segments = vec![
            Segment::new(Point3::new(0.1, 1e-7, 3.0), Point3::new(546.1, 2.0 / 3.0, 0.0)),
            Segment::new(Point3::new(-4.5, 0.0, 0.0), Point3::new(7.0, 8.0, 9.0)),
        ];
        let csv = to_endpoint_csv(&segments);
        assert!(csv.starts_with("X,Y,Z\n"));
        assert_eq!(csv.lines().count(), 5);
        assert_eq!(parse_endpoint_csv(&csv).unwrap(), segments);
    }

    #[test]
    fn tour_csv_lists_closed_loop() {
        let tour = Tour::close(vec![Point::new(0.0, 0.0), Point::new(1.75, 3.5)]);
        assert_eq!(to_tour_csv(&tour), "X,Y\n0,0\n1.75,3.5\n0,0\n");
    }

    #[test]
    fn empty_tour_csv_is_header_only() {
        assert_eq!(to_tour_csv(&Tour::close(Vec::new())), "X,Y\n");
    }
}
