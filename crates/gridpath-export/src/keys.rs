//! Key record export.
//!
//! A compact JSON object describing one converted drawing: the grid it
//! was rasterized onto and the occupied keys in ascending order. Records
//! serialize to a single line, so appending several yields a JSON Lines
//! file. A record decodes back into a toolpath without the source
//! segments.

use gridpath_pipeline::grid::dimensions;
use gridpath_pipeline::{
    ConversionResult, GridIndex, PipelineConfig, PipelineError, Tour, TourBuilder, tour_from_keys,
};
use serde::{Deserialize, Serialize};

/// Occupied keys of one drawing plus the grid needed to decode them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Drawing name, usually the source file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Grid rows.
    pub rows: usize,
    /// Grid columns.
    pub cols: usize,
    /// Cell size in millimetres.
    pub cell_size: f64,
    /// Build plate side in millimetres.
    pub build_dim: f64,
    /// Largest valid key, `rows * cols`.
    pub max_key: usize,
    /// Occupied keys in ascending order.
    pub keys: Vec<usize>,
}

impl KeyRecord {
    /// Build a record from a conversion and the configuration that produced it.
    #[must_use]
    pub fn new(name: Option<String>, result: &ConversionResult, config: &PipelineConfig) -> Self {
        Self {
            name,
            rows: result.dimensions.rows,
            cols: result.dimensions.cols,
            cell_size: config.cell_size,
            build_dim: config.build_dim,
            max_key: result.dimensions.cell_count(),
            keys: result.keys.clone(),
        }
    }

    /// Rebuild the closed toolpath these keys describe.
    ///
    /// The stored grid fields are checked against the grid that
    /// `build_dim` and `cell_size` produce. Decoding with the builder of
    /// the producing configuration yields the tour of the original
    /// conversion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the grid fields are
    /// invalid or disagree with each other, [`PipelineError::KeyOutOfRange`]
    /// for a key outside `[1, max_key]`, and [`PipelineError::DuplicateKey`]
    /// for a repeated key.
    pub fn decode(&self, builder: &TourBuilder) -> Result<Tour, PipelineError> {
        let dims = dimensions(self.build_dim, self.cell_size)?;
        if dims.rows != self.rows || dims.cols != self.cols || dims.cell_count() != self.max_key {
            return Err(PipelineError::InvalidConfig(format!(
                "record grid {}x{} (max key {}) does not match build_dim {} / cell_size {}",
                self.rows, self.cols, self.max_key, self.build_dim, self.cell_size,
            )));
        }
        tour_from_keys(&self.keys, &GridIndex::new(dims), self.cell_size, builder)
    }
}

/// Serialize a key record as a single line of JSON (no trailing newline).
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if serialization fails.
pub fn to_key_record_json(record: &KeyRecord) -> Result<String, serde_json::Error> {
    serde_json::to_string(record)
}

/// Parse a JSON Lines stream of key records.
///
/// Records may be separated by any whitespace; blank lines are skipped.
///
/// # Errors
///
/// Returns the first [`serde_json::Error`] encountered, which carries the
/// line and column of the malformed record.
pub fn parse_key_records(input: &str) -> Result<Vec<KeyRecord>, serde_json::Error> {
    let records = serde_json::Deserializer::from_str(input)
        .into_iter::<KeyRecord>()
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(records = records.len(), "parsed key records");
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridpath_pipeline::{Point3, Segment, convert};

    use super::*;

    fn sample() -> (ConversionResult, PipelineConfig) {
        let config = PipelineConfig {
            cell_size: 1.0,
            build_dim: 5.0,
            ..PipelineConfig::default()
        };
        let segments = [Segment::new(
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(2.0, 1.0, 0.0),
        )];
        (convert(&segments, &config).unwrap(), config)
    }

    #[test]
    fn record_describes_grid() {
        let (result, config) = sample();
        let record = KeyRecord::new(Some("bracket".to_owned()), &result, &config);
        assert_eq!(record.rows, 5);
        assert_eq!(record.cols, 5);
        assert_eq!(record.max_key, 25);
        assert_eq!(record.keys, vec![6, 7, 8]);
    }

    #[test]
    fn json_is_single_line() {
        let (result, config) = sample();
        let record = KeyRecord::new(Some("bracket".to_owned()), &result, &config);
        let json = to_key_record_json(&record).unwrap();
        assert!(!json.contains('\n'));
        assert!(json.contains("\"keys\":[6,7,8]"));

        let back: KeyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn unnamed_record_omits_name() {
        let (result, config) = sample();
        let json = to_key_record_json(&KeyRecord::new(None, &result, &config)).unwrap();
        assert!(!json.contains("name"));
    }

    #[test]
    fn record_decodes_to_converted_tour() {
        let (result, config) = sample();
        let record = KeyRecord::new(None, &result, &config);
        let json = to_key_record_json(&record).unwrap();
        let parsed = parse_key_records(&json).unwrap();
        assert_eq!(parsed.len(), 1);

        let tour = parsed[0]
            .decode(&TourBuilder::from_config(&config))
            .unwrap();
        assert_eq!(tour, result.tour);
    }

    #[test]
    fn out_of_range_record_key_rejected() {
        let (result, config) = sample();
        let mut record = KeyRecord::new(None, &result, &config);
        record.keys.push(26);
        let err = record.decode(&TourBuilder::default()).unwrap_err();
        assert_eq!(
            err,
            PipelineError::KeyOutOfRange {
                key: 26,
                max_key: 25
            }
        );
    }

    #[test]
    fn repeated_record_key_rejected() {
        let (result, config) = sample();
        let mut record = KeyRecord::new(None, &result, &config);
        record.keys.push(7);
        let err = record.decode(&TourBuilder::default()).unwrap_err();
        assert_eq!(err, PipelineError::DuplicateKey { key: 7 });
    }

    #[test]
    fn mismatched_grid_rejected() {
        let (result, config) = sample();
        let mut record = KeyRecord::new(None, &result, &config);
        record.cols = 6;
        let err = record.decode(&TourBuilder::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn json_lines_parse_in_order() {
        let (result, config) = sample();
        let first = KeyRecord::new(Some("a".to_owned()), &result, &config);
        let second = KeyRecord::new(Some("b".to_owned()), &result, &config);
        let input = format!(
            "{}\n\n{}\n",
            to_key_record_json(&first).unwrap(),
            to_key_record_json(&second).unwrap(),
        );
        assert_eq!(parse_key_records(&input).unwrap(), vec![first, second]);
        assert!(parse_key_records("").unwrap().is_empty());
        assert!(parse_key_records("{\"rows\":1}").is_err());
    }
}
