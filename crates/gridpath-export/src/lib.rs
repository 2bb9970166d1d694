//! gridpath-export: Pure format serializers and parsers (sans-IO)
//!
//! Reads the endpoint CSV a drawing converter produces and writes the
//! pipeline's outputs: the tour as CSV and the occupied keys as a JSON
//! record, which can be read back and decoded into a tour.

pub mod csv;
pub mod keys;

pub use csv::{CsvError, parse_endpoint_csv, to_endpoint_csv, to_tour_csv};
pub use keys::{KeyRecord, parse_key_records, to_key_record_json};
