//! Shared test data.

use crate::data::{normalize_csv, parse_geojson};
use crate::types::{Boundary, YearlyCountryMetric};

/// Two 10x10 degree squares plus features the loader must skip.
pub const SQUARES: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {"type": "Feature", "properties": {"name": "Austria"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
        {"type": "Feature", "properties": {"name": "Belgium"},
         "geometry": {"type": "MultiPolygon", "coordinates": [[[[20,0],[30,0],[30,10],[20,10],[20,0]]]]}},
        {"type": "Feature", "properties": {"name": "Pin"},
         "geometry": {"type": "Point", "coordinates": [5,5]}},
        {"type": "Feature", "properties": {"label": "Nameless"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}}
    ]
}"#;

pub const CASES_CSV: &str = "country,2004,2005\n\
                             Austria,1200,1300\n\
                             Belgium,2400,\n\
                             Atlantis,10,20\n";

pub const UV_CSV: &str = "country,2004,2005\n\
                          Austria,2.1234,2.2\n\
                          Belgium,1.5,1.6\n";

pub fn boundaries() -> Vec<Boundary> {
    parse_geojson(SQUARES.as_bytes(), "name").unwrap()
}

pub fn cases() -> YearlyCountryMetric {
    normalize_csv(CASES_CSV.as_bytes()).unwrap()
}

pub fn uv() -> YearlyCountryMetric {
    normalize_csv(UV_CSV.as_bytes()).unwrap()
}
