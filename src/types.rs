use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single normalized observation for one country in one year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub value: f64,
}

// Map<Year, Map<Country, Record>>
pub type YearlyCountryMetric = BTreeMap<i32, BTreeMap<String, MetricRecord>>;

#[derive(Debug, Clone)]
pub struct Boundary {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
}

/// Which normalized dataset a command or request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Dataset {
    SkinCancer,
    AvgUv,
}

/// Body of a remote time-series response:
/// `{ data: [ { coordinates: [ { dates: [ { date, value } ] } ] } ] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSeries {
    pub data: Vec<SeriesParameter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesParameter {
    #[serde(default)]
    pub parameter: Option<String>,
    pub coordinates: Vec<SeriesCoordinate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesCoordinate {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub dates: Vec<SeriesSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSample {
    #[serde(default)]
    pub date: Option<String>,
    pub value: SampleValue,
}

// Upstream sends numbers, but fixtures and older exports carry strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}
