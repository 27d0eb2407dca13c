use crate::color::{legend, ColorScale, ColorScaleRange, LegendStop, Rgb};
use crate::config::DegeneratePolicy;
use crate::error::{AggregateError, AggregateResult};
use crate::types::{Boundary, RawSeries, SampleValue, YearlyCountryMetric};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;

/// Decimal places shown for the UV index in popups.
const UV_DECIMALS: usize = 3;

fn sample_to_f64(sample: &SampleValue) -> AggregateResult<f64> {
    let value = match sample {
        SampleValue::Number(n) => *n,
        SampleValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| AggregateError::MalformedInput(format!("non-numeric sample '{}'", s)))?,
    };
    if !value.is_finite() {
        return Err(AggregateError::MalformedInput(format!("non-finite sample {}", value)));
    }
    Ok(value)
}

/// Arithmetic mean of every sample in the series, across all parameters,
/// coordinates and dates.
pub fn average_series(series: &RawSeries) -> AggregateResult<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;

    let samples = series
        .data
        .iter()
        .flat_map(|p| &p.coordinates)
        .flat_map(|c| &c.dates);

    for sample in samples {
        sum += sample_to_f64(&sample.value)?;
        count += 1;
    }

    if count == 0 {
        return Err(AggregateError::EmptySeries);
    }
    Ok(sum / count as f64)
}

pub fn range_for_year(metric: &YearlyCountryMetric, year: i32) -> AggregateResult<ColorScaleRange> {
    let countries = metric.get(&year).ok_or(AggregateError::EmptyYear(year))?;
    ColorScaleRange::from_values(countries.values().map(|r| r.value))
        .ok_or(AggregateError::EmptyYear(year))
}

pub fn value_for(metric: &YearlyCountryMetric, year: i32, country: &str) -> Option<f64> {
    metric.get(&year)?.get(country).map(|r| r.value)
}

/// Value of `country` for every year the metric covers, `None` where missing.
pub fn country_series(metric: &YearlyCountryMetric, country: &str) -> Vec<(i32, Option<f64>)> {
    metric
        .iter()
        .map(|(year, countries)| (*year, countries.get(country).map(|r| r.value)))
        .collect()
}

pub fn countries(metric: &YearlyCountryMetric) -> BTreeSet<String> {
    metric.values().flat_map(|c| c.keys().cloned()).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ChartSeries {
    pub country: String,
    pub years: Vec<i32>,
    pub cases: Vec<Option<f64>>,
    pub avg_uv: Vec<Option<f64>>,
}

/// Line/bar series for one country over the union of both datasets' years.
pub fn chart_series(cases: &YearlyCountryMetric, uv: &YearlyCountryMetric, country: &str) -> ChartSeries {
    let years: Vec<i32> = cases.keys().chain(uv.keys()).copied().collect::<BTreeSet<_>>().into_iter().collect();
    ChartSeries {
        country: country.to_string(),
        cases: years.iter().map(|y| value_for(cases, *y, country)).collect(),
        avg_uv: years.iter().map(|y| value_for(uv, *y, country)).collect(),
        years,
    }
}

pub fn popup_text(name: &str, cases: Option<f64>, uv: Option<f64>) -> String {
    let cases = cases
        .map(|c| format!("{}", c.round() as i64))
        .unwrap_or_else(|| "N/A".to_string());
    let uv = uv
        .map(|u| format!("{:.*}", UV_DECIMALS, u))
        .unwrap_or_else(|| "N/A".to_string());
    format!("<strong>{}</strong><br/>Cases per year: {}<br/>UV Index: {}", name, cases, uv)
}

#[derive(Debug, Clone, Serialize)]
pub struct ChoroplethFeature {
    pub name: String,
    pub fill: Rgb,
    pub value: Option<f64>,
    pub uv: Option<f64>,
    pub popup: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choropleth {
    pub year: i32,
    pub range: Option<ColorScaleRange>,
    pub legend: Vec<LegendStop>,
    pub features: Vec<ChoroplethFeature>,
    /// Countries with a value this year but no boundary to paint.
    pub unmatched: Vec<String>,
}

/// Fill and popup for every boundary in `year`. A year with no data paints
/// everything neutral rather than failing.
pub fn build_choropleth(
    cases: &YearlyCountryMetric,
    uv: &YearlyCountryMetric,
    year: i32,
    boundaries: &[Boundary],
    policy: DegeneratePolicy,
    legend_stops: usize,
) -> Choropleth {
    let scale = match range_for_year(cases, year) {
        Ok(range) => Some(ColorScale::new(range, policy)),
        Err(e) => {
            tracing::warn!("Painting {} without a color scale: {}", year, e);
            None
        }
    };

    let features = boundaries
        .par_iter()
        .map(|boundary| {
            let value = value_for(cases, year, &boundary.name);
            let uv = value_for(uv, year, &boundary.name);
            let fill = match &scale {
                Some(scale) => scale.fill(value),
                None => crate::color::NEUTRAL,
            };
            ChoroplethFeature {
                name: boundary.name.clone(),
                fill,
                value,
                uv,
                popup: popup_text(&boundary.name, value, uv),
            }
        })
        .collect();

    Choropleth {
        year,
        range: scale.map(|s| s.range),
        legend: scale.map(|s| legend(&s, legend_stops)).unwrap_or_default(),
        features,
        unmatched: crate::data::unmatched(cases, year, boundaries)
            .into_iter()
            .map(str::to_string)
            .collect(),
    }
}
