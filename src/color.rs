//! Two-stop choropleth gradient from light yellow to dark red.

use crate::config::DegeneratePolicy;
use crate::error::{AggregateError, AggregateResult};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({},{},{})", self.r, self.g, self.b)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub const GRADIENT_START: Rgb = Rgb::new(255, 237, 160);
pub const GRADIENT_END: Rgb = Rgb::new(189, 0, 38);
/// Painted for countries with no value.
pub const NEUTRAL: Rgb = Rgb::new(128, 128, 128);

/// Observed `[min, max]` over one year's values. `min <= max` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorScaleRange {
    pub min: f64,
    pub max: f64,
    #[serde(skip)]
    pub samples: usize,
}

impl ColorScaleRange {
    /// Reduce a set of values to their range. Returns `None` for an empty set
    /// or when any value is NaN.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut range: Option<Self> = None;
        for v in values {
            if v.is_nan() {
                return None;
            }
            range = Some(match range {
                None => Self { min: v, max: v, samples: 1 },
                Some(r) => Self { min: r.min.min(v), max: r.max.max(v), samples: r.samples + 1 },
            });
        }
        range
    }

    pub fn is_degenerate(&self) -> bool {
        self.max == self.min
    }
}

fn interpolate(start: u8, end: u8, ratio: f64) -> u8 {
    let (start, end) = (start as f64, end as f64);
    (start + ratio * (end - start)).round().clamp(0.0, 255.0) as u8
}

/// Position of `value` on the gradient for `range`. Values outside the range
/// are clamped to the nearest endpoint.
pub fn color_for(value: f64, range: &ColorScaleRange) -> AggregateResult<Rgb> {
    if value.is_nan() {
        return Err(AggregateError::MalformedInput("value is NaN".to_string()));
    }

    let ratio = if range.is_degenerate() {
        if range.samples > 1 {
            return Err(AggregateError::DegenerateRange { value, samples: range.samples });
        }
        0.0
    } else {
        ((value - range.min) / (range.max - range.min)).clamp(0.0, 1.0)
    };

    Ok(Rgb {
        r: interpolate(GRADIENT_START.r, GRADIENT_END.r, ratio),
        g: interpolate(GRADIENT_START.g, GRADIENT_END.g, ratio),
        b: interpolate(GRADIENT_START.b, GRADIENT_END.b, ratio),
    })
}

/// A range paired with the caller's choice for zero-width ranges.
#[derive(Debug, Clone, Copy)]
pub struct ColorScale {
    pub range: ColorScaleRange,
    pub policy: DegeneratePolicy,
}

impl ColorScale {
    pub fn new(range: ColorScaleRange, policy: DegeneratePolicy) -> Self {
        Self { range, policy }
    }

    pub fn fill(&self, value: Option<f64>) -> Rgb {
        let Some(value) = value else { return NEUTRAL };
        match color_for(value, &self.range) {
            Ok(color) => color,
            Err(AggregateError::DegenerateRange { .. }) => match self.policy {
                DegeneratePolicy::Minimum => GRADIENT_START,
                DegeneratePolicy::Fallback => NEUTRAL,
            },
            Err(e) => {
                tracing::debug!("No color for {}: {}", value, e);
                NEUTRAL
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LegendStop {
    pub value: f64,
    pub color: Rgb,
}

/// Evenly spaced legend entries, highest value first.
pub fn legend(scale: &ColorScale, stops: usize) -> Vec<LegendStop> {
    let stops = stops.max(2);
    let range = scale.range;
    (0..stops)
        .map(|i| {
            let t = 1.0 - i as f64 / (stops - 1) as f64;
            let value = range.min + t * (range.max - range.min);
            LegendStop { value, color: scale.fill(Some(value)) }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: f64, max: f64) -> ColorScaleRange {
        ColorScaleRange::from_values([min, max]).unwrap()
    }

    #[test]
    fn test_endpoints() {
        let r = range(5.0, 15.0);
        assert_eq!(color_for(5.0, &r).unwrap(), Rgb::new(255, 237, 160));
        assert_eq!(color_for(15.0, &r).unwrap(), Rgb::new(189, 0, 38));
        assert_eq!(color_for(15.0, &r).unwrap().to_string(), "rgb(189,0,38)");
    }

    #[test]
    fn test_midpoint_rounds() {
        let r = range(0.0, 2.0);
        // 255 - 33, 237 - 118.5, 160 - 61
        assert_eq!(color_for(1.0, &r).unwrap(), Rgb::new(222, 119, 99));
    }

    #[test]
    fn test_out_of_range_clamps() {
        let r = range(10.0, 20.0);
        assert_eq!(color_for(-100.0, &r).unwrap(), GRADIENT_START);
        assert_eq!(color_for(1e9, &r).unwrap(), GRADIENT_END);
    }

    #[test]
    fn test_monotonic_channels() {
        let r = range(0.0, 100.0);
        let mut prev = color_for(0.0, &r).unwrap();
        for i in 1..=100 {
            let c = color_for(i as f64, &r).unwrap();
            assert!(c.r <= prev.r && c.g <= prev.g && c.b <= prev.b, "not monotonic at {}", i);
            prev = c;
        }
    }

    #[test]
    fn test_single_sample_is_start_color() {
        let r = ColorScaleRange::from_values([42.0]).unwrap();
        assert_eq!(color_for(42.0, &r).unwrap(), GRADIENT_START);
    }

    #[test]
    fn test_equal_samples_are_degenerate() {
        let r = ColorScaleRange::from_values([3.0, 3.0, 3.0]).unwrap();
        assert_eq!(
            color_for(3.0, &r),
            Err(AggregateError::DegenerateRange { value: 3.0, samples: 3 })
        );
        assert_eq!(ColorScale::new(r, DegeneratePolicy::Minimum).fill(Some(3.0)), GRADIENT_START);
        assert_eq!(ColorScale::new(r, DegeneratePolicy::Fallback).fill(Some(3.0)), NEUTRAL);
    }

    #[test]
    fn test_nan_rejected() {
        let r = range(0.0, 1.0);
        assert!(matches!(color_for(f64::NAN, &r), Err(AggregateError::MalformedInput(_))));
        assert!(ColorScaleRange::from_values([1.0, f64::NAN]).is_none());
    }

    #[test]
    fn test_missing_value_is_neutral() {
        let scale = ColorScale::new(range(0.0, 1.0), DegeneratePolicy::Minimum);
        assert_eq!(scale.fill(None), NEUTRAL);
    }

    #[test]
    fn test_legend_runs_high_to_low() {
        let scale = ColorScale::new(range(0.0, 100.0), DegeneratePolicy::Minimum);
        let stops = legend(&scale, 5);
        assert_eq!(stops.len(), 5);
        assert_eq!(stops[0].value, 100.0);
        assert_eq!(stops[0].color, GRADIENT_END);
        assert_eq!(stops[4].value, 0.0);
        assert_eq!(stops[4].color, GRADIENT_START);
    }

    #[test]
    fn test_serializes_as_css_string() {
        let json = serde_json::to_string(&GRADIENT_END).unwrap();
        assert_eq!(json, "\"rgb(189,0,38)\"");
    }
}
