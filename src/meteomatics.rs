use crate::config::MeteomaticsConfig;
use crate::processing::average_series;
use crate::types::{MetricRecord, RawSeries, YearlyCountryMetric};
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, info, warn};

const UV_PARAMETER: &str = "uv:idx";
const OVERLAY_RESOLUTION: &str = "0.1,0.1";

/// Approximate geographic centers of the EU-27, sampled for per-country UV.
pub const EU_COUNTRY_CENTERS: &[(&str, f64, f64)] = &[
    ("Austria", 47.5162, 14.5501),
    ("Belgium", 50.5039, 4.4699),
    ("Bulgaria", 42.7339, 25.4858),
    ("Croatia", 45.1000, 15.2000),
    ("Cyprus", 35.1264, 33.4299),
    ("Czech Republic", 49.8175, 15.4730),
    ("Denmark", 56.2639, 9.5018),
    ("Estonia", 58.5953, 25.0136),
    ("Finland", 61.9241, 25.7482),
    ("France", 46.6034, 1.8883),
    ("Germany", 51.1657, 10.4515),
    ("Greece", 39.0742, 21.8243),
    ("Hungary", 47.1625, 19.5033),
    ("Ireland", 53.1424, -7.6921),
    ("Italy", 41.8719, 12.5674),
    ("Latvia", 56.8796, 24.6032),
    ("Lithuania", 55.1694, 23.8813),
    ("Luxembourg", 49.8153, 6.1296),
    ("Malta", 35.9375, 14.3754),
    ("Netherlands", 52.1326, 5.2913),
    ("Poland", 51.9194, 19.1451),
    ("Portugal", 39.3999, -8.2245),
    ("Romania", 45.9432, 24.9668),
    ("Slovakia", 48.6690, 19.6990),
    ("Slovenia", 46.1512, 14.9955),
    ("Spain", 40.4637, -3.7492),
    ("Sweden", 60.1282, 18.6435),
];

/// A `lat,lon` pair as sent by the front end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl FromStr for Coordinates {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts = parse_floats(s, 2)?;
        Ok(Self { lat: parts[0], lon: parts[1] })
    }
}

/// Map bounds as `southwest_lng,southwest_lat,northeast_lng,northeast_lat`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub sw_lng: f64,
    pub sw_lat: f64,
    pub ne_lng: f64,
    pub ne_lat: f64,
}

impl FromStr for Bounds {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let p = parse_floats(s, 4)?;
        Ok(Self { sw_lng: p[0], sw_lat: p[1], ne_lng: p[2], ne_lat: p[3] })
    }
}

fn parse_floats(s: &str, expected: usize) -> Result<Vec<f64>> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().with_context(|| format!("'{}' is not a number", p)))
        .collect::<Result<Vec<_>>>()?;
    if parts.len() != expected {
        return Err(anyhow!("expected {} comma-separated numbers, got {}", expected, parts.len()));
    }
    Ok(parts)
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct MeteomaticsClient {
    client: Client,
    config: MeteomaticsConfig,
}

impl MeteomaticsClient {
    pub fn new(config: MeteomaticsConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("solar-sense/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    fn credentials(&self) -> Result<(String, String)> {
        let read = |var: &str| {
            std::env::var(var).with_context(|| format!("Environment variable {} is not set", var))
        };
        Ok((read(&self.config.username_env)?, read(&self.config.password_env)?))
    }

    /// Exchange basic-auth credentials for a bearer token.
    pub async fn token(&self) -> Result<String> {
        let (username, password) = self.credentials()?;
        debug!("Requesting token from {}", self.config.login_url);

        let response: TokenResponse = self
            .client
            .get(&self.config.login_url)
            .basic_auth(username, Some(password))
            .send()
            .await
            .context("Token request failed")?
            .error_for_status()
            .context("Token request rejected")?
            .json()
            .await
            .context("Failed to parse token response")?;
        Ok(response.access_token)
    }

    pub fn series_url(&self, at: Coordinates, year: i32, token: &str) -> String {
        format!(
            "{}/{}-01-01T13:00:00.000+01:00--{}-01-01T13:00:00.000+01:00:P1D/{}/{},{}/json?model={}&access_token={}",
            self.config.api_url, year, year + 1, UV_PARAMETER, at.lat, at.lon, self.config.model, token
        )
    }

    pub fn overlay_url(&self, bounds: Bounds, year: i32, token: &str) -> String {
        format!(
            "{}/{}-07-01T13:00:00.000+01:00/{}/{},{}_{},{}:{}/png?model={}&access_token={}",
            self.config.api_url,
            year,
            UV_PARAMETER,
            bounds.ne_lat,
            bounds.sw_lng,
            bounds.sw_lat,
            bounds.ne_lng,
            OVERLAY_RESOLUTION,
            self.config.model,
            token
        )
    }

    /// Daily UV-index samples for one point over one calendar year.
    pub async fn uv_series(&self, token: &str, at: Coordinates, year: i32) -> Result<RawSeries> {
        let url = self.series_url(at, year, token);
        debug!("Fetching UV series for {:?} in {}", at, year);

        let series = self
            .client
            .get(&url)
            .send()
            .await
            .context("UV series request failed")?
            .error_for_status()
            .context("Failed to fetch UV data")?
            .json::<RawSeries>()
            .await
            .context("Failed to parse UV series")?;
        Ok(series)
    }

    pub async fn average_uv(&self, token: &str, at: Coordinates, year: i32) -> Result<f64> {
        let series = self.uv_series(token, at, year).await?;
        Ok(average_series(&series)?)
    }

    /// Mid-year UV raster over `bounds` as a `data:image/png;base64,...` URL.
    pub async fn uv_overlay(&self, token: &str, bounds: Bounds, year: i32) -> Result<String> {
        let url = self.overlay_url(bounds, year, token);
        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .context("UV overlay request failed")?
            .error_for_status()
            .context("Failed to fetch UV data")?
            .bytes()
            .await
            .context("Failed to read UV overlay")?;
        Ok(to_data_url(&bytes))
    }

    /// Average UV for every EU country center in `year`. A country whose
    /// series fails is logged and left out.
    pub async fn year_averages(&self, year: i32) -> Result<YearlyCountryMetric> {
        let token = self.token().await?;
        let mut metric = YearlyCountryMetric::new();

        for &(country, lat, lon) in EU_COUNTRY_CENTERS {
            match self.average_uv(&token, Coordinates { lat, lon }, year).await {
                Ok(value) => {
                    metric
                        .entry(year)
                        .or_default()
                        .insert(country.to_string(), MetricRecord { value });
                }
                Err(e) => warn!("No UV average for {} in {}: {:#}", country, year, e),
            }
        }

        info!("Averaged UV for {} countries in {}", metric.get(&year).map_or(0, |c| c.len()), year);
        Ok(metric)
    }
}

pub fn to_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", base64::engine::general_purpose::STANDARD.encode(png))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MeteomaticsClient {
        MeteomaticsClient::new(MeteomaticsConfig::default()).unwrap()
    }

    #[test]
    fn test_series_url() {
        let url = client().series_url(Coordinates { lat: 47.5, lon: 14.5 }, 2004, "tok");
        assert_eq!(
            url,
            "https://api.meteomatics.com/2004-01-01T13:00:00.000+01:00--2005-01-01T13:00:00.000+01:00:P1D/uv:idx/47.5,14.5/json?model=mix&access_token=tok"
        );
    }

    #[test]
    fn test_overlay_url_orders_corners() {
        let bounds: Bounds = "-10,35,30,60".parse().unwrap();
        let url = client().overlay_url(bounds, 2008, "tok");
        assert_eq!(
            url,
            "https://api.meteomatics.com/2008-07-01T13:00:00.000+01:00/uv:idx/60,-10_35,30:0.1,0.1/png?model=mix&access_token=tok"
        );
    }

    #[test]
    fn test_parse_query_shapes() {
        assert_eq!("48.2, 16.37".parse::<Coordinates>().unwrap(), Coordinates { lat: 48.2, lon: 16.37 });
        assert!("48.2".parse::<Coordinates>().is_err());
        assert!("a,b,c,d".parse::<Bounds>().is_err());
        assert!("1,2,3".parse::<Bounds>().is_err());
    }

    #[test]
    fn test_data_url() {
        assert_eq!(to_data_url(&[0x89, b'P', b'N', b'G']), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_missing_credentials() {
        let config = MeteomaticsConfig {
            username_env: "SOLAR_SENSE_TEST_UNSET_USER".to_string(),
            password_env: "SOLAR_SENSE_TEST_UNSET_PASS".to_string(),
            ..MeteomaticsConfig::default()
        };
        let client = MeteomaticsClient::new(config).unwrap();
        assert!(client.credentials().is_err());
    }

    #[test]
    fn test_centers_cover_eu27() {
        assert_eq!(EU_COUNTRY_CENTERS.len(), 27);
    }
}
