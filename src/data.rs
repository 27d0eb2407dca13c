use crate::error::{AggregateError, AggregateResult};
use crate::types::{Boundary, MetricRecord, YearlyCountryMetric};
use anyhow::{Context, Result, anyhow};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use geo::MultiPolygon;
use shapefile::Reader;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

const COUNTRY_COLUMN: &str = "country";

/// Fold one row of a wide table into `metric`. Cells that are empty, not
/// numeric, or under a non-year header are left out.
fn ingest_row<'a>(
    metric: &mut YearlyCountryMetric,
    country: &str,
    cells: impl Iterator<Item = (&'a str, &'a str)>,
) {
    let country = country.trim();
    if country.is_empty() {
        return;
    }

    for (column, cell) in cells {
        let column = column.trim();
        let cell = cell.trim();
        if column == COUNTRY_COLUMN || cell.is_empty() {
            continue;
        }
        let Ok(year) = column.parse::<i32>() else {
            debug!("Skipping non-year column '{}'", column);
            continue;
        };
        match cell.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                metric
                    .entry(year)
                    .or_default()
                    .insert(country.to_string(), MetricRecord { value });
            }
            _ => debug!("Skipping unparsable cell {}/{}: '{}'", country, year, cell),
        }
    }
}

/// Normalize already-parsed rows (column name -> cell) into a yearly metric.
pub fn normalize_rows<'a, I>(rows: I) -> YearlyCountryMetric
where
    I: IntoIterator<Item = &'a HashMap<String, String>>,
{
    let mut metric = YearlyCountryMetric::new();
    for row in rows {
        let Some(country) = row.get(COUNTRY_COLUMN) else { continue };
        ingest_row(
            &mut metric,
            country,
            row.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
    }
    metric
}

/// File line of a failed record. `index` counts data records only, so the
/// fallback skips past the header line.
fn error_line(e: &csv::Error, index: usize) -> u64 {
    e.position()
        .map(|p| p.line())
        .unwrap_or(index as u64 + 2)
}

/// Normalize a wide CSV (`country,<year>,<year>,...`) into a yearly metric.
///
/// Only a stream that cannot be read as a table at all is an error; a ragged
/// or undecodable record is logged and skipped.
pub fn normalize_csv<R: Read>(reader: R) -> AggregateResult<YearlyCountryMetric> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| AggregateError::MalformedInput(format!("unreadable header: {}", e)))?
        .clone();

    let country_idx = headers
        .iter()
        .position(|h| h == COUNTRY_COLUMN)
        .ok_or_else(|| AggregateError::MalformedInput(format!("no '{}' column in header", COUNTRY_COLUMN)))?;

    let mut metric = YearlyCountryMetric::new();

    for (index, result) in rdr.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => {
                return Err(AggregateError::MalformedInput(format!("read failed: {}", e)));
            }
            Err(e) => {
                warn!("Skipping CSV line {}: {}", error_line(&e, index), e);
                continue;
            }
        };
        let country = record.get(country_idx).unwrap_or("");
        ingest_row(&mut metric, country, headers.iter().zip(record.iter()));
    }

    Ok(metric)
}

/// Rename country keys to the spelling used by the boundary file. When a year
/// holds both spellings, the canonical key keeps its own value and the
/// aliased one is dropped with a warning.
pub fn apply_aliases(metric: &YearlyCountryMetric, aliases: &HashMap<String, String>) -> YearlyCountryMetric {
    metric
        .iter()
        .map(|(year, countries)| {
            let (aliased, canonical): (Vec<_>, Vec<_>) = countries
                .iter()
                .partition(|(country, _)| aliases.contains_key(*country));

            let mut renamed: BTreeMap<String, MetricRecord> = canonical
                .into_iter()
                .map(|(country, record)| (country.clone(), *record))
                .collect();

            for (country, record) in aliased {
                let name = &aliases[country];
                match renamed.entry(name.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(*record);
                    }
                    Entry::Occupied(kept) => warn!(
                        "{}: '{}' ({}) collides with '{}' ({}); keeping '{}'",
                        year, country, record.value, name, kept.get().value, name
                    ),
                }
            }
            (*year, renamed)
        })
        .collect()
}

pub fn load_metric_csv(path: &Path, aliases: &HashMap<String, String>) -> Result<YearlyCountryMetric> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let metric = normalize_csv(BufReader::new(file))
        .with_context(|| format!("Failed to normalize CSV file: {:?}", path))?;
    info!("Loaded {} years from {:?}", metric.len(), path);
    Ok(apply_aliases(&metric, aliases))
}

/// Inverse of [`normalize_csv`]: one row per country, one column per year,
/// empty cells where a country has no value.
pub fn write_wide_csv<W: Write>(metric: &YearlyCountryMetric, writer: W) -> Result<()> {
    let countries: BTreeSet<&String> = metric.values().flat_map(|c| c.keys()).collect();
    let mut wtr = WriterBuilder::new().from_writer(writer);

    let mut header = vec![COUNTRY_COLUMN.to_string()];
    header.extend(metric.keys().map(|y| y.to_string()));
    wtr.write_record(&header)?;

    for country in countries {
        let mut row = vec![country.clone()];
        for countries_in_year in metric.values() {
            row.push(
                countries_in_year
                    .get(country)
                    .map(|r| r.value.to_string())
                    .unwrap_or_default(),
            );
        }
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_metric_csv(metric: &YearlyCountryMetric, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create CSV file: {:?}", path))?;
    write_wide_csv(metric, file)
}

/// Load an existing wide CSV, or start empty if it is not there yet.
pub fn load_or_empty(path: &Path) -> Result<YearlyCountryMetric> {
    if path.exists() {
        load_metric_csv(path, &HashMap::new())
    } else {
        Ok(YearlyCountryMetric::new())
    }
}

/// Read one long-format export (`Years,Number` after `skip_rows` preamble
/// lines) into year -> value.
pub fn read_long_format(path: &Path, skip_rows: usize) -> Result<BTreeMap<i32, f64>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read export: {:?}", path))?;
    let body: String = content
        .lines()
        .skip(skip_rows)
        .collect::<Vec<_>>()
        .join("\n");

    let mut rdr = ReaderBuilder::new().trim(Trim::All).flexible(true).from_reader(body.as_bytes());
    let headers = rdr.headers()?.clone();
    let year_idx = headers.iter().position(|h| h == "Years");
    let number_idx = headers.iter().position(|h| h == "Number");
    let (Some(year_idx), Some(number_idx)) = (year_idx, number_idx) else {
        return Err(anyhow!("{:?} does not contain 'Years' and 'Number' columns", path));
    };

    let mut series = BTreeMap::new();
    for result in rdr.records() {
        let record = result?;
        let year = record.get(year_idx).and_then(|y| y.parse::<i32>().ok());
        let number = record.get(number_idx).and_then(|n| n.parse::<f64>().ok());
        if let (Some(year), Some(number)) = (year, number) {
            series.insert(year, number);
        }
    }
    Ok(series)
}

/// Merge every `*.csv` long-format export in `dir` for `country` into
/// `metric`. Later files win on duplicate years. Returns the number of files
/// merged; unreadable files are logged and skipped.
pub fn combine_exports(
    metric: &YearlyCountryMetric,
    dir: &Path,
    country: &str,
    skip_rows: usize,
) -> Result<(YearlyCountryMetric, usize)> {
    let mut paths: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("csv"))
        .collect();
    paths.sort();

    let mut combined = metric.clone();
    let mut merged = 0;
    for path in paths {
        info!("Processing export: {:?}", path);
        match read_long_format(&path, skip_rows) {
            Ok(series) => {
                for (year, value) in series {
                    combined
                        .entry(year)
                        .or_default()
                        .insert(country.to_string(), MetricRecord { value });
                }
                merged += 1;
            }
            Err(e) => warn!("Skipping {:?}: {:#}", path, e),
        }
    }
    Ok((combined, merged))
}

pub fn load_boundaries(path: &Path, name_property: &str) -> Result<Vec<Boundary>> {
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Boundary file has no extension"))?;

    let boundaries = match extension.as_str() {
        "shp" => load_shapefile(path, name_property)?,
        "json" | "geojson" => load_geojson(path, name_property)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    info!("Loaded {} boundaries from {:?}", boundaries.len(), path);
    Ok(boundaries)
}

fn load_shapefile(path: &Path, name_property: &str) -> Result<Vec<Boundary>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut boundaries = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let name = match record.get(name_property) {
            Some(shapefile::dbase::FieldValue::Character(Some(s))) => s.trim().to_string(),
            Some(shapefile::dbase::FieldValue::Character(None)) => continue,
            Some(_) => return Err(anyhow!("Shapefile name column must be a string")),
            None => return Err(anyhow!("Name column '{}' not found in Shapefile", name_property)),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue,
        };

        boundaries.push(Boundary { name, geometry });
    }

    Ok(boundaries)
}

fn load_geojson(path: &Path, name_property: &str) -> Result<Vec<Boundary>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    parse_geojson(BufReader::new(file), name_property)
}

pub fn parse_geojson<R: Read>(reader: R, name_property: &str) -> Result<Vec<Boundary>> {
    use geojson::GeoJson;

    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut boundaries = Vec::new();

    for feature in collection.features {
        let name = match feature.properties.as_ref().and_then(|props| props.get(name_property)) {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => continue,
        };

        let Some(geometry) = feature.geometry else { continue };
        let geometry: geo::Geometry<f64> = geometry.value.try_into()
            .map_err(|e| anyhow!("Failed to convert geometry of {}: {:?}", name, e))?;

        let geometry = match geometry {
            geo::Geometry::MultiPolygon(mp) => mp,
            geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
            _ => continue, // Skip points/lines
        };

        boundaries.push(Boundary { name, geometry });
    }

    Ok(boundaries)
}

/// Countries with a value in `year` that no boundary carries.
pub fn unmatched<'a>(metric: &'a YearlyCountryMetric, year: i32, boundaries: &[Boundary]) -> Vec<&'a str> {
    let names: BTreeSet<&str> = boundaries.iter().map(|b| b.name.as_str()).collect();
    metric
        .get(&year)
        .map(|countries| {
            countries
                .keys()
                .map(String::as_str)
                .filter(|c| !names.contains(c))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SQUARES;

    const WIDE: &str = "country,2004,2005,2006\n\
                        Austria,10,12.5,\n\
                        Belgium,20,n/a,22\n\
                        ,1,2,3\n";


    #[test]
    fn test_normalize_csv_skips_empty_and_bad_cells() {
        let metric = normalize_csv(WIDE.as_bytes()).unwrap();
        assert_eq!(metric.keys().copied().collect::<Vec<_>>(), vec![2004, 2005, 2006]);
        assert_eq!(metric[&2004]["Austria"].value, 10.0);
        assert_eq!(metric[&2005]["Austria"].value, 12.5);
        assert!(!metric[&2005].contains_key("Belgium"));
        assert!(!metric[&2006].contains_key("Austria"));
        assert_eq!(metric[&2006]["Belgium"].value, 22.0);
        // Row without a country is dropped entirely.
        assert_eq!(metric[&2004].len(), 2);
    }

    #[test]
    fn test_normalize_csv_ignores_non_year_columns() {
        let metric = normalize_csv("country,notes,2010\nItaly,hello,3\n".as_bytes()).unwrap();
        assert_eq!(metric.len(), 1);
        assert_eq!(metric[&2010]["Italy"].value, 3.0);
    }

    #[test]
    fn test_normalize_csv_requires_country_column() {
        let err = normalize_csv("nation,2004\nItaly,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, AggregateError::MalformedInput(_)));
        assert!(matches!(normalize_csv("".as_bytes()), Err(AggregateError::MalformedInput(_))));
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
            }
            self.served = true;
            let chunk = b"country,2004\nAustria,1\n";
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    #[test]
    fn test_normalize_csv_fails_when_stream_breaks() {
        let err = normalize_csv(FailingReader { served: false }).unwrap_err();
        match err {
            AggregateError::MalformedInput(msg) => assert!(msg.contains("disk gone"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_line_counts_header() {
        let csv = "country,2004,2005\nSpain,2,3\nAustria,1\n";
        let mut rdr = ReaderBuilder::new().from_reader(csv.as_bytes());
        let (index, err) = rdr
            .records()
            .enumerate()
            .find_map(|(i, r)| r.err().map(|e| (i, e)))
            .unwrap();
        assert_eq!(index, 1);
        assert_eq!(error_line(&err, index), 3);
    }

    #[test]
    fn test_normalize_csv_skips_ragged_record() {
        let csv = "country,2004,2005\nAustria,1\nSpain,2,3\n";
        let metric = normalize_csv(csv.as_bytes()).unwrap();
        assert!(!metric[&2004].contains_key("Austria"));
        assert_eq!(metric[&2005]["Spain"].value, 3.0);
    }

    #[test]
    fn test_normalize_rows_matches_csv() {
        let rows: Vec<HashMap<String, String>> = vec![
            [("country", "Austria"), ("2004", "10"), ("2005", "12.5"), ("2006", "")],
            [("country", "Belgium"), ("2004", "20"), ("2005", "n/a"), ("2006", "22")],
        ]
        .into_iter()
        .map(|row| row.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        .collect();

        let from_rows = normalize_rows(&rows);
        assert_eq!(from_rows, normalize_csv(WIDE.as_bytes()).unwrap());
        // Input untouched.
        assert_eq!(rows[0]["2006"], "");
    }

    #[test]
    fn test_wide_csv_round_trip() {
        let metric = normalize_csv(WIDE.as_bytes()).unwrap();
        let mut out = Vec::new();
        write_wide_csv(&metric, &mut out).unwrap();
        assert_eq!(normalize_csv(out.as_slice()).unwrap(), metric);
    }

    #[test]
    fn test_apply_aliases() {
        let metric = normalize_csv("country,2004\nCzechia,7\n".as_bytes()).unwrap();
        let aliases = HashMap::from([("Czechia".to_string(), "Czech Republic".to_string())]);
        let renamed = apply_aliases(&metric, &aliases);
        assert_eq!(renamed[&2004]["Czech Republic"].value, 7.0);
        assert!(metric[&2004].contains_key("Czechia"));
    }

    #[test]
    fn test_apply_aliases_keeps_canonical_value_on_collision() {
        let metric = normalize_csv("country,2004,2005\nCzech Republic,100,\nCzechia,7,8\n".as_bytes()).unwrap();
        let aliases = HashMap::from([("Czechia".to_string(), "Czech Republic".to_string())]);
        let renamed = apply_aliases(&metric, &aliases);
        assert_eq!(renamed[&2004].len(), 1);
        assert_eq!(renamed[&2004]["Czech Republic"].value, 100.0);
        // No canonical value that year, so the alias fills in.
        assert_eq!(renamed[&2005]["Czech Republic"].value, 8.0);
    }

    #[test]
    fn test_combine_exports_merges_into_existing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("france_a.csv"),
            "Skin cancer export\nGenerated 2020\nYears,Number,Rate\n2004,9000,1.2\n2005,9100,1.3\n",
        )
        .unwrap();
        fs::write(dir.path().join("broken.csv"), "x\ny\nfoo,bar\n1,2\n").unwrap();
        fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let existing = normalize_csv("country,2004\nSpain,5\n".as_bytes()).unwrap();
        let (combined, merged) = combine_exports(&existing, dir.path(), "France", 2).unwrap();
        assert_eq!(merged, 1);
        assert_eq!(combined[&2004]["France"].value, 9000.0);
        assert_eq!(combined[&2004]["Spain"].value, 5.0);
        assert_eq!(combined[&2005]["France"].value, 9100.0);
    }

    #[test]
    fn test_save_and_load_or_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("uv.csv");
        assert!(load_or_empty(&path).unwrap().is_empty());

        let metric = normalize_csv(WIDE.as_bytes()).unwrap();
        save_metric_csv(&metric, &path).unwrap();
        assert_eq!(load_or_empty(&path).unwrap(), metric);
    }

    #[test]
    fn test_parse_geojson_keeps_named_polygons() {
        let boundaries = parse_geojson(SQUARES.as_bytes(), "name").unwrap();
        let names: Vec<_> = boundaries.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Austria", "Belgium"]);
    }

    #[test]
    fn test_parse_geojson_rejects_bare_geometry() {
        let point = r#"{"type": "Point", "coordinates": [1, 2]}"#;
        assert!(parse_geojson(point.as_bytes(), "name").is_err());
    }

    #[test]
    fn test_unsupported_boundary_extension() {
        assert!(load_boundaries(Path::new("europe.kml"), "name").is_err());
    }

    #[test]
    fn test_unmatched_reports_missing_names() {
        let boundaries = parse_geojson(SQUARES.as_bytes(), "name").unwrap();
        let metric = normalize_csv("country,2004\nAustria,1\nCzechia,2\n".as_bytes()).unwrap();
        assert_eq!(unmatched(&metric, 2004, &boundaries), vec!["Czechia"]);
        assert!(unmatched(&metric, 1999, &boundaries).is_empty());
    }
}
