use crate::color::Rgb;
use crate::config::OutputConfig;
use crate::spatial::BoundarySet;
use anyhow::{Context, Result, anyhow};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 0]);

// Web Mercator
fn lat_to_mercator_y(lat: f64) -> f64 {
    let lat_rad = lat.to_radians();
    (lat_rad.tan() + (1.0 / lat_rad.cos())).ln()
}

fn mercator_y_to_lat(y: f64) -> f64 {
    (2.0 * y.exp().atan() - PI / 2.0).to_degrees()
}

/// Longitude/latitude at the center of pixel (px, py) for an image spanning
/// `extent` = [west, south, east, north].
pub fn pixel_to_lon_lat(px: u32, py: u32, width: u32, height: u32, extent: [f64; 4]) -> (f64, f64) {
    let [west, south, east, north] = extent;
    let fx = (px as f64 + 0.5) / width as f64;
    let fy = (py as f64 + 0.5) / height as f64;

    let lon = west + fx * (east - west);
    let y_north = lat_to_mercator_y(north);
    let y_south = lat_to_mercator_y(south);
    let lat = mercator_y_to_lat(y_north - fy * (y_north - y_south));
    (lon, lat)
}

/// Rasterize the boundaries, painting each pixel with the fill of the
/// boundary containing it. `fills` is indexed like `set.boundaries`.
pub fn render_choropleth(config: &OutputConfig, set: &BoundarySet, fills: &[Rgb]) -> Result<RgbaImage> {
    if fills.len() != set.len() {
        return Err(anyhow!("{} fills for {} boundaries", fills.len(), set.len()));
    }
    let (width, height) = (config.width, config.height);

    let rows: Vec<Vec<Rgba<u8>>> = (0..height)
        .into_par_iter()
        .map(|py| {
            (0..width)
                .map(|px| {
                    let (lon, lat) = pixel_to_lon_lat(px, py, width, height, config.extent);
                    set.locate(lon, lat)
                        .map(|i| fills[i].to_rgba())
                        .unwrap_or(BACKGROUND)
                })
                .collect()
        })
        .collect();

    let mut img: RgbaImage = ImageBuffer::new(width, height);
    for (py, row) in rows.into_iter().enumerate() {
        for (px, pixel) in row.into_iter().enumerate() {
            img.put_pixel(px as u32, py as u32, pixel);
        }
    }
    Ok(img)
}

pub fn output_path(config: &OutputConfig, dataset: &str, year: i32) -> PathBuf {
    config.dir.join(format!("{}_{}.png", dataset, year))
}

pub fn save_png(img: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    img.save(path).with_context(|| format!("Failed to save image {:?}", path))?;
    tracing::info!("Wrote {:?}", path);
    Ok(())
}
