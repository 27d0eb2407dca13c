use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use solar_sense::config::AppConfig;
use solar_sense::types::{Dataset, YearlyCountryMetric};
use solar_sense::{color, data, meteomatics, processing, render, server, spatial};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a dataset and print it as JSON
    Aggregate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value = "skin-cancer")]
        dataset: Dataset,
        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Merge long-format (Years,Number) exports for one country into a wide CSV
    Combine {
        #[arg(short, long, value_name = "DIR")]
        dir: PathBuf,
        #[arg(long)]
        country: String,
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
        /// Preamble lines before the header row of each export
        #[arg(long, default_value_t = 2)]
        skip_rows: usize,
    },
    /// Average the remote UV series of every EU country for a year
    FetchUv {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        year: i32,
        /// Wide CSV to merge into (defaults to input.avg_uv_csv)
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Render a choropleth PNG for one year
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        year: Option<i32>,
        #[arg(short, long, value_enum, default_value = "skin-cancer")]
        dataset: Dataset,
    },
    /// Serve the normalized data and map API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn load_datasets(config: &AppConfig) -> Result<(YearlyCountryMetric, YearlyCountryMetric)> {
    let aliases = &config.input.aliases;
    let cases = data::load_metric_csv(&config.input.skin_cancer_csv, aliases)?;
    let uv = data::load_metric_csv(&config.input.avg_uv_csv, aliases)?;
    Ok((cases, uv))
}

fn load_boundaries(config: &AppConfig, metric: &YearlyCountryMetric) -> Result<spatial::BoundarySet> {
    let boundaries = data::load_boundaries(&config.input.boundaries, &config.input.name_property)?;
    for year in metric.keys() {
        let missing = data::unmatched(metric, *year, &boundaries);
        if !missing.is_empty() {
            warn!("{}: no boundary for {}", year, missing.join(", "));
        }
    }
    Ok(spatial::BoundarySet::new(boundaries))
}

fn write_output(out: Option<&Path>, body: &str) -> Result<()> {
    match out {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            file.write_all(body.as_bytes())?;
            info!("Wrote {:?}", path);
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(body.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregate { config, dataset, out } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let metric = data::load_metric_csv(app_config.dataset_path(dataset), &app_config.input.aliases)?;
            let body = serde_json::to_string_pretty(&serde_json::json!({ "data": metric }))?;
            write_output(out.as_deref(), &body)?;
        }
        Commands::Combine { dir, country, out, skip_rows } => {
            let existing = data::load_or_empty(&out)?;
            let (combined, merged) = data::combine_exports(&existing, &dir, &country, skip_rows)?;
            if merged == 0 {
                warn!("No usable exports in {:?}; {:?} left unchanged", dir, out);
            } else {
                data::save_metric_csv(&combined, &out)?;
                info!("Merged {} exports for {} into {:?}", merged, country, out);
            }
        }
        Commands::FetchUv { config, year, out } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let out = out.unwrap_or_else(|| app_config.input.avg_uv_csv.clone());

            let client = meteomatics::MeteomaticsClient::new(app_config.meteomatics.clone())?;
            let fetched = client.year_averages(year).await?;

            let mut metric = data::load_or_empty(&out)?;
            for (year, countries) in fetched {
                metric.entry(year).or_default().extend(countries);
            }
            data::save_metric_csv(&metric, &out)?;
            info!("Updated {:?} for {}", out, year);
        }
        Commands::Render { config, year, dataset } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let year = year.unwrap_or(app_config.years.default);
            if !app_config.years.contains(year) {
                return Err(anyhow!(
                    "year {} is outside {}..={}",
                    year, app_config.years.min, app_config.years.max
                ));
            }
            let (cases, uv) = load_datasets(&app_config)?;
            let (primary, secondary, label) = match dataset {
                Dataset::SkinCancer => (&cases, &uv, "skin-cancer"),
                Dataset::AvgUv => (&uv, &cases, "avg-uv"),
            };

            let set = load_boundaries(&app_config, primary)?;
            let choropleth = processing::build_choropleth(
                primary,
                secondary,
                year,
                &set.boundaries,
                app_config.color.degenerate,
                app_config.color.legend_stops,
            );
            let fills: Vec<color::Rgb> = choropleth.features.iter().map(|f| f.fill).collect();

            info!("Rendering {} for {} ({} boundaries)", label, year, set.len());
            let img = render::render_choropleth(&app_config.output, &set, &fills)?;
            render::save_png(&img, &render::output_path(&app_config.output, label, year))?;
        }
        Commands::Serve { config } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let (cases, uv) = load_datasets(&app_config)?;
            let boundaries = load_boundaries(&app_config, &cases)?;
            let meteomatics = meteomatics::MeteomaticsClient::new(app_config.meteomatics.clone())?;

            server::start_server(server::AppState {
                config: app_config,
                cases,
                uv,
                boundaries,
                meteomatics,
            })
            .await?;
        }
    }

    Ok(())
}
