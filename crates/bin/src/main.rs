//! Bartik CLI binary.
//!
//! Two commands mirror the engine's two artifacts: `instrument` builds the
//! shift-share instrument panel from raw weight and series files, and `irf`
//! estimates impulse responses from a panel and a spec file.

use bartik::estimate::{IVEstimator, IvConfig, LocalProjectionRunner, RegressionSpec};
use bartik::instrument::{
    CategoryObservation, DecayConfig, ExposureBuilder, ExposureConfig, InstrumentBuilder,
    MissingResidual, residualize,
};
use bartik::output::{ExportFormat, write_instrument_panel, write_irf};
use bartik::panel::{MonthId, PanelTable};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "bartik")]
#[command(about = "Shift-share LP-IV estimation engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the instrument panel from weight and series files
    Instrument {
        /// Weights CSV: entity_id, time_id (YYYY-MM), category, value
        #[arg(long)]
        weights: PathBuf,

        /// Aggregate series CSV: time_id (YYYY-MM), value
        #[arg(long)]
        aggregate: PathBuf,

        /// Control series CSV: time_id (YYYY-MM), value
        #[arg(long)]
        control: PathBuf,

        /// Number of ordered weight buckets
        #[arg(long)]
        categories: usize,

        /// Last month of the exposure reference window (YYYY-MM)
        #[arg(long)]
        reference: String,

        /// Reference window length in months
        #[arg(long, default_value = "12")]
        window: u32,

        /// Exponential recency decay rate, in (0, 1]
        #[arg(long)]
        decay_rate: Option<f64>,

        /// Half-life in months for the decay
        #[arg(long, default_value = "6.0")]
        half_life: f64,

        /// Make a gap in the shock poison the cumulative series
        #[arg(long)]
        propagate_gaps: bool,

        /// Output path; format inferred from the extension (csv or json)
        #[arg(long)]
        output: PathBuf,
    },

    /// Estimate impulse responses from a panel and a spec file
    Irf {
        /// Panel CSV: entity_id, time_id (YYYY-MM), then value columns
        #[arg(long)]
        panel: PathBuf,

        /// Spec JSON: one RegressionSpec or a list of variants
        #[arg(long)]
        specs: PathBuf,

        /// Highest horizon; the ladder is 0..=horizons
        #[arg(long, default_value = "12")]
        horizons: u32,

        /// Output path; multi-spec runs get an index suffix per variant
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Instrument {
            weights,
            aggregate,
            control,
            categories,
            reference,
            window,
            decay_rate,
            half_life,
            propagate_gaps,
            output,
        } => build_instrument(
            &weights,
            &aggregate,
            &control,
            categories,
            &reference,
            window,
            decay_rate,
            half_life,
            propagate_gaps,
            &output,
        ),
        Commands::Irf {
            panel,
            specs,
            horizons,
            output,
        } => run_irf(&panel, &specs, horizons, &output),
    }
}

#[derive(Debug, Deserialize)]
struct WeightRecord {
    entity_id: String,
    time_id: String,
    category: usize,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct SeriesRecord {
    time_id: String,
    value: f64,
}

fn read_weights(path: &Path) -> Result<Vec<CategoryObservation>, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut observations = Vec::new();
    for record in rdr.deserialize() {
        let record: WeightRecord = record?;
        observations.push(CategoryObservation {
            entity_id: record.entity_id,
            time_id: MonthId::parse(&record.time_id)?,
            category: record.category,
            value: record.value,
        });
    }
    Ok(observations)
}

fn read_series(path: &Path) -> Result<Vec<(MonthId, f64)>, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut series = Vec::new();
    for record in rdr.deserialize() {
        let record: SeriesRecord = record?;
        series.push((MonthId::parse(&record.time_id)?, record.value));
    }
    Ok(series)
}

/// Read a wide panel CSV: `entity_id`, `time_id`, then float columns with
/// empty cells as missing.
fn read_panel(path: &Path) -> Result<PanelTable, Box<dyn Error>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();

    let entity_idx = headers
        .iter()
        .position(|h| h == "entity_id")
        .ok_or("panel file has no entity_id column")?;
    let time_idx = headers
        .iter()
        .position(|h| h == "time_id")
        .ok_or("panel file has no time_id column")?;

    let value_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != entity_idx && *i != time_idx)
        .map(|(i, h)| (i, h.to_string()))
        .collect();

    let mut entities = Vec::new();
    let mut times = Vec::new();
    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); value_columns.len()];

    for record in rdr.records() {
        let record = record?;
        entities.push(
            record
                .get(entity_idx)
                .ok_or("short record")?
                .to_string(),
        );
        times.push(MonthId::parse(record.get(time_idx).ok_or("short record")?)?);
        for (slot, (idx, name)) in values.iter_mut().zip(&value_columns) {
            let cell = record.get(*idx).unwrap_or("");
            slot.push(if cell.is_empty() {
                None
            } else {
                Some(cell.parse::<f64>().map_err(|e| {
                    format!("column {name}: bad float {cell:?}: {e}")
                })?)
            });
        }
    }

    let named: Vec<(String, Vec<Option<f64>>)> = value_columns
        .into_iter()
        .map(|(_, name)| name)
        .zip(values)
        .collect();
    Ok(PanelTable::from_parts(entities, times, named)?)
}

#[allow(clippy::too_many_arguments)]
fn build_instrument(
    weights: &Path,
    aggregate: &Path,
    control: &Path,
    categories: usize,
    reference: &str,
    window: u32,
    decay_rate: Option<f64>,
    half_life: f64,
    propagate_gaps: bool,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let observations = read_weights(weights)?;
    let aggregate = read_series(aggregate)?;
    let control = read_series(control)?;

    let config = ExposureConfig {
        n_categories: categories,
        reference_month: MonthId::parse(reference)?,
        window_months: window,
        decay: decay_rate.map(|rate| DecayConfig {
            rate,
            half_life_months: half_life,
        }),
    };

    let exposure = ExposureBuilder::new(config).fit(&observations)?;
    if !exposure.excluded().is_empty() {
        eprintln!(
            "warning: {} entities excluded from exposure fit: {}",
            exposure.excluded().len(),
            exposure.excluded().join(", ")
        );
    }

    let shock = residualize(&aggregate, &control)?;
    let policy = if propagate_gaps {
        MissingResidual::Propagate
    } else {
        MissingResidual::TreatAsZero
    };
    let panel = InstrumentBuilder::new(policy).build(&exposure, &shock)?;

    let format = ExportFormat::from_path(output)?;
    write_instrument_panel(panel.table(), output, format)?;
    println!(
        "wrote {} rows ({} entities x {} months) to {}",
        panel.table().height(),
        exposure.entities().len() + exposure.excluded().len(),
        shock.len(),
        output.display()
    );
    Ok(())
}

fn run_irf(
    panel_path: &Path,
    specs_path: &Path,
    horizons: u32,
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let panel = read_panel(panel_path)?;
    let specs = read_specs(specs_path)?;
    let format = ExportFormat::from_path(output)?;

    let runner = LocalProjectionRunner::new(IVEstimator::new(IvConfig::default()));

    let pb = ProgressBar::new(specs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template")
            .progress_chars("█▓░"),
    );

    for (i, spec) in specs.iter().enumerate() {
        pb.set_message(format!("estimating {}", spec.outcome));
        let table = runner.run_par(spec, &panel, 0..=horizons)?;
        let path = variant_path(output, i, specs.len());
        write_irf(&table, &path, format)?;
        let failed = table.n_failed();
        if failed > 0 {
            pb.println(format!(
                "{}: {} of {} horizons failed",
                path.display(),
                failed,
                table.len()
            ));
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    Ok(())
}

/// Parse a spec file holding either a single spec or a list of variants.
fn read_specs(path: &Path) -> Result<Vec<RegressionSpec>, Box<dyn Error>> {
    let content = std::fs::read_to_string(path)?;
    if let Ok(list) = serde_json::from_str::<Vec<RegressionSpec>>(&content) {
        if list.is_empty() {
            return Err("spec file contains an empty list".into());
        }
        return Ok(list);
    }
    Ok(vec![serde_json::from_str::<RegressionSpec>(&content)?])
}

/// Output path for one spec variant: unchanged for single-spec runs, an
/// `_<i>` suffix before the extension otherwise.
fn variant_path(output: &Path, index: usize, n_specs: usize) -> PathBuf {
    if n_specs == 1 {
        return output.to_path_buf();
    }
    let stem = output
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("irf");
    let ext = output.extension().and_then(|e| e.to_str()).unwrap_or("csv");
    output.with_file_name(format!("{stem}_{index}.{ext}"))
}
