//! Serialization of the engine's two artifact shapes.
//!
//! The instrument panel and the impulse-response table both flatten into
//! row records that serialize to CSV (csv + serde) or JSON (serde_json).
//! Failed horizons become rows with `status = failed` and a reason column;
//! dropping them would hide exactly the information a reviewer needs.

use bartik_estimate::{HorizonEntry, ImpulseResponseTable, OveridStatus};
use bartik_panel::{MonthId, PanelTable};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during export or reload.
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV serialization error.
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The panel is missing an expected instrument column.
    #[error(transparent)]
    Schema(#[from] bartik_panel::SchemaError),

    /// Invalid or unrecognized format.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values format.
    Csv,

    /// Compact JSON format.
    Json,

    /// Pretty-printed JSON format.
    PrettyJson,
}

impl ExportFormat {
    /// Get the file extension for this format.
    pub const fn extension(&self) -> &str {
        match self {
            Self::Csv => "csv",
            Self::Json | Self::PrettyJson => "json",
        }
    }

    /// Infer the format from a path's extension.
    ///
    /// # Errors
    /// Returns [`ExportError::InvalidFormat`] for anything but `csv`/`json`.
    pub fn from_path(path: &Path) -> Result<Self, ExportError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => Ok(Self::Csv),
            Some("json") => Ok(Self::Json),
            other => Err(ExportError::InvalidFormat(format!(
                "unsupported extension {:?}, expected csv or json",
                other.unwrap_or("")
            ))),
        }
    }
}

/// One instrument-panel cell as a flat record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstrumentRow {
    /// Entity key.
    pub entity_id: String,
    /// Month key.
    pub time_id: MonthId,
    /// Centered exposure score; missing for excluded entities.
    pub exposure: Option<f64>,
    /// Shock residual; missing at gaps in the joint range.
    pub shock: Option<f64>,
    /// `exposure * shock`; missing when either operand is.
    pub instrument: Option<f64>,
    /// `exposure * cumulative shock` under the configured gap policy.
    pub instrument_cumulative: Option<f64>,
}

/// Flatten an instrument panel into row records.
///
/// # Errors
/// Fails when the table lacks one of the four instrument columns.
pub fn instrument_rows(table: &PanelTable) -> Result<Vec<InstrumentRow>, ExportError> {
    let keys = table.keys()?;
    let exposure = table.column_f64("exposure")?;
    let shock = table.column_f64("shock")?;
    let instrument = table.column_f64("instrument")?;
    let cumulative = table.column_f64("instrument_cumulative")?;

    Ok(keys
        .into_iter()
        .enumerate()
        .map(|(i, (entity_id, time_id))| InstrumentRow {
            entity_id,
            time_id,
            exposure: exposure[i],
            shock: shock[i],
            instrument: instrument[i],
            instrument_cumulative: cumulative[i],
        })
        .collect())
}

/// Whether an IRF row carries an estimate or a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// The horizon estimated successfully.
    Ok,
    /// The horizon failed; see the `failure` column.
    Failed,
}

/// One impulse-response horizon as a flat record.
///
/// The coefficient columns describe the leading (first endogenous)
/// regressor; failed horizons leave them empty and fill `failure`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IrfRow {
    /// Horizon in months.
    pub horizon: u32,
    /// Row status.
    pub status: RowStatus,
    /// Point estimate.
    pub coefficient: Option<f64>,
    /// Cluster-robust standard error.
    pub std_error: Option<f64>,
    /// Lower end of the 95% confidence interval.
    pub ci_lower: Option<f64>,
    /// Upper end of the 95% confidence interval.
    pub ci_upper: Option<f64>,
    /// Complete-case sample size.
    pub n_obs: Option<usize>,
    /// Number of clusters.
    pub n_clusters: Option<usize>,
    /// First-stage F statistic, when the fit had a first stage.
    #[serde(rename = "diagnostic_first_stage_f")]
    pub first_stage_f: Option<f64>,
    /// Sargan p-value, when the fit was overidentified.
    #[serde(rename = "diagnostic_sargan_p")]
    pub sargan_p: Option<f64>,
    /// Failure reason for failed horizons.
    pub failure: Option<String>,
}

/// Flatten an impulse-response table into row records, failures included.
pub fn irf_rows(irf: &ImpulseResponseTable) -> Vec<IrfRow> {
    irf.entries()
        .iter()
        .map(|(horizon, entry)| match entry {
            HorizonEntry::Estimate(result) => {
                let primary = result.primary();
                IrfRow {
                    horizon: *horizon,
                    status: RowStatus::Ok,
                    coefficient: primary.map(|c| c.coefficient),
                    std_error: primary.map(|c| c.std_error),
                    ci_lower: primary.map(|c| c.ci_lower),
                    ci_upper: primary.map(|c| c.ci_upper),
                    n_obs: Some(result.n_obs),
                    n_clusters: Some(result.n_clusters),
                    first_stage_f: result.diagnostics.first_stage_f,
                    sargan_p: match &result.diagnostics.overid {
                        OveridStatus::Sargan { p_value, .. } => Some(*p_value),
                        OveridStatus::Unavailable { .. } => None,
                    },
                    failure: None,
                }
            }
            HorizonEntry::Failed { reason } => IrfRow {
                horizon: *horizon,
                status: RowStatus::Failed,
                coefficient: None,
                std_error: None,
                ci_lower: None,
                ci_upper: None,
                n_obs: None,
                n_clusters: None,
                first_stage_f: None,
                sargan_p: None,
                failure: Some(reason.clone()),
            },
        })
        .collect()
}

/// Trait for exporting data in various formats.
pub trait Exporter {
    /// Export data to a string in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError>;

    /// Export data to a file in the specified format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or file writing fails.
    fn export_to_file(&self, path: &Path, format: ExportFormat) -> Result<(), ExportError> {
        let content = self.export_to_string(format)?;
        let mut file = File::create(path)?;
        file.write_all(content.as_bytes())?;
        Ok(())
    }
}

fn records_to_string<T: Serialize>(
    records: &[T],
    format: ExportFormat,
) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => {
            let mut wtr = csv::Writer::from_writer(vec![]);
            for record in records {
                wtr.serialize(record)?;
            }
            let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
            String::from_utf8(bytes).map_err(|e| ExportError::InvalidFormat(e.to_string()))
        }
        ExportFormat::Json => Ok(serde_json::to_string(records)?),
        ExportFormat::PrettyJson => Ok(serde_json::to_string_pretty(records)?),
    }
}

impl Exporter for Vec<InstrumentRow> {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        records_to_string(self, format)
    }
}

impl Exporter for Vec<IrfRow> {
    fn export_to_string(&self, format: ExportFormat) -> Result<String, ExportError> {
        records_to_string(self, format)
    }
}

/// Write an instrument panel to disk.
///
/// # Errors
/// Fails on missing instrument columns, serialization, or IO.
pub fn write_instrument_panel(
    table: &PanelTable,
    path: &Path,
    format: ExportFormat,
) -> Result<(), ExportError> {
    instrument_rows(table)?.export_to_file(path, format)
}

/// Write an impulse-response table to disk.
///
/// # Errors
/// Fails on serialization or IO.
pub fn write_irf(
    irf: &ImpulseResponseTable,
    path: &Path,
    format: ExportFormat,
) -> Result<(), ExportError> {
    irf_rows(irf).export_to_file(path, format)
}

/// Reload impulse-response rows from a string.
///
/// CSV and JSON both round-trip coefficients and standard errors exactly:
/// the serializers emit the shortest decimal that parses back to the same
/// float.
///
/// # Errors
/// Fails on malformed input.
pub fn read_irf_str(content: &str, format: ExportFormat) -> Result<Vec<IrfRow>, ExportError> {
    match format {
        ExportFormat::Csv => {
            let mut rdr = csv::Reader::from_reader(content.as_bytes());
            let mut rows = Vec::new();
            for record in rdr.deserialize() {
                rows.push(record?);
            }
            Ok(rows)
        }
        ExportFormat::Json | ExportFormat::PrettyJson => Ok(serde_json::from_str(content)?),
    }
}

/// Reload impulse-response rows from a file.
///
/// # Errors
/// Fails on IO or malformed input.
pub fn read_irf(path: &Path, format: ExportFormat) -> Result<Vec<IrfRow>, ExportError> {
    let content = std::fs::read_to_string(path)?;
    read_irf_str(&content, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bartik_estimate::{CoefficientEstimate, Diagnostics, EstimationResult};
    use bartik_panel::CoverageReport;
    use rstest::rstest;

    fn fake_result(coefficient: f64) -> EstimationResult {
        EstimationResult {
            coefficients: vec![CoefficientEstimate::new(
                "instrumented".to_string(),
                coefficient,
                0.123_456_789_012_345_6,
                0.1,
            )],
            n_obs: 480,
            n_clusters: 20,
            diagnostics: Diagnostics {
                first_stage_f: Some(23.7),
                overid: OveridStatus::Unavailable {
                    reason: "just-identified".to_string(),
                },
                fe_iterations: 4,
                fe_converged: true,
                singleton_entity_groups: 0,
                singleton_time_groups: 0,
            },
            coverage: CoverageReport::new(),
        }
    }

    fn fake_irf() -> ImpulseResponseTable {
        ImpulseResponseTable::from_entries(vec![
            (0, HorizonEntry::Estimate(fake_result(1.5))),
            (
                1,
                HorizonEntry::Estimate(fake_result(0.510_123_456_789_012_3)),
            ),
            (
                2,
                HorizonEntry::Failed {
                    reason: "too few observations: 3 rows for 4 parameters".to_string(),
                },
            ),
        ])
    }

    #[rstest]
    #[case(ExportFormat::Csv)]
    #[case(ExportFormat::Json)]
    fn test_irf_round_trip_is_exact(#[case] format: ExportFormat) {
        let rows = irf_rows(&fake_irf());
        let content = rows.export_to_string(format).unwrap();
        let back = read_irf_str(&content, format).unwrap();
        assert_eq!(back, rows);
        // bitwise equality on the floats specifically
        assert_eq!(back[1].coefficient, rows[1].coefficient);
        assert_eq!(back[1].std_error, rows[1].std_error);
    }

    #[test]
    fn test_failed_horizon_is_a_row_not_a_gap() {
        let rows = irf_rows(&fake_irf());
        assert_eq!(rows.len(), 3);
        let failed = &rows[2];
        assert_eq!(failed.status, RowStatus::Failed);
        assert!(failed.coefficient.is_none());
        assert!(failed.failure.as_deref().unwrap().contains("too few"));

        let csv = rows.export_to_string(ExportFormat::Csv).unwrap();
        assert!(csv.contains("failed"));
        assert!(csv.contains("too few observations"));
    }

    #[test]
    fn test_irf_csv_has_diagnostic_columns() {
        let rows = irf_rows(&fake_irf());
        let csv = rows.export_to_string(ExportFormat::Csv).unwrap();
        let header = csv.lines().next().unwrap();
        assert!(header.contains("diagnostic_first_stage_f"));
        assert!(header.contains("diagnostic_sargan_p"));
        assert!(header.contains("ci_lower"));
    }

    #[test]
    fn test_instrument_rows_preserve_missing() {
        let months: Vec<MonthId> = vec![
            MonthId::from_ym(2020, 1).unwrap(),
            MonthId::from_ym(2020, 2).unwrap(),
        ];
        let table = PanelTable::from_parts(
            vec!["A".to_string(), "A".to_string()],
            months,
            vec![
                ("exposure".to_string(), vec![Some(1.0), Some(1.0)]),
                ("shock".to_string(), vec![Some(0.5), None]),
                ("instrument".to_string(), vec![Some(0.5), None]),
                ("instrument_cumulative".to_string(), vec![Some(0.5), Some(0.5)]),
            ],
        )
        .unwrap();

        let rows = instrument_rows(&table).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[1].instrument.is_none());

        let csv = rows.export_to_string(ExportFormat::Csv).unwrap();
        // the missing cells are empty fields, not zeros
        assert!(csv.lines().nth(2).unwrap().contains(",,"));
    }

    #[test]
    fn test_export_to_file_and_reload() {
        let rows = irf_rows(&fake_irf());
        let path = std::env::temp_dir().join("bartik_irf_test.csv");
        rows.export_to_file(&path, ExportFormat::Csv).unwrap();
        let back = read_irf(&path, ExportFormat::Csv).unwrap();
        assert_eq!(back, rows);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            ExportFormat::from_path(Path::new("out/irf.csv")).unwrap(),
            ExportFormat::Csv
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("irf.json")).unwrap(),
            ExportFormat::Json
        );
        assert!(ExportFormat::from_path(Path::new("irf.xlsx")).is_err());
    }

    #[test]
    fn test_pretty_json_is_indented() {
        let rows = irf_rows(&fake_irf());
        let json = rows.export_to_string(ExportFormat::PrettyJson).unwrap();
        assert!(json.contains("  "));
        let back = read_irf_str(&json, ExportFormat::PrettyJson).unwrap();
        assert_eq!(back, rows);
    }
}
