//! Panel tables keyed by (entity_id, time_id).
//!
//! A `PanelTable` wraps a polars `DataFrame` with two guarantees enforced at
//! construction: the `(entity_id, time_id)` key is unique, and every value
//! column is Float64 with nulls as the only missing representation. All
//! operations return new tables; nothing mutates in place once built.
//!
//! Merges are always full outer joins on the complete key. Rows are never
//! dropped by a merge; keys present on only one side yield nulls and a
//! [`CoverageNote`] on the result.

use crate::coverage::{CoverageNote, CoverageReport};
use crate::error::{Result, SchemaError};
use crate::month::MonthId;
use chrono::Days;
use ndarray::Array2;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Name of the entity key column.
pub const ENTITY_ID: &str = "entity_id";

/// Name of the time key column.
pub const TIME_ID: &str = "time_id";

/// Time granularity of a table's `time_id` column.
///
/// `Monthly` keys are [`MonthId`] indices. `Weekly` keys are epoch-week
/// indices (whole weeks since 1970-01-01); weekly tables exist only as
/// inputs to [`PanelTable::aggregate_to_monthly`], every estimation path
/// requires `Monthly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One row per entity per calendar month.
    Monthly,
    /// One row per entity per calendar week.
    Weekly,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Monthly => write!(f, "monthly"),
            Self::Weekly => write!(f, "weekly"),
        }
    }
}

/// Aggregation rule for the explicit weekly-to-monthly resampling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateHow {
    /// Mean of the non-null weekly observations in the month.
    Mean,
    /// Sum of the non-null weekly observations in the month.
    Sum,
    /// Last non-null weekly observation in the month.
    Last,
}

/// Listwise-complete rows extracted for estimation.
///
/// Rows where any requested column is null are excluded; the surviving rows
/// keep their entity, time, and cluster labels aligned with `values`.
#[derive(Debug, Clone)]
pub struct CompleteCases {
    /// Entity label per row.
    pub entities: Vec<String>,
    /// Month per row.
    pub times: Vec<MonthId>,
    /// Cluster label per row.
    pub clusters: Vec<String>,
    /// Requested column names, in `values` column order.
    pub columns: Vec<String>,
    /// Row-major value matrix, one column per requested name.
    pub values: Array2<f64>,
}

impl CompleteCases {
    /// Index of a named column in `values`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// An immutable table keyed by `(entity_id, time_id)`.
#[derive(Debug, Clone)]
pub struct PanelTable {
    df: DataFrame,
    granularity: Granularity,
    coverage: CoverageReport,
}

impl PanelTable {
    /// Validate a frame and wrap it as a monthly panel.
    ///
    /// The frame must carry `entity_id` (string) and `time_id` (Int32 month
    /// index) columns; every other column must be numeric and is cast to
    /// Float64. Duplicate keys and null keys are fatal.
    pub fn from_frame(df: DataFrame) -> Result<Self> {
        Self::from_frame_with_granularity(df, Granularity::Monthly)
    }

    /// Validate a frame with an explicit granularity tag.
    pub fn from_frame_with_granularity(df: DataFrame, granularity: Granularity) -> Result<Self> {
        let df = validate_and_canonicalize(df)?;
        Ok(Self {
            df,
            granularity,
            coverage: CoverageReport::new(),
        })
    }

    /// Build a monthly panel from parallel vectors.
    ///
    /// Convenience constructor for collaborator code and tests; runs the same
    /// validation as [`PanelTable::from_frame`].
    pub fn from_parts(
        entities: Vec<String>,
        times: Vec<MonthId>,
        values: Vec<(String, Vec<Option<f64>>)>,
    ) -> Result<Self> {
        let times: Vec<i32> = times.into_iter().map(MonthId::index).collect();
        let mut columns = vec![
            Column::new(ENTITY_ID.into(), entities),
            Column::new(TIME_ID.into(), times),
        ];
        for (name, vals) in values {
            columns.push(Column::new(name.as_str().into(), vals));
        }
        Self::from_frame(DataFrame::new(columns)?)
    }

    /// The underlying frame.
    pub const fn frame(&self) -> &DataFrame {
        &self.df
    }

    /// The table's time granularity.
    pub const fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Coverage notes accumulated while assembling this table.
    pub const fn coverage(&self) -> &CoverageReport {
        &self.coverage
    }

    /// Attach a coverage note to this table.
    pub fn push_coverage(&mut self, note: CoverageNote) {
        self.coverage.push(note);
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// Names of the non-key columns, in frame order.
    pub fn value_columns(&self) -> Vec<String> {
        self.df
            .get_column_names_str()
            .into_iter()
            .filter(|c| *c != ENTITY_ID && *c != TIME_ID)
            .map(str::to_string)
            .collect()
    }

    /// Distinct entity ids, sorted.
    pub fn entities(&self) -> Result<Vec<String>> {
        let ca = self.df.column(ENTITY_ID)?.as_materialized_series().str()?;
        let set: BTreeSet<String> = ca.into_iter().flatten().map(str::to_string).collect();
        Ok(set.into_iter().collect())
    }

    /// Distinct months, sorted.
    pub fn months(&self) -> Result<Vec<MonthId>> {
        let ca = self.df.column(TIME_ID)?.as_materialized_series().i32()?;
        let set: BTreeSet<i32> = ca.into_iter().flatten().collect();
        Ok(set.into_iter().map(MonthId::from).collect())
    }

    /// The `(entity_id, time_id)` key of each row, in row order.
    pub fn keys(&self) -> Result<Vec<(String, MonthId)>> {
        let ents = self.df.column(ENTITY_ID)?.as_materialized_series().str()?;
        let times = self.df.column(TIME_ID)?.as_materialized_series().i32()?;
        Ok(ents
            .into_iter()
            .zip(times)
            .map(|(e, t)| {
                // nulls rejected at construction
                (
                    e.unwrap_or_default().to_string(),
                    MonthId::from(t.unwrap_or_default()),
                )
            })
            .collect())
    }

    /// A value column as nullable floats, in row order.
    pub fn column_f64(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let col = self
            .df
            .column(name)
            .map_err(|_| SchemaError::MissingColumn(name.to_string()))?;
        Ok(col.as_materialized_series().f64()?.into_iter().collect())
    }

    /// Return a new table with an extra value column aligned to row order.
    pub fn add_column(&self, name: &str, values: Vec<Option<f64>>) -> Result<Self> {
        if self.df.get_column_names_str().contains(&name) {
            return Err(SchemaError::ColumnOverlap(name.to_string()));
        }
        let mut df = self.df.clone();
        df.with_column(Column::new(name.into(), values))?;
        Ok(Self {
            df,
            granularity: self.granularity,
            coverage: self.coverage.clone(),
        })
    }

    /// Full outer join with another panel on the complete key.
    ///
    /// Overlapping non-key column names are a [`SchemaError::ColumnOverlap`];
    /// rename with [`PanelTable::merge_aliased`] instead. Mismatched
    /// granularities are fatal: resampling is the explicit
    /// [`PanelTable::aggregate_to_monthly`] operation, never a merge side
    /// effect. No row from either side is ever dropped; one-sided keys
    /// produce nulls and a [`CoverageNote::MergeMismatch`].
    pub fn merge(&self, other: &Self) -> Result<Self> {
        if self.granularity != other.granularity {
            return Err(SchemaError::GranularityMismatch {
                left: self.granularity.to_string(),
                right: other.granularity.to_string(),
            });
        }
        let mine: BTreeSet<String> = self.value_columns().into_iter().collect();
        for col_name in other.value_columns() {
            if mine.contains(&col_name) {
                return Err(SchemaError::ColumnOverlap(col_name));
            }
        }

        let joined = self
            .df
            .clone()
            .lazy()
            .join(
                other.df.clone().lazy(),
                [col(ENTITY_ID), col(TIME_ID)],
                [col(ENTITY_ID), col(TIME_ID)],
                JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
            )
            .sort([ENTITY_ID, TIME_ID], Default::default())
            .collect()?;

        let out_rows = joined.height();
        let mut coverage = self.coverage.clone();
        coverage.extend(&other.coverage);
        let left_only = out_rows - other.height();
        let right_only = out_rows - self.height();
        if left_only > 0 || right_only > 0 {
            coverage.push(CoverageNote::MergeMismatch {
                merged_columns: other.value_columns(),
                left_only,
                right_only,
            });
        }

        Ok(Self {
            df: joined,
            granularity: self.granularity,
            coverage,
        })
    }

    /// Merge after renaming columns of `other` per `(from, to)` aliases.
    pub fn merge_aliased(&self, other: &Self, aliases: &[(&str, &str)]) -> Result<Self> {
        let mut renamed = other.df.clone();
        for (from, to) in aliases {
            renamed
                .rename(from, (*to).into())
                .map_err(|_| SchemaError::MissingColumn((*from).to_string()))?;
        }
        let other = Self {
            df: renamed,
            granularity: other.granularity,
            coverage: other.coverage.clone(),
        };
        self.merge(&other)
    }

    /// Add `{column}_lag{k}`: the value observed `k` months earlier within
    /// the same entity.
    ///
    /// The shift is in calendar months, not rows, so gaps in an entity's
    /// observed range yield nulls rather than silently pulling an older
    /// observation. Values never cross entity boundaries.
    pub fn lag(&self, column: &str, k: u32) -> Result<Self> {
        self.shift_impl(column, k as i32, &format!("{column}_lag{k}"))
    }

    /// Add `{column}_lead{k}`: the value observed `k` months later within
    /// the same entity. Nulls past each entity's last observed month.
    pub fn lead(&self, column: &str, k: u32) -> Result<Self> {
        self.shift_impl(column, -(k as i32), &format!("{column}_lead{k}"))
    }

    fn shift_impl(&self, column: &str, offset: i32, out_name: &str) -> Result<Self> {
        if !self.df.get_column_names_str().contains(&column) {
            return Err(SchemaError::MissingColumn(column.to_string()));
        }
        if self.df.get_column_names_str().contains(&out_name) {
            return Err(SchemaError::ColumnOverlap(out_name.to_string()));
        }

        // Re-key a copy of the source column at time + offset, then left-join
        // back on the full key: row (e, t) picks up the value from
        // (e, t - offset). Keys absent on the shifted side stay null.
        let shifted = self
            .df
            .clone()
            .lazy()
            .select([
                col(ENTITY_ID),
                (col(TIME_ID) + lit(offset)).alias(TIME_ID),
                col(column).alias(out_name),
            ]);

        let joined = self
            .df
            .clone()
            .lazy()
            .join(
                shifted,
                [col(ENTITY_ID), col(TIME_ID)],
                [col(ENTITY_ID), col(TIME_ID)],
                JoinArgs::new(JoinType::Left),
            )
            .sort([ENTITY_ID, TIME_ID], Default::default())
            .collect()?;

        Ok(Self {
            df: joined,
            granularity: self.granularity,
            coverage: self.coverage.clone(),
        })
    }

    /// Restrict to months in `[start, end]`, inclusive on both ends.
    pub fn filter_time_range(&self, start: MonthId, end: MonthId) -> Result<Self> {
        if start > end {
            return Err(SchemaError::InvalidTimeRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        let df = self
            .df
            .clone()
            .lazy()
            .filter(
                col(TIME_ID)
                    .gt_eq(lit(start.index()))
                    .and(col(TIME_ID).lt_eq(lit(end.index()))),
            )
            .collect()?;
        Ok(Self {
            df,
            granularity: self.granularity,
            coverage: self.coverage.clone(),
        })
    }

    /// The named, explicit weekly-to-monthly resampling step.
    ///
    /// Maps each epoch-week key to the month containing the week's first day
    /// and aggregates every value column with `how`. Only defined on weekly
    /// tables; calling it on a monthly table is an error rather than a no-op.
    pub fn aggregate_to_monthly(&self, how: AggregateHow) -> Result<Self> {
        if self.granularity != Granularity::Weekly {
            return Err(SchemaError::WrongGranularity {
                op: "aggregate_to_monthly".to_string(),
                required: "weekly".to_string(),
                actual: self.granularity.to_string(),
            });
        }

        let value_cols = self.value_columns();
        let ents = self.df.column(ENTITY_ID)?.as_materialized_series().str()?;
        let weeks = self.df.column(TIME_ID)?.as_materialized_series().i32()?;
        let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();

        // (entity, month) -> per-column accumulator of observed values
        let mut groups: BTreeMap<(String, i32), Vec<Vec<f64>>> = BTreeMap::new();
        let mut col_values: Vec<Vec<Option<f64>>> = Vec::with_capacity(value_cols.len());
        for name in &value_cols {
            col_values.push(self.column_f64(name)?);
        }

        for (row, (ent, week)) in ents.into_iter().zip(weeks).enumerate() {
            let (Some(ent), Some(week)) = (ent, week) else {
                continue;
            };
            let Some(week_start) = epoch.checked_add_days(Days::new((week as i64 * 7).max(0) as u64))
            else {
                continue;
            };
            let month = MonthId::from_date(week_start);
            let acc = groups
                .entry((ent.to_string(), month.index()))
                .or_insert_with(|| vec![Vec::new(); value_cols.len()]);
            for (j, vals) in col_values.iter().enumerate() {
                if let Some(v) = vals[row] {
                    acc[j].push(v);
                }
            }
        }

        let mut entities = Vec::with_capacity(groups.len());
        let mut times = Vec::with_capacity(groups.len());
        let mut out_cols: Vec<Vec<Option<f64>>> = vec![Vec::new(); value_cols.len()];
        for ((ent, month), acc) in groups {
            entities.push(ent);
            times.push(MonthId::from(month));
            for (j, observed) in acc.into_iter().enumerate() {
                let agg = if observed.is_empty() {
                    None
                } else {
                    Some(match how {
                        AggregateHow::Mean => {
                            observed.iter().sum::<f64>() / observed.len() as f64
                        }
                        AggregateHow::Sum => observed.iter().sum(),
                        AggregateHow::Last => *observed.last().unwrap_or(&f64::NAN),
                    })
                };
                out_cols[j].push(agg);
            }
        }

        let values = value_cols.into_iter().zip(out_cols).collect();
        Self::from_parts(entities, times, values)
    }

    /// Extract listwise-complete rows for the named columns.
    ///
    /// `cluster` names the column supplying cluster labels; `entity_id` is
    /// the common choice. A numeric cluster column is formatted into labels.
    pub fn complete_cases(&self, columns: &[&str], cluster: &str) -> Result<CompleteCases> {
        let ents = self.df.column(ENTITY_ID)?.as_materialized_series().str()?;
        let times = self.df.column(TIME_ID)?.as_materialized_series().i32()?;

        let mut col_values: Vec<Vec<Option<f64>>> = Vec::with_capacity(columns.len());
        for name in columns {
            col_values.push(self.column_f64(name)?);
        }

        let cluster_labels: Vec<Option<String>> = if cluster == ENTITY_ID {
            ents.into_iter()
                .map(|e| e.map(str::to_string))
                .collect()
        } else {
            let series = self
                .df
                .column(cluster)
                .map_err(|_| SchemaError::MissingColumn(cluster.to_string()))?
                .as_materialized_series();
            if let Ok(ca) = series.str() {
                ca.into_iter().map(|v| v.map(str::to_string)).collect()
            } else {
                let ca = series.cast(&DataType::Float64)?;
                ca.f64()?
                    .into_iter()
                    .map(|v| v.map(|x| format!("{x}")))
                    .collect()
            }
        };

        let n = self.df.height();
        let mut entities = Vec::new();
        let mut months = Vec::new();
        let mut clusters = Vec::new();
        let mut rows: Vec<f64> = Vec::new();

        let ent_vec: Vec<Option<&str>> = ents.into_iter().collect();
        let time_vec: Vec<Option<i32>> = times.into_iter().collect();
        for row in 0..n {
            let complete = col_values.iter().all(|vals| vals[row].is_some());
            let (Some(ent), Some(time), Some(clu), true) = (
                ent_vec[row],
                time_vec[row],
                cluster_labels[row].as_deref(),
                complete,
            ) else {
                continue;
            };
            entities.push(ent.to_string());
            months.push(MonthId::from(time));
            clusters.push(clu.to_string());
            for vals in &col_values {
                rows.push(vals[row].unwrap_or(f64::NAN));
            }
        }

        let n_kept = entities.len();
        let values = Array2::from_shape_vec((n_kept, columns.len()), rows)
            .map_err(|e| SchemaError::MissingColumn(e.to_string()))?;
        Ok(CompleteCases {
            entities,
            times: months,
            clusters,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            values,
        })
    }
}

/// Check keys, cast value columns to Float64, sort canonically.
fn validate_and_canonicalize(df: DataFrame) -> Result<DataFrame> {
    for key in [ENTITY_ID, TIME_ID] {
        if !df.get_column_names_str().contains(&key) {
            return Err(SchemaError::MissingColumn(key.to_string()));
        }
    }

    let ents = df
        .column(ENTITY_ID)?
        .as_materialized_series()
        .str()
        .map_err(|_| SchemaError::NonNumericColumn {
            column: ENTITY_ID.to_string(),
            dtype: df
                .column(ENTITY_ID)
                .map(|c| c.dtype().to_string())
                .unwrap_or_default(),
        })?;
    let times_series = df.column(TIME_ID)?.as_materialized_series();
    let times_cast;
    let times = if let Ok(ca) = times_series.i32() {
        ca
    } else {
        times_cast = times_series.cast(&DataType::Int32)?;
        times_cast.i32()?
    };

    // Null keys and duplicate keys are both fatal.
    let mut seen: HashMap<(String, i32), usize> = HashMap::new();
    for (row, (ent, time)) in ents.into_iter().zip(times).enumerate() {
        let Some(ent) = ent else {
            return Err(SchemaError::NullKey {
                column: ENTITY_ID.to_string(),
                row,
            });
        };
        let Some(time) = time else {
            return Err(SchemaError::NullKey {
                column: TIME_ID.to_string(),
                row,
            });
        };
        *seen.entry((ent.to_string(), time)).or_insert(0) += 1;
    }
    if let Some(((ent, time), count)) = seen.iter().find(|&(_, &c)| c > 1) {
        return Err(SchemaError::DuplicateKey {
            entity: ent.clone(),
            time: MonthId::from(*time).to_string(),
            count: *count,
        });
    }

    // Cast every value column to Float64; non-numeric dtypes are fatal.
    let mut out = df.clone();
    for name in df.get_column_names_str() {
        if name == ENTITY_ID || name == TIME_ID {
            continue;
        }
        let series = df.column(name)?.as_materialized_series();
        if !series.dtype().is_primitive_numeric() {
            return Err(SchemaError::NonNumericColumn {
                column: name.to_string(),
                dtype: series.dtype().to_string(),
            });
        }
        if series.dtype() != &DataType::Float64 {
            out.with_column(series.cast(&DataType::Float64)?)?;
        }
    }
    if times_series.dtype() != &DataType::Int32 {
        out.with_column(times_series.cast(&DataType::Int32)?)?;
    }

    Ok(out.sort([ENTITY_ID, TIME_ID], Default::default())?)
}
