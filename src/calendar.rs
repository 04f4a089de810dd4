//! Calendar alignment of mixed-frequency sources onto one daily index.
//!
//! Every source is reindexed onto the contiguous daily range spanning all
//! sources and forward-filled. Leading gaps stay missing. Trailing rows past
//! a source's last observation are carried values, not observations, and are
//! reported through [`AlignedPanel::staleness`].

use crate::config::{StalenessAction, StalenessPolicy};
use crate::error::{DataQualityWarning, ForecastError, Result};
use crate::series::{Frequency, SourceKind, SourceSeries};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

/// One forward-filled column of the aligned panel.
#[derive(Debug, Clone, Serialize)]
pub struct PanelColumn {
    pub id: String,
    pub kind: SourceKind,
    pub frequency: Frequency,
    pub first_observed: NaiveDate,
    pub last_observed: NaiveDate,
    values: Vec<Option<f64>>,
}

impl PanelColumn {
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Index of the first non-missing row, if any row is populated.
    pub fn first_valid_index(&self) -> Option<usize> {
        self.values.iter().position(Option::is_some)
    }
}

/// Trailing-edge freshness of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStaleness {
    pub source_id: String,
    pub last_observed: NaiveDate,
    /// Rows at the panel's end holding a carried (not observed) value
    pub carried_days: i64,
    pub budget_days: i64,
}

impl SourceStaleness {
    pub fn is_stale(&self) -> bool {
        self.carried_days > self.budget_days
    }
}

/// Daily-indexed table, one column per source.
#[derive(Debug, Clone, Serialize)]
pub struct AlignedPanel {
    dates: Vec<NaiveDate>,
    columns: Vec<PanelColumn>,
    staleness: Vec<SourceStaleness>,
    warnings: Vec<DataQualityWarning>,
}

impl AlignedPanel {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn columns(&self) -> &[PanelColumn] {
        &self.columns
    }

    pub fn column(&self, id: &str) -> Option<&PanelColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn staleness(&self) -> &[SourceStaleness] {
        &self.staleness
    }

    pub fn warnings(&self) -> &[DataQualityWarning] {
        &self.warnings
    }
}

/// Reconciles source series onto one continuous daily calendar.
#[derive(Debug, Clone, Default)]
pub struct CalendarAligner {
    policy: StalenessPolicy,
}

impl CalendarAligner {
    pub fn new(policy: StalenessPolicy) -> Self {
        Self { policy }
    }

    fn budget_for(&self, frequency: Frequency) -> i64 {
        self.policy
            .max_trailing_days
            .unwrap_or_else(|| frequency.expected_gap_days())
    }

    /// Align every series onto the union daily range.
    ///
    /// Fails with `MissingSourceData` if any series (or the whole input) is
    /// empty.
    pub fn align(&self, sources: &[SourceSeries]) -> Result<AlignedPanel> {
        if sources.is_empty() {
            return Err(ForecastError::MissingSourceData {
                source_id: "<no sources>".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for series in sources {
            if series.is_empty() {
                return Err(ForecastError::MissingSourceData {
                    source_id: series.id.clone(),
                });
            }
            if !seen.insert(series.id.as_str()) {
                return Err(ForecastError::contract(
                    series.id.clone(),
                    "source supplied more than once",
                ));
            }
        }

        let missing = || ForecastError::MissingSourceData {
            source_id: sources[0].id.clone(),
        };
        let start = sources
            .iter()
            .filter_map(SourceSeries::first_date)
            .min()
            .ok_or_else(missing)?;
        let mut end = sources
            .iter()
            .filter_map(SourceSeries::last_date)
            .max()
            .ok_or_else(missing)?;

        if self.policy.action == StalenessAction::Truncate {
            let edge = sources
                .iter()
                .filter_map(|s| {
                    s.last_date()
                        .map(|l| l + Duration::days(self.budget_for(s.frequency)))
                })
                .min()
                .unwrap_or(end);
            if edge < end {
                debug!(from = %end, to = %edge.max(start), "Truncating panel live edge");
                end = edge.max(start);
            }
        }

        let days = (end - start).num_days() as usize + 1;
        let dates: Vec<NaiveDate> = (0..days)
            .map(|i| start + Duration::days(i as i64))
            .collect();

        let columns: Vec<PanelColumn> = sources
            .iter()
            .map(|series| forward_fill(series, &dates))
            .collect();

        let staleness: Vec<SourceStaleness> = columns
            .iter()
            .map(|col| SourceStaleness {
                source_id: col.id.clone(),
                last_observed: col.last_observed,
                carried_days: (end - col.last_observed).num_days().max(0),
                budget_days: self.budget_for(col.frequency),
            })
            .collect();

        let mut warnings = Vec::new();
        if self.policy.action == StalenessAction::Warn {
            for s in staleness.iter().filter(|s| s.is_stale()) {
                warn!(
                    source = %s.source_id,
                    last_observed = %s.last_observed,
                    carried_days = s.carried_days,
                    budget_days = s.budget_days,
                    "Source carried forward past its staleness budget"
                );
                warnings.push(DataQualityWarning::StaleSource {
                    source_id: s.source_id.clone(),
                    last_observed: s.last_observed,
                    carried_days: s.carried_days,
                });
            }
        }

        debug!(
            sources = columns.len(),
            rows = dates.len(),
            start = %start,
            end = %end,
            "Aligned panel"
        );

        Ok(AlignedPanel {
            dates,
            columns,
            staleness,
            warnings,
        })
    }
}

/// Reindex one series onto `dates`, carrying each observation until superseded.
fn forward_fill(series: &SourceSeries, dates: &[NaiveDate]) -> PanelColumn {
    let observations = series.observations();
    let mut values = Vec::with_capacity(dates.len());
    let mut cursor = 0;
    let mut current: Option<f64> = None;

    for date in dates {
        while cursor < observations.len() && observations[cursor].0 <= *date {
            current = Some(observations[cursor].1);
            cursor += 1;
        }
        values.push(current);
    }

    // Observations exist: the aligner rejects empty series before this point.
    let first_observed = observations.first().map(|(d, _)| *d).unwrap_or(dates[0]);
    let last_observed = observations.last().map(|(d, _)| *d).unwrap_or(dates[0]);

    PanelColumn {
        id: series.id.clone(),
        kind: series.kind,
        frequency: series.frequency,
        first_observed,
        last_observed,
        values,
    }
}
