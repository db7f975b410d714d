//! Report synthesis
//!
//! This module turns per-metric series and optional adherence data into a
//! structured report document. Every finding, recommendation and flag comes
//! from a fixed rule applied metric by metric, so the same inputs always
//! produce the same document.

use crate::classifier::MetricClassifier;
use crate::config::ReportThresholds;
use crate::error::EngineError;
use crate::reference::DEFAULT_SUB_TYPE;
use crate::types::{
    AdherenceMetrics, AdherenceSummary, Aggregate, Channel, ClassifiedReading, DateRange, Flag,
    FlagSeverity, Measurement, MetricAverages, MetricType, RegimenAdherence, ReportDocument,
    ReportMetrics, ReportSection, ReportSummary, Series, Status, StatusCounts, TierPercentages,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything a report is built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportInputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    pub date_range: DateRange,
    pub series_by_metric: BTreeMap<MetricType, Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adherence: Option<Vec<AdherenceSummary>>,
    /// Metrics that could not be aggregated, with the reason
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped: BTreeMap<MetricType, String>,
}

impl ReportInputs {
    pub fn new(date_range: DateRange) -> Self {
        Self {
            subject_id: None,
            date_range,
            series_by_metric: BTreeMap::new(),
            adherence: None,
            skipped: BTreeMap::new(),
        }
    }

    pub fn with_series(mut self, series: Series) -> Self {
        self.series_by_metric.insert(series.metric_type, series);
        self
    }

    pub fn with_adherence(mut self, adherence: Vec<AdherenceSummary>) -> Self {
        self.adherence = Some(adherence);
        self
    }
}

/// Direction of a sub-type trend relative to the normal band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Worsening,
    Stable,
}

/// First-half versus second-half comparison for one sub-type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAssessment {
    pub first_half_mean: f64,
    pub second_half_mean: f64,
    pub first_half_distance: f64,
    pub second_half_distance: f64,
    pub direction: TrendDirection,
}

/// Mean and trend of the readings taken under one sub-type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTypeSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    pub reading_count: usize,
    pub mean: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_mean: Option<f64>,
    pub mean_status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendAssessment>,
}

/// Data payload of a metric section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSectionData {
    pub metric_type: MetricType,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub averages: Option<MetricAverages>,
    pub status_counts: StatusCounts,
    pub tier_percentages: TierPercentages,
    pub sub_types: Vec<SubTypeSummary>,
}

/// Data payload of the overview section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewData {
    pub total_readings: usize,
    pub readings_per_metric: BTreeMap<MetricType, usize>,
    pub status_counts: StatusCounts,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skipped: BTreeMap<MetricType, String>,
}

/// Accumulates the summary while rules fire
#[derive(Default)]
struct SummaryBuilder {
    summary: ReportSummary,
}

impl SummaryBuilder {
    fn finding(&mut self, finding: String) {
        self.summary.key_findings.push(finding);
    }

    fn recommend(&mut self, recommendation: String) {
        if !self.summary.recommendations.contains(&recommendation) {
            self.summary.recommendations.push(recommendation);
        }
    }

    fn flag(
        &mut self,
        severity: FlagSeverity,
        metric: Option<MetricType>,
        message: String,
        detail: String,
    ) {
        self.summary.flags.push(Flag {
            severity,
            metric,
            message,
            detail,
        });
    }
}

/// Rule-based report builder
#[derive(Debug, Clone)]
pub struct ReportSynthesizer {
    classifier: MetricClassifier,
    thresholds: ReportThresholds,
}

impl Default for ReportSynthesizer {
    fn default() -> Self {
        Self::new(MetricClassifier::default(), ReportThresholds::default())
    }
}

impl ReportSynthesizer {
    pub fn new(classifier: MetricClassifier, thresholds: ReportThresholds) -> Self {
        Self {
            classifier,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ReportThresholds {
        &self.thresholds
    }

    /// Build the report document
    pub fn synthesize(&self, inputs: &ReportInputs) -> Result<ReportDocument, EngineError> {
        let mut summary = SummaryBuilder::default();
        let mut metrics = ReportMetrics::default();
        let mut metric_sections = Vec::with_capacity(inputs.series_by_metric.len());

        for (metric, series) in &inputs.series_by_metric {
            let data = self.build_metric_data(*metric, series)?;
            self.apply_metric_rules(&data, series, &mut summary);

            metrics.total_readings += data.status_counts.total();
            metrics.status_counts.insert(*metric, data.status_counts);
            if let Some(averages) = &data.averages {
                metrics.averages.insert(*metric, averages.clone());
            }

            metric_sections.push(ReportSection {
                title: metric.display_name().to_string(),
                narrative: metric_narrative(&data),
                data: serde_json::to_value(&data)?,
                chart_series: Some(series.clone()),
            });
        }

        for (metric, reason) in &inputs.skipped {
            summary.finding(format!("{} was skipped: {reason}", metric.display_name()));
        }

        let mut sections = vec![self.build_overview(inputs, &metrics)?];
        sections.extend(metric_sections);

        if let Some(adherence) = &inputs.adherence {
            let adherence_metrics = self.build_adherence(adherence, &mut summary);
            sections.push(ReportSection {
                title: "Medication adherence".to_string(),
                narrative: adherence_narrative(&adherence_metrics),
                data: serde_json::to_value(&adherence_metrics)?,
                chart_series: None,
            });
            metrics.adherence = Some(adherence_metrics);
        }

        debug!(
            metrics = inputs.series_by_metric.len(),
            readings = metrics.total_readings,
            flags = summary.summary.flags.len(),
            "Report synthesized"
        );

        Ok(ReportDocument {
            subject_id: inputs.subject_id.clone(),
            date_range: inputs.date_range,
            sections,
            summary: summary.summary,
            metrics,
        })
    }

    /// Build the report document and serialize it to JSON
    pub fn synthesize_to_json(&self, inputs: &ReportInputs) -> Result<String, EngineError> {
        let report = self.synthesize(inputs)?;
        serde_json::to_string_pretty(&report).map_err(EngineError::JsonError)
    }

    fn build_overview(
        &self,
        inputs: &ReportInputs,
        metrics: &ReportMetrics,
    ) -> Result<ReportSection, EngineError> {
        let mut totals = StatusCounts::default();
        for counts in metrics.status_counts.values() {
            totals.normal += counts.normal;
            totals.warning += counts.warning;
            totals.critical += counts.critical;
        }

        let readings_per_metric = metrics
            .status_counts
            .iter()
            .map(|(metric, counts)| (*metric, counts.total()))
            .collect();

        let range = inputs.date_range;
        let mut narrative = format!(
            "{} readings across {} metric types between {} and {}.",
            metrics.total_readings,
            inputs.series_by_metric.len(),
            range.start.format("%d.%m.%Y"),
            range.end.format("%d.%m.%Y"),
        );
        if totals.total() > 0 {
            narrative.push_str(&format!(
                " {} normal, {} warning, {} critical.",
                totals.normal, totals.warning, totals.critical
            ));
        }
        for (metric, reason) in &inputs.skipped {
            narrative.push_str(&format!(" {} skipped: {reason}.", metric.display_name()));
        }

        let data = OverviewData {
            total_readings: metrics.total_readings,
            readings_per_metric,
            status_counts: totals,
            skipped: inputs.skipped.clone(),
        };

        Ok(ReportSection {
            title: "Overview".to_string(),
            narrative,
            data: serde_json::to_value(&data)?,
            chart_series: None,
        })
    }

    fn build_metric_data(
        &self,
        metric: MetricType,
        series: &Series,
    ) -> Result<MetricSectionData, EngineError> {
        let mut status_counts = StatusCounts::default();
        for reading in &series.readings {
            status_counts.record(reading.status);
        }

        let primary: Vec<f64> = series.readings.iter().map(|r| r.primary).collect();
        let secondary: Vec<f64> = series.readings.iter().filter_map(|r| r.secondary).collect();
        let averages = Aggregate::from_values(&primary).map(|overall| MetricAverages {
            unit: metric.unit().to_string(),
            reading_count: overall.count,
            mean: overall.mean,
            min: overall.min,
            max: overall.max,
            secondary: Aggregate::from_values(&secondary),
        });

        let mut groups: BTreeMap<Option<&str>, Vec<&ClassifiedReading>> = BTreeMap::new();
        for reading in &series.readings {
            groups
                .entry(reading.sub_type.as_deref())
                .or_default()
                .push(reading);
        }

        let sub_types = groups
            .into_iter()
            .map(|(sub_type, readings)| self.summarize_sub_type(metric, sub_type, &readings))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MetricSectionData {
            metric_type: metric,
            unit: metric.unit().to_string(),
            averages,
            status_counts,
            tier_percentages: status_counts.percentages(),
            sub_types,
        })
    }

    fn summarize_sub_type(
        &self,
        metric: MetricType,
        sub_type: Option<&str>,
        readings: &[&ClassifiedReading],
    ) -> Result<SubTypeSummary, EngineError> {
        let (mean, secondary_mean) = channel_means(readings);
        let measurement = Measurement::from_parts(metric, mean, secondary_mean)?;
        let mean_status = self.classifier.classify(metric, sub_type, &measurement)?;

        let trend = if readings.len() >= self.thresholds.trend_min_readings {
            self.assess_trend(metric, sub_type, readings)
        } else {
            None
        };

        Ok(SubTypeSummary {
            sub_type: sub_type.map(str::to_string),
            reading_count: readings.len(),
            mean,
            secondary_mean,
            mean_status,
            trend,
        })
    }

    /// Compare the distance from the normal band of each chronological half.
    ///
    /// A half counts as improving only when the summed distance shrinks past
    /// the threshold, no channel drifts further out or crosses to the other
    /// side of its band, and the later half is classified no more severely.
    /// Crossing the band by more than the threshold counts as worsening.
    fn assess_trend(
        &self,
        metric: MetricType,
        sub_type: Option<&str>,
        readings: &[&ClassifiedReading],
    ) -> Option<TrendAssessment> {
        let threshold = self.thresholds.improvement_for(metric)?;
        let (first, second) = readings.split_at(readings.len() / 2);
        let first_means = channel_means(first);
        let second_means = channel_means(second);

        let first_deviations = self.band_deviations(metric, sub_type, first_means)?;
        let second_deviations = self.band_deviations(metric, sub_type, second_means)?;
        let first_distance: f64 = first_deviations.iter().map(|d| d.abs()).sum();
        let second_distance: f64 = second_deviations.iter().map(|d| d.abs()).sum();

        let pairs = || first_deviations.iter().zip(&second_deviations);
        let crossed = pairs().any(|(before, after)| before * after < 0.0);
        let channel_worsened = pairs().any(|(before, after)| after.abs() > before.abs());
        let status_worsened = self.mean_status(metric, sub_type, second_means)?
            > self.mean_status(metric, sub_type, first_means)?;

        let change = second_distance - first_distance;
        let improving = change < -threshold && !crossed && !channel_worsened && !status_worsened;
        let direction = if improving {
            TrendDirection::Improving
        } else if change > threshold || (crossed && second_distance > threshold) {
            TrendDirection::Worsening
        } else {
            TrendDirection::Stable
        };

        Some(TrendAssessment {
            first_half_mean: first_means.0,
            second_half_mean: second_means.0,
            first_half_distance: first_distance,
            second_half_distance: second_distance,
            direction,
        })
    }

    fn mean_status(
        &self,
        metric: MetricType,
        sub_type: Option<&str>,
        (primary, secondary): (f64, Option<f64>),
    ) -> Option<Status> {
        let measurement = Measurement::from_parts(metric, primary, secondary).ok()?;
        self.classifier.classify(metric, sub_type, &measurement).ok()
    }

    /// Signed offset of every channel mean from its normal band
    fn band_deviations(
        &self,
        metric: MetricType,
        sub_type: Option<&str>,
        (primary, secondary): (f64, Option<f64>),
    ) -> Option<Vec<f64>> {
        let measurement = Measurement::from_parts(metric, primary, secondary).ok()?;
        let references = self.classifier.references();
        let deviations: Vec<f64> = measurement
            .channels()
            .into_iter()
            .filter_map(|(channel, value)| {
                references
                    .lookup(metric, sub_type, channel)?
                    .deviation_from_normal(value)
            })
            .collect();

        if deviations.is_empty() {
            None
        } else {
            Some(deviations)
        }
    }

    /// Summed distance of every channel mean from its normal band
    fn band_distance(
        &self,
        metric: MetricType,
        sub_type: Option<&str>,
        means: (f64, Option<f64>),
    ) -> Option<f64> {
        self.band_deviations(metric, sub_type, means)
            .map(|deviations| deviations.iter().map(|d| d.abs()).sum())
    }

    fn apply_metric_rules(
        &self,
        data: &MetricSectionData,
        series: &Series,
        summary: &mut SummaryBuilder,
    ) {
        let metric = data.metric_type;
        let name = metric.display_name();
        let lower = name.to_lowercase();

        for group in &data.sub_types {
            self.apply_mean_rule(metric, group, summary);
            self.apply_trend_rule(metric, group, summary);
        }

        // Individual critical readings
        let critical: Vec<&ClassifiedReading> = series
            .readings
            .iter()
            .filter(|r| r.status == Status::Critical)
            .collect();
        if let Some(extreme) = self.most_extreme(metric, &critical) {
            let message = format!(
                "{} critical {lower} reading{}; most extreme {} on {}",
                critical.len(),
                if critical.len() == 1 { "" } else { "s" },
                format_value(metric, extreme.primary, extreme.secondary),
                extreme.taken_at.format("%d.%m.%Y %H:%M"),
            );
            summary.finding(message.clone());
            summary.recommend(format!(
                "Contact a physician about the critical {lower} readings."
            ));
            summary.flag(
                FlagSeverity::Critical,
                Some(metric),
                message,
                detail(&[
                    ("metric", metric.as_str().to_string()),
                    ("count", critical.len().to_string()),
                    ("value", format_number(extreme.primary, extreme.secondary)),
                    ("source_id", extreme.source_id.clone()),
                    ("taken_at", extreme.taken_at.to_rfc3339()),
                ]),
            );
        }

        let counts = data.status_counts;
        let total = counts.total();
        if total == 0 {
            return;
        }

        let warning_share = counts.warning as f64 / total as f64;
        if warning_share >= self.thresholds.warning_share {
            summary.finding(format!(
                "{:.0}% of {lower} readings were in the warning range",
                warning_share * 100.0
            ));
        }

        if counts.warning == 0 && counts.critical == 0 {
            summary.finding(format!(
                "All {total} {lower} reading{} were within the normal range",
                if total == 1 { "" } else { "s" }
            ));
        }
    }

    fn apply_mean_rule(
        &self,
        metric: MetricType,
        group: &SubTypeSummary,
        summary: &mut SummaryBuilder,
    ) {
        if group.mean_status == Status::Normal {
            return;
        }

        let name = metric.display_name();
        let lower = name.to_lowercase();
        let value = format_value(metric, group.mean, group.secondary_mean);
        let context = sub_type_suffix(group.sub_type.as_deref());
        let breach = self.breached_bound(metric, group);

        let (severity, message) = match group.mean_status {
            Status::Critical => (
                FlagSeverity::Critical,
                format!("{name}{context} average of {value} is in the critical range"),
            ),
            _ => {
                let side = match breach {
                    Some((_, bound, _)) if bound.ends_with("low") => "below",
                    _ => "above",
                };
                (
                    FlagSeverity::Warning,
                    format!("{name}{context} average of {value} is {side} the recommended range"),
                )
            }
        };

        let mut fields = vec![
            ("metric", metric.as_str().to_string()),
            (
                "sub_type",
                group.sub_type.clone().unwrap_or_else(|| DEFAULT_SUB_TYPE.to_string()),
            ),
            ("mean", format_number(group.mean, group.secondary_mean)),
            ("status", group.mean_status.as_str().to_string()),
        ];
        if let Some((channel, bound, threshold)) = breach {
            fields.push(("channel", channel.as_str().to_string()));
            fields.push(("bound", bound.to_string()));
            fields.push(("threshold", format!("{threshold:.1}")));
        }

        summary.finding(message.clone());
        match group.mean_status {
            Status::Critical => summary.recommend(format!(
                "Contact a physician promptly about the {lower} values."
            )),
            _ => summary.recommend(format!(
                "Review {lower} with a doctor at the next visit."
            )),
        }
        summary.flag(severity, Some(metric), message, detail(&fields));
    }

    fn apply_trend_rule(
        &self,
        metric: MetricType,
        group: &SubTypeSummary,
        summary: &mut SummaryBuilder,
    ) {
        let Some(trend) = &group.trend else { return };
        let name = metric.display_name();
        let context = sub_type_suffix(group.sub_type.as_deref());
        let unit = metric.unit();

        let fields = [
            ("metric", metric.as_str().to_string()),
            (
                "sub_type",
                group.sub_type.clone().unwrap_or_else(|| DEFAULT_SUB_TYPE.to_string()),
            ),
            ("first_half_mean", format!("{:.1}", trend.first_half_mean)),
            ("second_half_mean", format!("{:.1}", trend.second_half_mean)),
            ("first_half_distance", format!("{:.1}", trend.first_half_distance)),
            ("second_half_distance", format!("{:.1}", trend.second_half_distance)),
        ];

        match trend.direction {
            TrendDirection::Improving => {
                let message = format!(
                    "{name}{context} improved from an average of {:.1} to {:.1} {unit}",
                    trend.first_half_mean, trend.second_half_mean
                );
                summary.finding(message.clone());
                summary.flag(FlagSeverity::Improvement, Some(metric), message, detail(&fields));
            }
            TrendDirection::Worsening => {
                let message = format!(
                    "{name}{context} shows a worsening trend from an average of {:.1} to {:.1} {unit}",
                    trend.first_half_mean, trend.second_half_mean
                );
                summary.finding(message.clone());
                summary.recommend(format!(
                    "Monitor {} more closely over the coming weeks.",
                    name.to_lowercase()
                ));
                summary.flag(FlagSeverity::Warning, Some(metric), message, detail(&fields));
            }
            TrendDirection::Stable => {}
        }
    }

    /// Channel and bound responsible for a non-normal sub-type mean
    fn breached_bound(
        &self,
        metric: MetricType,
        group: &SubTypeSummary,
    ) -> Option<(Channel, &'static str, f64)> {
        let measurement = Measurement::from_parts(metric, group.mean, group.secondary_mean).ok()?;
        let references = self.classifier.references();
        measurement
            .channels()
            .into_iter()
            .filter_map(|(channel, value)| {
                let range = references.lookup(metric, group.sub_type.as_deref(), channel)?;
                let (bound, threshold) = range.breached_bound(value)?;
                Some((range.classify(value), channel, bound, threshold))
            })
            .max_by_key(|(status, ..)| *status)
            .map(|(_, channel, bound, threshold)| (channel, bound, threshold))
    }

    /// Critical reading furthest from its normal band, earliest on ties
    fn most_extreme<'a>(
        &self,
        metric: MetricType,
        critical: &[&'a ClassifiedReading],
    ) -> Option<&'a ClassifiedReading> {
        let mut extreme: Option<(&ClassifiedReading, f64)> = None;
        for reading in critical {
            let distance = self
                .band_distance(
                    metric,
                    reading.sub_type.as_deref(),
                    (reading.primary, reading.secondary),
                )
                .unwrap_or(0.0);
            match extreme {
                Some((_, best)) if distance <= best => {}
                _ => extreme = Some((*reading, distance)),
            }
        }
        extreme.map(|(reading, _)| reading)
    }

    fn build_adherence(
        &self,
        adherence: &[AdherenceSummary],
        summary: &mut SummaryBuilder,
    ) -> AdherenceMetrics {
        let regimen_floor = self.thresholds.regimen_adherence_floor;
        let overall_floor = self.thresholds.overall_adherence_floor;

        let regimens: Vec<RegimenAdherence> = adherence
            .iter()
            .filter(|regimen| regimen.active)
            .filter_map(|regimen| {
                regimen.rate().map(|rate| RegimenAdherence {
                    regimen_id: regimen.regimen_id.clone(),
                    medication_name: regimen.medication_name.clone(),
                    rate,
                    below_floor: rate < regimen_floor,
                })
            })
            .collect();

        for regimen in regimens.iter().filter(|r| r.below_floor) {
            let message = format!(
                "Adherence to {} is {:.0}%, below the {:.0}% target",
                regimen.medication_name,
                regimen.rate * 100.0,
                regimen_floor * 100.0
            );
            summary.finding(message.clone());
            summary.recommend(format!(
                "Discuss the {} schedule with the prescribing doctor.",
                regimen.medication_name
            ));
            summary.flag(
                FlagSeverity::Warning,
                None,
                message,
                detail(&[
                    ("regimen_id", regimen.regimen_id.clone()),
                    ("rate", format!("{:.2}", regimen.rate)),
                    ("floor", format!("{regimen_floor:.2}")),
                ]),
            );
        }

        let mean_rate = if regimens.is_empty() {
            summary.finding("No active medication regimens with scheduled doses".to_string());
            None
        } else {
            let mean = regimens.iter().map(|r| r.rate).sum::<f64>() / regimens.len() as f64;
            if mean < overall_floor {
                let message = format!(
                    "Overall medication adherence is {:.0}%, below the {:.0}% target",
                    mean * 100.0,
                    overall_floor * 100.0
                );
                summary.finding(message.clone());
                summary.recommend(
                    "Set up dose reminders to improve medication adherence.".to_string(),
                );
                summary.flag(
                    FlagSeverity::Warning,
                    None,
                    message,
                    detail(&[
                        ("mean_rate", format!("{mean:.2}")),
                        ("floor", format!("{overall_floor:.2}")),
                        ("regimens", regimens.len().to_string()),
                    ]),
                );
            } else {
                summary.finding(format!(
                    "Overall medication adherence is {:.0}%",
                    mean * 100.0
                ));
            }
            Some(mean)
        };

        AdherenceMetrics {
            mean_rate,
            regimens,
        }
    }
}

/// Mean of the primary channel and, when present, the secondary channel
fn channel_means(readings: &[&ClassifiedReading]) -> (f64, Option<f64>) {
    let primary: Vec<f64> = readings.iter().map(|r| r.primary).collect();
    let secondary: Vec<f64> = readings.iter().filter_map(|r| r.secondary).collect();
    let mean = |values: &[f64]| values.iter().sum::<f64>() / values.len() as f64;

    let secondary_mean = if secondary.is_empty() {
        None
    } else {
        Some(mean(&secondary))
    };
    (mean(&primary), secondary_mean)
}

fn sub_type_suffix(sub_type: Option<&str>) -> String {
    match sub_type {
        Some(name) if name != DEFAULT_SUB_TYPE => format!(" ({name})"),
        _ => String::new(),
    }
}

fn format_number(primary: f64, secondary: Option<f64>) -> String {
    match secondary {
        Some(secondary) => format!("{primary:.1}/{secondary:.1}"),
        None => format!("{primary:.1}"),
    }
}

fn format_value(metric: MetricType, primary: f64, secondary: Option<f64>) -> String {
    let number = format_number(primary, secondary);
    match metric.unit() {
        "" => number,
        "%" => format!("{number}%"),
        unit => format!("{number} {unit}"),
    }
}

fn detail(fields: &[(&str, String)]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(";")
}

fn metric_narrative(data: &MetricSectionData) -> String {
    let Some(averages) = &data.averages else {
        return "No readings recorded in this period.".to_string();
    };

    let metric = data.metric_type;
    let counts = data.status_counts;
    let pct = data.tier_percentages;
    let mut narrative = format!(
        "{} reading{} averaging {} (range {} to {}).",
        averages.reading_count,
        if averages.reading_count == 1 { "" } else { "s" },
        format_value(
            metric,
            averages.mean,
            averages.secondary.map(|s| s.mean)
        ),
        format_number(averages.min, averages.secondary.map(|s| s.min)),
        format_number(averages.max, averages.secondary.map(|s| s.max)),
    );
    narrative.push_str(&format!(
        " {} normal ({:.0}%), {} warning ({:.0}%), {} critical ({:.0}%).",
        counts.normal, pct.normal, counts.warning, pct.warning, counts.critical, pct.critical
    ));

    for group in &data.sub_types {
        if let Some(trend) = &group.trend {
            let label = group.sub_type.as_deref().unwrap_or(DEFAULT_SUB_TYPE);
            let word = match trend.direction {
                TrendDirection::Improving => "improving",
                TrendDirection::Worsening => "worsening",
                TrendDirection::Stable => "stable",
            };
            narrative.push_str(&format!(" Trend for {label}: {word}."));
        }
    }
    narrative
}

fn adherence_narrative(metrics: &AdherenceMetrics) -> String {
    match metrics.mean_rate {
        Some(mean) => format!(
            "Mean adherence {:.0}% across {} active regimen{}; {} below target.",
            mean * 100.0,
            metrics.regimens.len(),
            if metrics.regimens.len() == 1 { "" } else { "s" },
            metrics.regimens.iter().filter(|r| r.below_floor).count()
        ),
        None => "No active regimens with scheduled doses in this period.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SeriesAggregator;
    use crate::types::Reading;
    use chrono::{Days, NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const EPSILON: f64 = 1e-9;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn glucose_at(day: u32, value: f64, sub_type: Option<&str>) -> Reading {
        Reading {
            measurement: Measurement::Glucose { value },
            sub_type: sub_type.map(str::to_string),
            taken_at: Utc.with_ymd_and_hms(2024, 3, day, 8, 0, 0).unwrap(),
            source_id: format!("g-{day}"),
        }
    }

    fn series_of(
        readings: &[Reading],
        metric: MetricType,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Series {
        SeriesAggregator::new(MetricClassifier::default())
            .build_series(readings, metric, start, end)
            .unwrap()
    }

    fn inputs_for(readings: &[Reading], metrics: &[MetricType]) -> ReportInputs {
        let range = DateRange::new(date(2024, 3, 1), date(2024, 3, 31)).unwrap();
        metrics.iter().fold(ReportInputs::new(range), |inputs, metric| {
            inputs.with_series(series_of(readings, *metric, range.start, range.end))
        })
    }

    fn alternating_glucose() -> Vec<Reading> {
        (1..=10)
            .map(|day| glucose_at(day, if day % 2 == 1 { 95.0 } else { 145.0 }, None))
            .collect()
    }

    #[test]
    fn test_end_to_end_glucose_report() {
        let inputs = inputs_for(&alternating_glucose(), &[MetricType::Glucose]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let counts = report.metrics.status_counts[&MetricType::Glucose];
        assert_eq!(counts.normal + counts.warning + counts.critical, 10);
        assert_eq!(counts.normal, 5);
        assert_eq!(counts.warning, 5);
        assert_eq!(report.metrics.total_readings, 10);

        let averages = &report.metrics.averages[&MetricType::Glucose];
        assert!((averages.mean - 120.0).abs() < EPSILON);
        assert_eq!(averages.min, 95.0);
        assert_eq!(averages.max, 145.0);

        let warnings: Vec<&Flag> = report.flags_with(FlagSeverity::Warning).collect();
        assert!(warnings.iter().any(|f| {
            f.metric == Some(MetricType::Glucose) && f.message.contains("average of 120.0")
        }));
        assert_eq!(report.flags_with(FlagSeverity::Critical).count(), 0);

        let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Overview", "Blood glucose"]);
        assert!(report.sections[1].chart_series.is_some());
        assert!(report
            .summary
            .key_findings
            .iter()
            .any(|f| f.contains("50% of blood glucose readings")));
    }

    #[test]
    fn test_improvement_flag_for_falling_postprandial_glucose() {
        let readings: Vec<Reading> = [160.0, 160.0, 160.0, 120.0, 120.0, 120.0]
            .iter()
            .zip(1..)
            .map(|(value, day)| glucose_at(day, *value, Some("postprandial")))
            .collect();
        let inputs = inputs_for(&readings, &[MetricType::Glucose]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let improvements: Vec<&Flag> = report.flags_with(FlagSeverity::Improvement).collect();
        assert_eq!(improvements.len(), 1);
        assert_eq!(improvements[0].metric, Some(MetricType::Glucose));
        assert!(improvements[0].detail.contains("first_half_mean=160.0"));
        assert!(improvements[0].detail.contains("second_half_mean=120.0"));
    }

    #[test]
    fn test_worsening_trend_is_warning() {
        let readings: Vec<Reading> = [90.0, 92.0, 91.0, 125.0, 130.0, 128.0]
            .iter()
            .zip(1..)
            .map(|(value, day)| glucose_at(day, *value, None))
            .collect();
        let inputs = inputs_for(&readings, &[MetricType::Glucose]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        assert!(report
            .flags_with(FlagSeverity::Warning)
            .any(|f| f.message.contains("worsening trend")));
        assert_eq!(report.flags_with(FlagSeverity::Improvement).count(), 0);
    }

    #[test]
    fn test_crossing_below_the_band_is_not_improvement() {
        // 160 sits 60 above the fasting band, 40 sits 30 below it
        let readings: Vec<Reading> = [160.0, 160.0, 160.0, 40.0, 40.0, 40.0]
            .iter()
            .zip(1..)
            .map(|(value, day)| glucose_at(day, *value, None))
            .collect();
        let inputs = inputs_for(&readings, &[MetricType::Glucose]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        assert_eq!(report.flags_with(FlagSeverity::Improvement).count(), 0);
        assert!(report
            .flags_with(FlagSeverity::Warning)
            .any(|f| f.message.contains("worsening trend from an average of 160.0 to 40.0")));
    }

    #[test]
    fn test_blood_pressure_needs_every_channel_to_improve() {
        // systolic falls back into range while diastolic rises out of it
        let readings: Vec<Reading> = [(150.0, 75.0), (125.0, 88.0)]
            .iter()
            .flat_map(|pair| [*pair; 3])
            .zip(1..)
            .map(|((systolic, diastolic), day)| Reading {
                measurement: Measurement::BloodPressure {
                    systolic,
                    diastolic,
                },
                sub_type: None,
                taken_at: Utc.with_ymd_and_hms(2024, 3, day, 7, 30, 0).unwrap(),
                source_id: format!("bp-{day}"),
            })
            .collect();
        let inputs = inputs_for(&readings, &[MetricType::BloodPressure]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        assert_eq!(report.flags_with(FlagSeverity::Improvement).count(), 0);
        let data: MetricSectionData =
            serde_json::from_value(report.sections[1].data.clone()).unwrap();
        let trend = data.sub_types[0].trend.as_ref().unwrap();
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert!((trend.first_half_distance - 20.0).abs() < EPSILON);
        assert!((trend.second_half_distance - 8.0).abs() < EPSILON);
    }

    #[test]
    fn test_short_series_has_no_trend() {
        let readings: Vec<Reading> = [160.0, 120.0, 120.0]
            .iter()
            .zip(1..)
            .map(|(value, day)| glucose_at(day, *value, Some("postprandial")))
            .collect();
        let synthesizer = ReportSynthesizer::default();
        assert!(readings.len() < synthesizer.thresholds().trend_min_readings);

        let inputs = inputs_for(&readings, &[MetricType::Glucose]);
        let report = synthesizer.synthesize(&inputs).unwrap();

        assert_eq!(report.flags_with(FlagSeverity::Improvement).count(), 0);
    }

    #[test]
    fn test_sub_types_are_evaluated_separately() {
        // 120 is a warning when fasting but normal after a meal
        let readings = vec![
            glucose_at(1, 85.0, Some("fasting")),
            glucose_at(2, 88.0, Some("fasting")),
            glucose_at(3, 120.0, Some("postprandial")),
            glucose_at(4, 125.0, Some("postprandial")),
        ];
        let inputs = inputs_for(&readings, &[MetricType::Glucose]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        assert_eq!(report.summary.flags.len(), 0);
        assert!(report
            .summary
            .key_findings
            .iter()
            .any(|f| f == "All 4 blood glucose readings were within the normal range"));
    }

    #[test]
    fn test_critical_readings_flag_most_extreme() {
        let readings = vec![
            glucose_at(1, 95.0, None),
            glucose_at(2, 210.0, None),
            glucose_at(3, 250.0, None),
            glucose_at(4, 90.0, None),
        ];
        let inputs = inputs_for(&readings, &[MetricType::Glucose]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let critical: Vec<&Flag> = report
            .flags_with(FlagSeverity::Critical)
            .filter(|f| f.detail.contains("count="))
            .collect();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].message.starts_with("2 critical blood glucose readings"));
        assert!(critical[0].detail.contains("value=250.0"));
        assert!(critical[0].detail.contains("source_id=g-3"));
    }

    #[test]
    fn test_blood_pressure_mean_flag_names_channel() {
        let readings: Vec<Reading> = (1..=3)
            .map(|day| Reading {
                measurement: Measurement::BloodPressure {
                    systolic: 122.0,
                    diastolic: 88.0,
                },
                sub_type: None,
                taken_at: Utc.with_ymd_and_hms(2024, 3, day, 7, 30, 0).unwrap(),
                source_id: format!("bp-{day}"),
            })
            .collect();
        let inputs = inputs_for(&readings, &[MetricType::BloodPressure]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let flag = report
            .flags_with(FlagSeverity::Warning)
            .next()
            .unwrap();
        assert_eq!(flag.metric, Some(MetricType::BloodPressure));
        assert!(flag.message.contains("122.0/88.0 mmHg"));
        assert!(flag.detail.contains("channel=diastolic"));
        assert!(flag.detail.contains("bound=warning_high"));
    }

    #[test]
    fn test_adherence_flags() {
        let adherence = vec![
            AdherenceSummary {
                regimen_id: "r1".to_string(),
                medication_name: "Metformin".to_string(),
                scheduled_doses: 60,
                taken_doses: 36,
                active: true,
            },
            AdherenceSummary {
                regimen_id: "r2".to_string(),
                medication_name: "Lisinopril".to_string(),
                scheduled_doses: 30,
                taken_doses: 27,
                active: true,
            },
            AdherenceSummary {
                regimen_id: "r3".to_string(),
                medication_name: "Old prescription".to_string(),
                scheduled_doses: 30,
                taken_doses: 0,
                active: false,
            },
            AdherenceSummary {
                regimen_id: "r4".to_string(),
                medication_name: "As needed".to_string(),
                scheduled_doses: 0,
                taken_doses: 2,
                active: true,
            },
        ];
        let range = DateRange::new(date(2024, 3, 1), date(2024, 3, 31)).unwrap();
        let inputs = ReportInputs::new(range).with_adherence(adherence);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let metrics = report.metrics.adherence.as_ref().unwrap();
        assert_eq!(metrics.regimens.len(), 2);
        // (0.6 + 0.9) / 2
        assert!((metrics.mean_rate.unwrap() - 0.75).abs() < EPSILON);
        assert!(metrics.regimens[0].below_floor);
        assert!(!metrics.regimens[1].below_floor);

        let warnings: Vec<&Flag> = report.flags_with(FlagSeverity::Warning).collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].message.contains("Metformin"));
        assert!(warnings[1].message.starts_with("Overall medication adherence is 75%"));
        assert!(warnings.iter().all(|f| f.metric.is_none()));

        let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Overview", "Medication adherence"]);
    }

    #[test]
    fn test_empty_inputs_produce_overview_only() {
        let range = DateRange::new(date(2024, 3, 1), date(2024, 3, 7)).unwrap();
        let report = ReportSynthesizer::default()
            .synthesize(&ReportInputs::new(range))
            .unwrap();

        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sections[0].title, "Overview");
        assert!(report.summary.flags.is_empty());
        assert!(report.summary.key_findings.is_empty());
        assert_eq!(report.metrics.total_readings, 0);
    }

    #[test]
    fn test_metric_without_readings_keeps_section() {
        let inputs = inputs_for(&alternating_glucose(), &[MetricType::Glucose, MetricType::Weight]);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let weight = report
            .sections
            .iter()
            .find(|s| s.title == "Weight")
            .unwrap();
        assert_eq!(weight.narrative, "No readings recorded in this period.");
        assert!(!report.metrics.averages.contains_key(&MetricType::Weight));
        assert_eq!(report.metrics.status_counts[&MetricType::Weight].total(), 0);
    }

    #[test]
    fn test_skipped_metrics_are_reported() {
        let mut inputs = inputs_for(&alternating_glucose(), &[MetricType::Glucose]);
        inputs
            .skipped
            .insert(MetricType::HeartRate, "non-finite value".to_string());
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        assert!(report.sections[0].narrative.contains("Heart rate skipped"));
        assert!(report
            .summary
            .key_findings
            .iter()
            .any(|f| f == "Heart rate was skipped: non-finite value"));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let mut readings = alternating_glucose();
        readings.push(glucose_at(12, 205.0, Some("postprandial")));
        let inputs = inputs_for(&readings, &[MetricType::Glucose, MetricType::Weight]);
        let synthesizer = ReportSynthesizer::default();

        let first = synthesizer.synthesize(&inputs).unwrap();
        let second = synthesizer.synthesize(&inputs).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            synthesizer.synthesize_to_json(&inputs).unwrap(),
            synthesizer.synthesize_to_json(&inputs).unwrap()
        );
    }

    #[test]
    fn test_monthly_range_report() {
        let start = date(2024, 1, 1);
        let readings: Vec<Reading> = (0..180u64)
            .step_by(3)
            .map(|offset| {
                let day = start.checked_add_days(Days::new(offset)).unwrap();
                Reading {
                    measurement: Measurement::Weight { value: 80.0 - offset as f64 / 60.0 },
                    sub_type: None,
                    taken_at: day.and_hms_opt(7, 0, 0).unwrap().and_utc(),
                    source_id: format!("w-{offset}"),
                }
            })
            .collect();
        let end = date(2024, 6, 30);
        let range = DateRange::new(start, end).unwrap();
        let series = series_of(&readings, MetricType::Weight, start, end);
        let inputs = ReportInputs::new(range).with_series(series);
        let report = ReportSynthesizer::default().synthesize(&inputs).unwrap();

        let series = report.sections[1].chart_series.as_ref().unwrap();
        assert_eq!(series.buckets.len(), 6);
        assert_eq!(report.metrics.total_readings, 60);
        // weight has no range, so no trend is evaluated
        assert_eq!(report.flags_with(FlagSeverity::Improvement).count(), 0);
    }
}
