//! OSM data quality report for the area of a sketch map.
//!
//! Each [`Analysis`] variant is evaluated by a plain function looked up in
//! [`ANALYSIS_TABLE`]; the results are rendered into a one page PDF.

pub mod oqt;

use chrono::NaiveDate;
use serde::Serialize;
use sketchmap_core::paper_format::A4;
use sketchmap_core::types::{Bbox, Orientation};

use crate::pdf::{write_pdf, FilledRect, PdfPage, TextItem};
use oqt::{Indicator, ReportResponse};

/// Traffic light level of one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Green,
    Yellow,
    Red,
    Undefined,
}

impl Level {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "green" => Level::Green,
            "yellow" => Level::Yellow,
            "red" => Level::Red,
            _ => Level::Undefined,
        }
    }

    fn rgb(self) -> [f64; 3] {
        match self {
            Level::Green => [0.18, 0.65, 0.25],
            Level::Yellow => [0.95, 0.77, 0.06],
            Level::Red => [0.84, 0.15, 0.16],
            Level::Undefined => [0.6, 0.6, 0.6],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analysis {
    Saturation,
    Currentness,
    LandmarkDensity,
    Sources,
    CurrentnessByKey { key: String },
}

impl Analysis {
    /// Table key of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Analysis::Saturation => "saturation",
            Analysis::Currentness => "currentness",
            Analysis::LandmarkDensity => "landmark-density",
            Analysis::Sources => "sources",
            Analysis::CurrentnessByKey { .. } => "currentness-by-key",
        }
    }

    pub fn title(&self) -> String {
        match self {
            Analysis::Saturation => "Mapping Saturation".into(),
            Analysis::Currentness => "Currentness".into(),
            Analysis::LandmarkDensity => "Landmark Density".into(),
            Analysis::Sources => "Sources".into(),
            Analysis::CurrentnessByKey { key } => format!("Currentness of '{key}' features"),
        }
    }
}

/// Analyses of the sketch map fitness report, in print order.
pub fn default_analyses() -> Vec<Analysis> {
    vec![
        Analysis::Saturation,
        Analysis::Currentness,
        Analysis::LandmarkDensity,
        Analysis::Sources,
        Analysis::CurrentnessByKey {
            key: "highway".into(),
        },
        Analysis::CurrentnessByKey {
            key: "amenity".into(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub title: String,
    pub level: Level,
    pub message: String,
}

type Evaluate = fn(&Analysis, &[Indicator]) -> AnalysisResult;

/// Evaluation function per analysis name.
pub const ANALYSIS_TABLE: [(&str, Evaluate); 5] = [
    ("saturation", saturation),
    ("currentness", currentness),
    ("landmark-density", landmark_density),
    ("sources", sources),
    ("currentness-by-key", currentness_by_key),
];

const NO_RESULT: &str = "No result available for this area.";

/// Worst level over matching indicators, with their descriptions joined.
fn summarize<'a>(analysis: &Analysis, matching: impl Iterator<Item = &'a Indicator>) -> AnalysisResult {
    let mut level: Option<Level> = None;
    let mut messages = Vec::new();
    for indicator in matching {
        let current = Level::from_label(&indicator.result.label);
        level = Some(match (level, current) {
            (None, l) => l,
            (Some(Level::Red), _) | (_, Level::Red) => Level::Red,
            (Some(Level::Yellow), _) | (_, Level::Yellow) => Level::Yellow,
            (Some(Level::Green), _) | (_, Level::Green) => Level::Green,
            _ => Level::Undefined,
        });
        let description = indicator.result.description.trim();
        if !description.is_empty() {
            messages.push(description.to_string());
        }
    }
    AnalysisResult {
        title: analysis.title(),
        level: level.unwrap_or(Level::Undefined),
        message: if messages.is_empty() {
            NO_RESULT.to_string()
        } else {
            messages.join(" ")
        },
    }
}

fn by_name<'a>(indicators: &'a [Indicator], name: &'a str) -> impl Iterator<Item = &'a Indicator> {
    indicators.iter().filter(move |i| i.metadata.name == name)
}

fn saturation(analysis: &Analysis, indicators: &[Indicator]) -> AnalysisResult {
    summarize(analysis, by_name(indicators, "mapping-saturation"))
}

fn currentness(analysis: &Analysis, indicators: &[Indicator]) -> AnalysisResult {
    summarize(analysis, by_name(indicators, "currentness"))
}

fn landmark_density(analysis: &Analysis, indicators: &[Indicator]) -> AnalysisResult {
    summarize(
        analysis,
        by_name(indicators, "density").filter(|i| i.topic.key.contains("poi") || i.topic.key.contains("landmark")),
    )
}

fn sources(analysis: &Analysis, indicators: &[Indicator]) -> AnalysisResult {
    summarize(analysis, by_name(indicators, "attribute-completeness"))
}

fn currentness_by_key(analysis: &Analysis, indicators: &[Indicator]) -> AnalysisResult {
    match analysis {
        Analysis::CurrentnessByKey { key } => summarize(
            analysis,
            by_name(indicators, "currentness").filter(|i| i.topic.key.split('-').any(|part| part == key)),
        ),
        other => summarize(other, std::iter::empty()),
    }
}

/// Evaluate one analysis against the report indicators.
pub fn evaluate(analysis: &Analysis, indicators: &[Indicator]) -> AnalysisResult {
    ANALYSIS_TABLE
        .iter()
        .find(|(name, _)| *name == analysis.name())
        .map(|(_, run)| run(analysis, indicators))
        .unwrap_or_else(|| summarize(analysis, std::iter::empty()))
}

/// Evaluate every analysis of the report.
pub fn evaluate_all(analyses: &[Analysis], report: &ReportResponse) -> Vec<AnalysisResult> {
    analyses
        .iter()
        .map(|a| evaluate(a, &report.properties.indicators))
        .collect()
}

/// Render the results into an A4 portrait PDF.
pub fn render_report_pdf(
    overall: &AnalysisResult,
    results: &[AnalysisResult],
    bbox_wgs84: &Bbox,
    created: NaiveDate,
) -> Vec<u8> {
    let (width_pt, height_pt) = A4.page_pt(Orientation::Portrait);
    let margin = 56.0;
    let mut texts = vec![
        TextItem {
            x: margin,
            y: height_pt - margin,
            size: 18.0,
            text: "OSM Data Quality Report".into(),
        },
        TextItem {
            x: margin,
            y: height_pt - margin - 24.0,
            size: 9.0,
            text: format!(
                "Created: {}\nArea: {:.5}, {:.5}, {:.5}, {:.5}",
                created.format("%Y-%m-%d"),
                bbox_wgs84.lon_min,
                bbox_wgs84.lat_min,
                bbox_wgs84.lon_max,
                bbox_wgs84.lat_max
            ),
        },
    ];
    let mut rects = Vec::new();
    let mut y = height_pt - margin - 80.0;
    for result in std::iter::once(overall).chain(results) {
        rects.push(FilledRect {
            x: margin,
            y: y - 2.0,
            width: 10.0,
            height: 10.0,
            rgb: result.level.rgb(),
        });
        texts.push(TextItem {
            x: margin + 18.0,
            y,
            size: 11.0,
            text: result.title.clone(),
        });
        texts.push(TextItem {
            x: margin + 18.0,
            y: y - 14.0,
            size: 8.0,
            text: wrap(&result.message, 95),
        });
        let lines = texts.last().map(|t| t.text.lines().count()).unwrap_or(1) as f64;
        y -= 30.0 + lines * 9.6;
    }
    write_pdf(&PdfPage {
        width_pt,
        height_pt,
        image: None,
        rects,
        texts,
    })
}

/// Greedy word wrap at `width` characters.
fn wrap(text: &str, width: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut line));
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines.join("\n")
}

/// Overall report level as an analysis result.
pub fn overall_result(report: &ReportResponse) -> AnalysisResult {
    let result = &report.properties.report.result;
    AnalysisResult {
        title: "Sketch Map Fitness".into(),
        level: Level::from_label(&result.label),
        message: if result.description.trim().is_empty() {
            NO_RESULT.into()
        } else {
            result.description.trim().into()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oqt::{IndicatorMetadata, IndicatorTopic, ReportResult};

    fn indicator(name: &str, topic: &str, label: &str, description: &str) -> Indicator {
        Indicator {
            metadata: IndicatorMetadata { name: name.into() },
            topic: IndicatorTopic { key: topic.into() },
            result: ReportResult {
                label: label.into(),
                description: description.into(),
            },
        }
    }

    fn indicators() -> Vec<Indicator> {
        vec![
            indicator("mapping-saturation", "building-count", "green", "Saturated."),
            indicator("mapping-saturation", "major-roads-length", "yellow", "Almost saturated."),
            indicator("currentness", "amenities", "green", "Amenities are fresh."),
            indicator("currentness", "major-roads-highway", "red", "Roads are outdated."),
        ]
    }

    #[test]
    fn every_analysis_has_a_table_entry() {
        for analysis in default_analyses() {
            assert!(ANALYSIS_TABLE.iter().any(|(name, _)| *name == analysis.name()));
        }
    }

    #[test]
    fn worst_level_wins() {
        let result = evaluate(&Analysis::Saturation, &indicators());
        assert_eq!(result.level, Level::Yellow);
        assert_eq!(result.message, "Saturated. Almost saturated.");
    }

    #[test]
    fn currentness_by_key_filters_topics() {
        let result = evaluate(
            &Analysis::CurrentnessByKey { key: "highway".into() },
            &indicators(),
        );
        assert_eq!(result.level, Level::Red);
        assert_eq!(result.title, "Currentness of 'highway' features");
    }

    #[test]
    fn missing_indicators_are_undefined() {
        let result = evaluate(&Analysis::LandmarkDensity, &indicators());
        assert_eq!(result.level, Level::Undefined);
        assert_eq!(result.message, NO_RESULT);
    }

    #[test]
    fn wrap_breaks_long_messages() {
        assert_eq!(wrap("aa bb cc", 5), "aa bb\ncc");
        assert_eq!(wrap("", 5), "");
    }

    #[test]
    fn report_pdf_lists_analyses() {
        let results: Vec<_> = default_analyses().iter().map(|a| evaluate(a, &indicators())).collect();
        let overall = AnalysisResult {
            title: "Sketch Map Fitness".into(),
            level: Level::Green,
            message: "Fit.".into(),
        };
        let bbox = Bbox::new(8.66, 49.39, 8.71, 49.42).unwrap();
        let pdf = render_report_pdf(&overall, &results, &bbox, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        let text = String::from_utf8_lossy(&pdf);
        assert!(text.starts_with("%PDF-1.4"));
        assert!(text.contains("(Mapping Saturation) Tj"));
        assert!(text.contains("(Currentness of 'amenity' features) Tj"));
    }
}
