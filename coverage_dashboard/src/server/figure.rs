//! Plotly figure JSON for the chart datasets.
//!
//! The browser hands `{data, layout}` straight to `Plotly.react`, so field
//! names follow plotly.js attribute names.

use coverage_core::charts::{ChartDataset, ChartKind, Series, Visibility};
use serde::Serialize;

/// Y axis headroom above 100% so the top line stays readable.
pub const Y_AXIS_RANGE: [f64; 2] = [0.0, 110.0];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Figure {
    pub data: Vec<Trace>,
    pub layout: Layout,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Trace {
    #[serde(rename = "type")]
    pub trace_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    pub name: String,
    pub x: Vec<String>,
    pub y: Vec<Option<f64>>,
    pub visible: TraceVisibility,
    pub hoverlabel: HoverLabel,
}

/// Plotly accepts `true` or the string `"legendonly"`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum TraceVisibility {
    Shown(bool),
    Legend(&'static str),
}

impl From<Visibility> for TraceVisibility {
    fn from(value: Visibility) -> Self {
        match value {
            Visibility::Visible => TraceVisibility::Shown(true),
            Visibility::LegendOnly => TraceVisibility::Legend("legendonly"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HoverLabel {
    /// -1 shows the full series name instead of truncating it.
    pub namelength: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Layout {
    pub title: Title,
    pub hovermode: &'static str,
    pub yaxis: Axis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barmode: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Title {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Axis {
    pub range: [f64; 2],
}

impl Figure {
    pub fn from_dataset(dataset: &ChartDataset) -> Self {
        Self {
            data: dataset
                .series
                .iter()
                .map(|series| Trace::new(series, dataset.kind))
                .collect(),
            layout: Layout {
                title: Title {
                    text: dataset.title.clone(),
                },
                hovermode: "closest",
                yaxis: Axis {
                    range: Y_AXIS_RANGE,
                },
                barmode: match dataset.kind {
                    ChartKind::Bar => Some("group"),
                    ChartKind::Line => None,
                },
            },
        }
    }
}

impl Trace {
    fn new(series: &Series, kind: ChartKind) -> Self {
        let (trace_type, mode) = match kind {
            ChartKind::Line => ("scatter", Some("lines+markers")),
            ChartKind::Bar => ("bar", None),
        };
        Self {
            trace_type,
            mode,
            name: series.name.clone(),
            x: series.x.clone(),
            y: series.y.clone(),
            visible: series.visibility.into(),
            hoverlabel: HoverLabel { namelength: -1 },
        }
    }
}
