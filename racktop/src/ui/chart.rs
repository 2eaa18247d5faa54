//! Rolling usage charts fed from the shared time series.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    symbols::Marker,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
};

use crate::history::TimeSeriesBuffer;
use crate::ui::theme::{AI_CPU, AI_GPU, AI_MEMORY, APP_CPU, MUTED, STORAGE_CPU};

pub const CPU_SERIES: [(&str, &str, Color); 3] = [
    ("ai_cpu", "AI", AI_CPU),
    ("app_cpu", "App", APP_CPU),
    ("storage_cpu", "Storage", STORAGE_CPU),
];

pub const AI_SERIES: [(&str, &str, Color); 2] = [
    ("ai_memory", "Memory", AI_MEMORY),
    ("ai_gpu", "GPU", AI_GPU),
];

/// `(index, value)` pairs for one key, values clamped to the 0..=100 axis.
pub fn points(buf: &TimeSeriesBuffer, key: &str) -> Vec<(f64, f64)> {
    buf.series(key)
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i as f64, v.clamp(0.0, 100.0)))
        .collect()
}

pub fn draw_usage_chart(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    title: &str,
    buf: &TimeSeriesBuffer,
    series: &[(&str, &str, Color)],
) {
    let data: Vec<Vec<(f64, f64)>> = series.iter().map(|(key, _, _)| points(buf, key)).collect();
    let latest = buf.last();
    let datasets: Vec<Dataset<'_>> = series
        .iter()
        .zip(&data)
        .map(|((key, label, color), pts)| {
            let now = latest.map(|p| p.get(key)).unwrap_or(0.0);
            Dataset::default()
                .name(format!("{label} {now:.1}%"))
                .marker(Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(*color))
                .data(pts)
        })
        .collect();

    let first = buf.iter().next().map(|p| p.timestamp.clone()).unwrap_or_default();
    let last = latest.map(|p| p.timestamp.clone()).unwrap_or_default();
    let x_max = (buf.capacity().saturating_sub(1)).max(1) as f64;

    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .x_axis(
            Axis::default()
                .style(Style::default().fg(MUTED))
                .bounds([0.0, x_max])
                .labels(vec![first, last]),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(MUTED))
                .bounds([0.0, 100.0])
                .labels(vec!["0".to_string(), "50".to_string(), "100".to_string()]),
        );
    f.render_widget(chart, area);
}
