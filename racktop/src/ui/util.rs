//! Small UI helpers: sizes, truncation, usage colors.

use ratatui::layout::Rect;
use ratatui::style::Color;

/// Gigabytes with one decimal, switching to TB past 1024 GB.
pub fn human_gb(gb: f64) -> String {
    if gb >= 1024.0 {
        format!("{:.2}TB", gb / 1024.0)
    } else {
        format!("{gb:.1}GB")
    }
}

pub fn human_count(n: u64) -> String {
    match n {
        n if n >= 1_000_000 => format!("{:.1}M", n as f64 / 1_000_000.0),
        n if n >= 1_000 => format!("{:.1}K", n as f64 / 1_000.0),
        n => n.to_string(),
    }
}

pub fn truncate_middle(s: &str, max: usize) -> String {
    let len = s.chars().count();
    if len <= max { return s.to_string(); }
    if max <= 3 { return "...".into(); }
    let keep = max - 3;
    let left = keep / 2;
    let right = keep - left;
    let head: String = s.chars().take(left).collect();
    let tail: String = s.chars().skip(len - right).collect();
    format!("{head}...{tail}")
}

/// Whole percent for gauges; out-of-range values are clamped for display only.
pub fn gauge_pct(v: f64) -> u16 {
    if v.is_nan() { return 0; }
    v.clamp(0.0, 100.0).round() as u16
}

pub fn usage_color(pct: f64) -> Color {
    if pct < 70.0 { Color::Green } else if pct < 90.0 { Color::Yellow } else { Color::Red }
}

pub fn uptime(secs: u64) -> String {
    let (d, h, m) = (secs / 86_400, secs % 86_400 / 3_600, secs % 3_600 / 60);
    if d > 0 { format!("{d}d {h}h") } else if h > 0 { format!("{h}h {m}m") } else { format!("{m}m") }
}

pub fn inner(area: Rect) -> Rect {
    Rect {
        x: area.x + 1,
        y: area.y + 1,
        width: area.width.saturating_sub(2),
        height: area.height.saturating_sub(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!(human_gb(12.34), "12.3GB");
        assert_eq!(human_gb(2048.0), "2.00TB");
        assert_eq!(human_count(1_500_000), "1.5M");
        assert_eq!(truncate_middle("/mnt/models/checkpoints", 11), "/mnt...ints");
        assert_eq!(gauge_pct(130.0), 100);
        assert_eq!(gauge_pct(-4.0), 0);
        assert_eq!(uptime(90_061), "1d 1h");
        assert_eq!(uptime(3_720), "1h 2m");
    }
}
