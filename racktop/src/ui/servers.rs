//! Overview card and one card per server with usage gauges.

use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
};

use crate::types::{OverviewSnapshot, ServerIdentity, ServerSnapshot};
use crate::ui::theme::{LIVE, MUTED, OFFLINE, PENDING};
use crate::ui::util::{gauge_pct, human_count, human_gb, inner, usage_color};

pub fn draw_overview(f: &mut ratatui::Frame<'_>, area: Rect, o: &OverviewSnapshot) {
    let row = |label: &str, value: String, color: Color| {
        Line::from(vec![
            Span::styled(format!("{label:<14}"), Style::default().fg(MUTED)),
            Span::styled(value, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        ])
    };
    let mut lines = vec![
        row("Total servers", o.total_servers.to_string(), Color::Reset),
        row("Online", o.online_servers.to_string(), LIVE),
        row("Alerts", o.alerts_count.to_string(), PENDING),
    ];
    if let Some(ts) = &o.last_updated {
        lines.push(Line::from(Span::styled(ts.clone(), Style::default().fg(MUTED))));
    }
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("System Overview"));
    f.render_widget(p, area);
}

struct GaugeRow {
    label: &'static str,
    text: String,
    pct: f64,
}

fn gauge_rows(s: &ServerSnapshot) -> Vec<GaugeRow> {
    let mut rows = Vec::new();
    if let Some(cpu) = s.cpu() {
        rows.push(GaugeRow {
            label: "CPU",
            text: format!("{:.1}% of {} cores", cpu.usage_percent, cpu.cores),
            pct: cpu.usage_percent,
        });
    }
    if let Some(mem) = s.memory() {
        rows.push(GaugeRow {
            label: "Memory",
            text: format!("{} / {}", human_gb(mem.used_gb), human_gb(mem.total_gb)),
            pct: mem.usage_percent,
        });
    }
    if let Some(gpu) = s.gpu() {
        rows.push(GaugeRow {
            label: "GPU",
            text: format!("{:.1}% {:.0}°C", gpu.usage_percent, gpu.temperature),
            pct: gpu.usage_percent,
        });
        rows.push(GaugeRow {
            label: "VRAM",
            text: format!("{:.0}MB", gpu.memory_used_mb),
            pct: gpu.memory_usage_percent,
        });
    }
    if let Some(disk) = s.disks().into_iter().next() {
        rows.push(GaugeRow {
            label: "Storage",
            text: format!("{} / {}", human_gb(disk.used_gb), human_gb(disk.total_gb)),
            pct: disk.usage_percent,
        });
    }
    rows
}

fn extra_line(id: ServerIdentity, s: &ServerSnapshot) -> Option<String> {
    match id {
        ServerIdentity::Ai => None,
        ServerIdentity::App => {
            let vms = s.vms();
            let running = vms.iter().filter(|vm| vm.is_running()).count();
            Some(format!("VMs running: {running}/{}", vms.len()))
        }
        ServerIdentity::Storage => {
            let points = s
                .vector_db()
                .map(|q| format!("Qdrant: {} points | ", human_count(q.total_points)))
                .unwrap_or_default();
            Some(format!("{points}Filesystems: {}", s.filesystems().len()))
        }
    }
}

pub fn draw_server(f: &mut ratatui::Frame<'_>, area: Rect, id: ServerIdentity, s: Option<&ServerSnapshot>) {
    let health = s.and_then(ServerSnapshot::health);
    let status = health
        .as_ref()
        .map(|h| h.status.clone())
        .filter(|st| !st.is_empty())
        .unwrap_or_else(|| "unknown".into());
    let status_color = match status.to_ascii_lowercase().as_str() {
        "online" | "running" => LIVE,
        "offline" | "stopped" => OFFLINE,
        _ => PENDING,
    };
    let mut title = vec![
        Span::raw(format!("{} ", id.title())),
        Span::styled(format!("[{status}]"), Style::default().fg(status_color)),
    ];
    if let Some(ms) = health.and_then(|h| h.response_time_ms) {
        title.push(Span::styled(format!(" {ms:.0}ms"), Style::default().fg(MUTED)));
    }
    f.render_widget(Block::default().borders(Borders::ALL).title(Line::from(title)), area);

    let Some(s) = s else { return };
    let body = inner(area);
    if body.height == 0 {
        return;
    }

    let rows = gauge_rows(s);
    let extra = extra_line(id, s);
    let n = (rows.len() + usize::from(extra.is_some())).min(body.height as usize);
    let slots = Layout::default()
        .direction(Direction::Vertical)
        .constraints((0..n).map(|_| Constraint::Length(1)).collect::<Vec<_>>())
        .split(body);

    for (slot, row) in slots.iter().zip(&rows) {
        let cols = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(8), Constraint::Min(4)])
            .split(*slot);
        f.render_widget(Paragraph::new(row.label).style(Style::default().fg(MUTED)), cols[0]);
        let g = Gauge::default()
            .percent(gauge_pct(row.pct))
            .label(row.text.clone())
            .gauge_style(Style::default().fg(usage_color(row.pct)));
        f.render_widget(g, cols[1]);
    }
    if let Some(text) = extra {
        if rows.len() < slots.len() {
            f.render_widget(Paragraph::new(text), slots[rows.len()]);
        }
    }
}
