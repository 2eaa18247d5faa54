//! Top header with the connectivity badge, plus the error banner.

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use crate::session::SessionState;
use crate::types::ConnectionState;
use crate::ui::theme::{LIVE, MUTED, OFFLINE, PENDING};

fn badge(conn: ConnectionState, live: bool) -> Span<'static> {
    let (text, color) = match conn {
        _ if !live => (" Polling ", PENDING),
        ConnectionState::Connected => (" Live ", LIVE),
        ConnectionState::Connecting => (" Connecting ", PENDING),
        ConnectionState::Closing => (" Closing ", PENDING),
        ConnectionState::Disconnected => (" Offline ", OFFLINE),
    };
    Span::styled(
        text,
        Style::default().fg(Color::Black).bg(color).add_modifier(Modifier::BOLD),
    )
}

pub fn draw_header(
    f: &mut ratatui::Frame<'_>,
    area: Rect,
    conn: ConnectionState,
    live: bool,
    st: &SessionState,
) {
    let mut spans = vec![
        Span::styled("racktop ", Style::default().add_modifier(Modifier::BOLD)),
        badge(conn, live),
    ];
    if conn != ConnectionState::Connected {
        if let Some((attempt, delay)) = st.reconnecting() {
            spans.push(Span::styled(
                format!(" retry #{attempt} in {}s", delay.as_secs()),
                Style::default().fg(PENDING),
            ));
        }
    }
    let refreshed = st
        .last_refresh()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".into());
    let status = if st.loading() { "loading..." } else { "" };
    spans.push(Span::raw(format!(" | updated: {refreshed} {status}")));
    if let Some(health) = st.api_health() {
        let color = if health == "unreachable" { OFFLINE } else { MUTED };
        spans.push(Span::styled(format!(" | api: {health}"), Style::default().fg(color)));
    }
    spans.push(Span::styled(
        "  (r refresh, 1-3 server, c connect, d disconnect, q quit)",
        Style::default().fg(MUTED),
    ));
    f.render_widget(
        Block::default().title(Line::from(spans)).borders(Borders::BOTTOM),
        area,
    );
}

pub fn draw_banner(f: &mut ratatui::Frame<'_>, area: Rect, message: &str) {
    let p = Paragraph::new(Line::from(vec![
        Span::styled("! ", Style::default().fg(OFFLINE).add_modifier(Modifier::BOLD)),
        Span::styled(message.to_string(), Style::default().fg(OFFLINE)),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(OFFLINE)),
    );
    f.render_widget(p, area);
}
