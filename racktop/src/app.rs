//! App state and main loop: input handling, live/poll refreshes and drawing.

use std::{
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    widgets::Paragraph,
    Terminal,
};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info};

use crate::config::Settings;
use crate::session::{Session, SessionState};
use crate::types::{ConnectionState, ServerIdentity};
use crate::ui::chart::{draw_usage_chart, AI_SERIES, CPU_SERIES};
use crate::ui::details::{draw_filesystems, draw_vms};
use crate::ui::header::{draw_banner, draw_header};
use crate::ui::servers::{draw_overview, draw_server};

const FRAME: Duration = Duration::from_millis(250);

/// Key bindings understood by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Refresh,
    /// REST refresh of one server card.
    RefreshServer(ServerIdentity),
    Connect,
    Disconnect,
}

impl Action {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(Action::Quit),
            KeyCode::Char('r') | KeyCode::Char('R') | KeyCode::F(5) => Some(Action::Refresh),
            KeyCode::Char('1') => Some(Action::RefreshServer(ServerIdentity::Ai)),
            KeyCode::Char('2') => Some(Action::RefreshServer(ServerIdentity::App)),
            KeyCode::Char('3') => Some(Action::RefreshServer(ServerIdentity::Storage)),
            KeyCode::Char('c') | KeyCode::Char('C') => Some(Action::Connect),
            KeyCode::Char('d') | KeyCode::Char('D') => Some(Action::Disconnect),
            _ => None,
        }
    }
}

pub struct App {
    session: Arc<Session>,
    settings: Settings,
    should_quit: bool,
    // REST fetch in flight, if any; never more than one at a time
    fetch: Option<JoinHandle<()>>,
    last_poll: Instant,
}

impl App {
    pub fn new(session: Session, settings: Settings) -> Self {
        Self {
            session: Arc::new(session),
            settings,
            should_quit: false,
            fetch: None,
            last_poll: Instant::now(),
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        if self.settings.live {
            self.session.client().connect();
        }
        self.spawn_fetch(|s| async move {
            let _ = s.load_initial().await;
            let _ = s.check_health().await;
        });

        // Terminal setup
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let res = self.event_loop(&mut terminal).await;

        // Teardown
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.session.client().disconnect();
        if let Some(task) = self.fetch.take() {
            task.abort();
        }
        res
    }

    async fn event_loop<B: ratatui::backend::Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
    ) -> anyhow::Result<()> {
        loop {
            // Input (non-blocking)
            while event::poll(Duration::from_millis(10))? {
                if let Event::Key(k) = event::read()? {
                    if k.kind != KeyEventKind::Release {
                        if let Some(action) = Action::from_key(k.code) {
                            self.handle(action);
                        }
                    }
                }
            }
            if self.should_quit {
                break;
            }

            if !self.settings.live && self.last_poll.elapsed() >= self.settings.poll_interval {
                self.last_poll = Instant::now();
                self.spawn_fetch(|s| async move {
                    let _ = s.fetch_overview().await;
                });
            }

            terminal.draw(|f| self.draw(f))?;
            sleep(FRAME).await;
        }
        Ok(())
    }

    pub fn handle(&mut self, action: Action) {
        debug!(?action, "key");
        match action {
            Action::Quit => self.should_quit = true,
            Action::Refresh => self.spawn_fetch(|s| async move {
                if let Ok(source) = s.refresh().await {
                    debug!(?source, "refreshed");
                }
            }),
            Action::RefreshServer(id) => self.spawn_fetch(move |s| async move {
                if s.refresh_server(id).await.is_ok() {
                    debug!(%id, "server refreshed");
                }
            }),
            Action::Connect => {
                info!("manual connect");
                self.session.client().connect();
            }
            Action::Disconnect => {
                info!("manual disconnect");
                self.session.client().disconnect();
            }
        }
    }

    fn spawn_fetch<F, Fut>(&mut self, job: F)
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.fetch.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("fetch already in flight");
            return;
        }
        self.fetch = Some(tokio::spawn(job(Arc::clone(&self.session))));
    }

    pub fn draw(&self, f: &mut ratatui::Frame<'_>) {
        let conn = self.session.connection_state();
        self.session.with_state(|st| draw_dashboard(f, conn, self.settings.live, st));
    }
}

pub fn draw_dashboard(f: &mut ratatui::Frame<'_>, conn: ConnectionState, live: bool, st: &SessionState) {
    let area = f.area();
    let banner = st.banner();

    // Root rows: header, banner, cards, charts, detail tables
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(if banner.is_some() { 3 } else { 0 }),
            Constraint::Length(8),
            Constraint::Min(8),
            Constraint::Percentage(30),
        ])
        .split(area);

    draw_header(f, rows[0], conn, live, st);
    if let Some(msg) = banner {
        draw_banner(f, rows[1], msg);
    }

    if !st.has_data() {
        let body = Rect {
            height: area.height.saturating_sub(rows[2].y),
            ..rows[2]
        };
        let text = if st.loading() { "Loading dashboard..." } else { "Waiting for data..." };
        f.render_widget(Paragraph::new(text).alignment(Alignment::Center), body);
        return;
    }

    let overview = st.overview();
    let cards = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 4); 4])
        .split(rows[2]);
    draw_overview(f, cards[0], overview);
    for (slot, id) in cards[1..].iter().zip(ServerIdentity::ALL) {
        draw_server(f, *slot, id, overview.server(id));
    }

    let charts = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[3]);
    draw_usage_chart(f, charts[0], "CPU Usage Across Servers", st.chart(), &CPU_SERIES);
    draw_usage_chart(f, charts[1], "AI Memory & GPU Usage", st.chart(), &AI_SERIES);

    let details = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(rows[4]);
    let vms = overview.server(ServerIdentity::App).map(|s| s.vms()).unwrap_or_default();
    let filesystems = overview
        .server(ServerIdentity::Storage)
        .map(|s| s.filesystems())
        .unwrap_or_default();
    draw_vms(f, details[0], &vms);
    draw_filesystems(f, details[1], &filesystems);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bindings() {
        assert_eq!(Action::from_key(KeyCode::Char('q')), Some(Action::Quit));
        assert_eq!(Action::from_key(KeyCode::Esc), Some(Action::Quit));
        assert_eq!(Action::from_key(KeyCode::Char('r')), Some(Action::Refresh));
        assert_eq!(
            Action::from_key(KeyCode::Char('3')),
            Some(Action::RefreshServer(ServerIdentity::Storage))
        );
        assert_eq!(Action::from_key(KeyCode::Char('c')), Some(Action::Connect));
        assert_eq!(Action::from_key(KeyCode::Char('d')), Some(Action::Disconnect));
        assert_eq!(Action::from_key(KeyCode::Char('x')), None);
    }

    fn screen_text(backend: &ratatui::backend::TestBackend) -> String {
        backend.buffer().content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn empty_state_renders_placeholder_and_badge() {
        let mut terminal = Terminal::new(ratatui::backend::TestBackend::new(120, 30)).unwrap();
        let st = SessionState::default();
        terminal
            .draw(|f| draw_dashboard(f, ConnectionState::Disconnected, true, &st))
            .unwrap();
        let text = screen_text(terminal.backend());
        assert!(text.contains("Offline"), "{text}");
        assert!(text.contains("Waiting for data"), "{text}");
    }
}
