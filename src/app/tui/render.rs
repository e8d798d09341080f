use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Gauge, Paragraph, Wrap};

use crate::db::KvStore;

use super::super::format::{build_progress_gauge, truncate};
use super::super::page::PageSource;
use super::super::replay::ReplaySession;
use super::EventLog;

pub(super) fn draw_tui<S: KvStore>(
    frame: &mut Frame,
    session: &ReplaySession<S>,
    log: &EventLog,
    wall_ms: u64,
    finished: bool,
) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let reconciler = session.reconciler();
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "PLAYTRACK",
            Style::default()
                .fg(Color::Rgb(110, 170, 255))
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            reconciler.state().label(),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(
            format!("t={}ms", session.now_ms()),
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Replay"));
    frame.render_widget(header, chunks[0]);

    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(chunks[1]);
    let page_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(8), Constraint::Length(3)])
        .split(body_chunks[0]);

    let page = session.page();
    let stats = reconciler.sampler().stats();
    let page_text = format!(
        "Location\n{}\n\nContainer\n{}\n\nSampler\n{} samples, {} evaluations\n{} coalesced bursts, {} timeouts\n{} live observer(s)",
        truncate(page.location(), 44),
        page.stats_parent_id()
            .map(|parent| format!("mounted in #{parent} ({} insert(s))", page.stats_inserts()))
            .unwrap_or_else(|| "not mounted".to_string()),
        stats.samples_started,
        stats.evaluations,
        stats.bursts_coalesced,
        stats.timeouts,
        page.live_observers(),
    );
    let page_panel = Paragraph::new(page_text)
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .block(panel_block("Page"))
        .wrap(Wrap { trim: false });
    frame.render_widget(page_panel, page_chunks[0]);

    match reconciler.shown() {
        Some(state) => {
            let (ratio, label) = build_progress_gauge(&state);
            let progress = Gauge::default()
                .block(panel_block("Videos Watched"))
                .gauge_style(
                    Style::default()
                        .fg(Color::Rgb(130, 190, 255))
                        .bg(Color::Black)
                        .add_modifier(Modifier::BOLD),
                )
                .label(label)
                .ratio(ratio);
            frame.render_widget(progress, page_chunks[1]);
        }
        None => {
            let empty = Paragraph::new("no stats shown")
                .style(Style::default().fg(Color::Rgb(125, 135, 150)))
                .block(panel_block("Videos Watched"));
            frame.render_widget(empty, page_chunks[1]);
        }
    }

    let visible_rows = body_chunks[1].height.saturating_sub(2) as usize;
    let mut recent: Vec<Line> = log
        .lines()
        .rev()
        .take(visible_rows)
        .map(|line| Line::from(line.as_str()))
        .collect();
    recent.reverse();
    let events = Paragraph::new(recent)
        .style(Style::default().fg(Color::Rgb(205, 210, 220)))
        .block(panel_block("Events"));
    frame.render_widget(events, body_chunks[1]);

    let status = if finished {
        format!("Trace finished after {wall_ms}ms.   q quit")
    } else {
        "Replaying...   q quit".to_string()
    };
    let status_widget = Paragraph::new(status)
        .style(Style::default().fg(Color::Rgb(205, 165, 255)))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[2]);
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}
