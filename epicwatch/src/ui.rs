//! UI rendering for the TUI.

use epicwatch_core::format::{format_clock, format_delay_ms, format_relative_time_opt};
use epicwatch_core::SessionStatus;
use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table},
    Frame,
};

use crate::app::{App, RowKind};

// ========== Colors ==========

/// Border color for the header block
const BORDER_HEADER: Color = Color::Rgb(0, 150, 150);
/// Border color for the project tree
const BORDER_TREE: Color = Color::Rgb(100, 180, 100);
/// Border color for the activity feed
const BORDER_ACTIVITY: Color = Color::Rgb(180, 100, 180);
/// Label color for header attributes
const LABEL_COLOR: Color = Color::Rgb(100, 180, 180);
/// Dim gray for secondary text
const DIM: Color = Color::Rgb(128, 128, 128);
/// Key hint color in the footer
const KEY_HINT: Color = Color::Rgb(0, 255, 255);

/// Render the application UI.
pub fn render(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::vertical([
        Constraint::Length(4),  // Header
        Constraint::Min(6),     // Project tree
        Constraint::Length(10), // Activity
        Constraint::Length(1),  // Footer
    ])
    .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_tree(frame, app, chunks[1]);
    render_activity(frame, app, chunks[2]);
    render_footer(frame, app, chunks[3]);
}

fn status_color(status: SessionStatus) -> Color {
    match status {
        SessionStatus::Idle => Color::Gray,
        SessionStatus::Running => Color::Green,
        SessionStatus::Complete => Color::Cyan,
        SessionStatus::Stopped => Color::Red,
    }
}

/// Color for a story or phase status string
fn item_status_color(status: &str) -> Color {
    match status {
        "done" | "completed" => Color::Green,
        "in-progress" => Color::Yellow,
        "review" => Color::Magenta,
        "ready-for-dev" => Color::Cyan,
        "backlog" | "pending" => DIM,
        _ => Color::White,
    }
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let view = &app.view;
    let title = match &view.tree.name {
        Some(name) => format!(" epicwatch: {} ", name),
        None => " epicwatch ".to_string(),
    };
    let block = Block::default()
        .title(title)
        .title_style(Style::default().fg(BORDER_HEADER).bold())
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(BORDER_HEADER));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let label = Style::default().fg(LABEL_COLOR);
    let value = Style::default().fg(Color::White).bold();

    let mut status_line = vec![
        Span::styled("Status ", label),
        Span::styled(
            view.status.as_str().to_uppercase(),
            Style::default().fg(status_color(view.status)).bold(),
        ),
        Span::styled("  Run ", label),
        Span::styled(view.run_id.clone().unwrap_or_else(|| "-".to_string()), value),
        Span::styled("  Seq ", label),
        Span::styled(view.last_sequence.to_string(), value),
        Span::styled("  Pending ", label),
        Span::styled(view.pending.to_string(), value),
    ];
    if let Some(next) = view.waiting_for {
        status_line.push(Span::styled(
            format!(" (waiting for #{})", next),
            Style::default().fg(Color::Yellow),
        ));
    }
    status_line.push(Span::styled("  Heartbeat ", label));
    status_line.push(Span::styled(
        format_relative_time_opt(view.last_heartbeat),
        value,
    ));
    if let Some((attempt, delay_ms)) = view.reconnect {
        status_line.push(Span::styled(
            format!("  reconnect #{} in {}", attempt, format_delay_ms(delay_ms)),
            Style::default().fg(Color::Red),
        ));
    }

    let counters = Line::from(vec![
        Span::styled(format!("{} epics", view.tree.epics.len()), value),
        Span::styled(format!("  {} stories", view.tree.story_count()), value),
        Span::styled(
            format!(
                "  applied {}  no-op {}  invalid {}  duplicates {}  resyncs {}",
                view.stats.applied,
                view.stats.unresolved + view.stats.ignored,
                view.stats.invalid_messages,
                view.sequencer.duplicates,
                view.stats.resyncs
            ),
            Style::default().fg(DIM),
        ),
    ]);

    frame.render_widget(
        Paragraph::new(vec![Line::from(status_line), counters]),
        inner,
    );
}

fn render_tree(frame: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default()
        .title(" Epics ")
        .title_style(Style::default().fg(BORDER_TREE).bold())
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(BORDER_TREE));

    if app.rows.is_empty() {
        let placeholder = Paragraph::new("Waiting for project state...")
            .style(Style::default().fg(DIM).italic())
            .block(block);
        frame.render_widget(placeholder, area);
        return;
    }

    let rows: Vec<Row> = app
        .rows
        .iter()
        .map(|row| {
            let marker = match (row.has_children, row.expanded) {
                (true, true) => "▾ ",
                (true, false) => "▸ ",
                (false, _) => "  ",
            };
            let indent = "  ".repeat(row.depth as usize);
            let label_style = match row.kind {
                RowKind::Epic { .. } => Style::default().bold(),
                RowKind::Story { .. } => Style::default(),
                RowKind::Phase { .. } => Style::default().fg(DIM),
            };
            Row::new(vec![
                Cell::from(Span::styled(
                    format!("{}{}{}", indent, marker, row.label),
                    label_style,
                )),
                Cell::from(Span::styled(
                    row.status.clone(),
                    Style::default().fg(item_status_color(&row.status)),
                )),
                Cell::from(row.progress.clone().unwrap_or_default()),
            ])
        })
        .collect();

    let header = Row::new(vec!["Item", "Status", "Progress"])
        .style(Style::default().fg(LABEL_COLOR).bold())
        .bottom_margin(1);

    let table = Table::new(
        rows,
        [
            Constraint::Min(30),
            Constraint::Length(16),
            Constraint::Length(9),
        ],
    )
    .header(header)
    .block(block)
    .row_highlight_style(Style::default().bg(Color::DarkGray).bold())
    .highlight_symbol("> ");

    frame.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_activity(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Activity ")
        .title_style(Style::default().fg(BORDER_ACTIVITY).bold())
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(BORDER_ACTIVITY));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let visible = inner.height as usize;
    let skip = app.view.activity.len().saturating_sub(visible);
    let lines: Vec<Line> = app
        .view
        .activity
        .iter()
        .skip(skip)
        .map(|entry| {
            let outcome_style = if entry.outcome == "updated" {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(DIM)
            };
            let clock = format_clock(entry.emitted_at);
            Line::from(vec![
                Span::styled(format!("{} ", clock), Style::default().fg(DIM)),
                Span::styled(format!("#{:<4} ", entry.sequence_id), Style::default().fg(LABEL_COLOR)),
                Span::raw(entry.summary.clone()),
                Span::styled(format!("  {}", entry.outcome), outcome_style),
            ])
        })
        .collect();

    if lines.is_empty() {
        let placeholder =
            Paragraph::new("No events yet").style(Style::default().fg(DIM).italic());
        frame.render_widget(placeholder, inner);
    } else {
        frame.render_widget(Paragraph::new(lines), inner);
    }
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let key_style = Style::default().fg(KEY_HINT).bold();
    let label_style = Style::default().fg(Color::DarkGray);
    let separator = Span::styled("  │  ", Style::default().fg(Color::DarkGray));

    let mut spans = vec![
        Span::styled(" ", Style::default()),
        Span::styled("[j/k]", key_style),
        Span::styled(" Navigate  ", label_style),
        separator.clone(),
        Span::styled("[Enter]", key_style),
        Span::styled(" Expand  ", label_style),
        separator.clone(),
        Span::styled("[r]", key_style),
        Span::styled(" Reconnect  ", label_style),
        separator.clone(),
        Span::styled("[s]", key_style),
        Span::styled(" Resync  ", label_style),
        separator.clone(),
        Span::styled("[q]", key_style),
        Span::styled(" Quit", label_style),
    ];
    if let Some(message) = &app.status_message {
        spans.push(separator);
        spans.push(Span::styled(message.clone(), Style::default().fg(Color::Yellow)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
