//! Board rendering.
//!
//! Each panel needs a minimum area. When the terminal is too small a panel is
//! skipped and the rest still draw.

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Padding, Paragraph},
    Frame,
};

use vitalboard_core::{FeedbackMarker, NextMeasurement, ScheduleField, TerminalSession};
use vitalboard_protocol::{ButtonUnit, INDICATOR_LOCKED};

const MIN_PANEL_WIDTH: u16 = 12;
const MIN_PANEL_HEIGHT: u16 = 3;

pub fn render(f: &mut Frame, session: &TerminalSession) {
    let area = f.area();
    let [measurement, vitals, schedule, button, echo, status] = Layout::vertical([
        Constraint::Length(4),
        Constraint::Length(5),
        Constraint::Length(6),
        Constraint::Length(3),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    if fits(measurement, "measurement") {
        render_measurement(f, session, measurement);
    }
    if fits(vitals, "vitals") {
        render_vitals(f, session, vitals);
    }
    if fits(schedule, "schedule") {
        render_schedule(f, session, schedule);
    }
    if fits(button, "button") {
        render_button(f, session, button);
    }
    if fits(echo, "echo") {
        render_echo(f, session, echo);
    }
    if status.height > 0 {
        f.render_widget(Paragraph::new(status_line(session)), status);
    }
}

fn fits(area: Rect, panel: &'static str) -> bool {
    let fits = area.height >= MIN_PANEL_HEIGHT && area.width >= MIN_PANEL_WIDTH;
    if !fits {
        tracing::trace!(panel, width = area.width, height = area.height, "Panel skipped");
    }
    fits
}

fn panel(title: &'static str) -> Block<'static> {
    Block::default()
        .title(Span::styled(
            format!(" {} ", title),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::DarkGray))
        .padding(Padding::horizontal(1))
}

pub fn measurement_style(next: &NextMeasurement) -> Style {
    if next.overdue {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Gray)
    }
}

fn render_measurement(f: &mut Frame, session: &TerminalSession, area: Rect) {
    let store = session.store();
    let next = store.next_measurement();
    let lines = vec![
        Line::from(Span::styled(
            store.last_measurement().to_string(),
            Style::default().fg(Color::Gray),
        )),
        Line::from(Span::styled(next.label.clone(), measurement_style(next))),
    ];
    f.render_widget(Paragraph::new(lines).block(panel("測定")), area);
}

fn labelled(label: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:<8}", label), Style::default().fg(Color::DarkGray)),
        Span::styled(value, Style::default().fg(Color::White)),
    ])
}

fn render_vitals(f: &mut Frame, session: &TerminalSession, area: Rect) {
    let store = session.store();
    let lines = vec![
        labelled("脈拍", store.vitals().pulse.clone()),
        labelled("SpO2", store.oxygen_display()),
        labelled("状態", store.condition_display().to_string()),
    ];
    f.render_widget(Paragraph::new(lines).block(panel("バイタル")), area);
}

fn schedule_label(field: ScheduleField) -> &'static str {
    match field {
        ScheduleField::SleepPlanned => "就寝予定",
        ScheduleField::SleepActual => "就寝実績",
        ScheduleField::WakePlanned => "起床予定",
        ScheduleField::WakeActual => "起床実績",
    }
}

fn render_schedule(f: &mut Frame, session: &TerminalSession, area: Rect) {
    let schedule = session.store().schedule();
    let lines: Vec<Line> = ScheduleField::ALL
        .into_iter()
        .map(|field| labelled(schedule_label(field), schedule.get(field).to_string()))
        .collect();
    f.render_widget(Paragraph::new(lines).block(panel("睡眠")), area);
}

pub fn button_style(unit: &ButtonUnit, feedback: Option<FeedbackMarker>) -> Style {
    let base = match feedback {
        Some(FeedbackMarker::TowardLock) => Style::default().fg(Color::White).bg(Color::Red),
        Some(FeedbackMarker::TowardUnlock) => Style::default().fg(Color::White).bg(Color::Blue),
        None if unit.indicator_color == INDICATOR_LOCKED => {
            Style::default().fg(Color::Black).bg(Color::White)
        }
        None => Style::default().fg(Color::Yellow),
    };
    base.add_modifier(Modifier::BOLD)
}

fn render_button(f: &mut Frame, session: &TerminalSession, area: Rect) {
    let store = session.store();
    let unit = store.button();
    let line = Line::from(Span::styled(
        format!(" {} ", unit.text),
        button_style(unit, store.feedback()),
    ));
    f.render_widget(Paragraph::new(line).block(panel("緊急")), area);
}

fn render_echo(f: &mut Frame, session: &TerminalSession, area: Rect) {
    let line = Line::from(Span::styled(
        session.input().echo_text(),
        Style::default().fg(Color::Cyan),
    ));
    f.render_widget(Paragraph::new(line).block(panel("入力")), area);
}

fn status_line(session: &TerminalSession) -> Line<'static> {
    let mut spans = vec![Span::styled(
        format!(" {} ", session.mode()),
        Style::default().fg(Color::Black).bg(Color::Cyan),
    )];
    match session.last_error() {
        Some(error) => spans.push(Span::styled(
            format!(" offline: {}", error),
            Style::default().fg(Color::Red),
        )),
        None => {
            spans.push(Span::styled(" [Tab]", Style::default().fg(Color::DarkGray)));
            spans.push(Span::styled(" Emergency ", Style::default().fg(Color::Gray)));
            spans.push(Span::styled(" [Esc]", Style::default().fg(Color::DarkGray)));
            spans.push(Span::styled(" Quit ", Style::default().fg(Color::Gray)));
        }
    }
    Line::from(spans)
}
