//! Rendering.

use agent_chat_core::{Message, MessageBody, SessionApi, StreamTransport};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::app::App;

pub fn draw<B>(f: &mut Frame, app: &App<B>)
where
    B: SessionApi + StreamTransport + 'static,
{
    let view = app.view();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(3),    // Messages
            Constraint::Length(3), // Input
            Constraint::Length(1), // Key help
        ])
        .split(f.area());

    // Header
    let session = app
        .session()
        .map_or_else(|| "none (on /)".to_owned(), ToString::to_string);
    let loading = if app.is_loading() { " (Loading...)" } else { "" };
    let (activity, activity_style) = if app.is_creating() {
        ("Creating session... (Esc to cancel)", Style::default().fg(Color::Yellow))
    } else if view.streaming {
        ("Streaming...", Style::default().fg(Color::Green))
    } else {
        ("Idle", Style::default().fg(Color::DarkGray))
    };
    let error = view.error.as_deref().or_else(|| app.notice());
    let (error_text, error_style) = error.map_or_else(
        || ("No errors".to_owned(), Style::default().fg(Color::DarkGray)),
        |e| (e.to_owned(), Style::default().fg(Color::Red)),
    );

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Session: ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(session),
        Span::raw(format!(
            " | Loaded: {}{loading} | Emitted: {} | ",
            view.loaded_events, view.emitted_events
        )),
        Span::styled(activity, activity_style),
        Span::raw(" | "),
        Span::styled(error_text, error_style),
    ]))
    .block(Block::default().borders(Borders::ALL).title("agent-chat"));
    f.render_widget(header, chunks[0]);

    // Messages
    let mut lines: Vec<Line> = view.messages.iter().flat_map(message_lines).collect();
    if let Some(processing) = &view.processing {
        lines.push(Line::from(Span::styled(
            format!("... {processing}"),
            Style::default().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        )));
    }

    let height = chunks[1].height.saturating_sub(2);
    let total = u16::try_from(lines.len()).unwrap_or(u16::MAX);
    let scroll = total
        .saturating_sub(height)
        .saturating_sub(app.scroll_back());

    let messages = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Messages"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(messages, chunks[1]);

    // Input
    let input = Paragraph::new(app.input())
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title("Input"));
    f.render_widget(input, chunks[2]);

    let cursor = u16::try_from(app.input().chars().count()).unwrap_or(u16::MAX);
    f.set_cursor_position((
        chunks[2].x.saturating_add(cursor).saturating_add(1),
        chunks[2].y + 1,
    ));

    // Key help
    let key = Style::default().fg(Color::Yellow);
    let help = Paragraph::new(Line::from(vec![
        Span::styled(" Enter", key),
        Span::raw(" send | "),
        Span::styled("Esc", key),
        Span::raw(" stop | "),
        Span::styled("Ctrl+N", key),
        Span::raw(" new session | "),
        Span::styled("Alt+Left/Right", key),
        Span::raw(" back/forward | "),
        Span::styled("PgUp/PgDn", key),
        Span::raw(" scroll | "),
        Span::styled("Ctrl+C", key),
        Span::raw(" quit "),
    ]));
    f.render_widget(help, chunks[3]);
}

fn source_style(source: &str) -> Style {
    match source {
        "user" => Style::default().fg(Color::Cyan),
        "ai_agent" => Style::default().fg(Color::Magenta),
        _ => Style::default().fg(Color::DarkGray),
    }
    .add_modifier(Modifier::BOLD)
}

fn message_lines(message: &Message) -> Vec<Line<'static>> {
    let label = Span::styled(format!("{}: ", message.source), source_style(&message.source));

    match &message.body {
        MessageBody::Text(text) => {
            let mut lines: Vec<Line> = text
                .split('\n')
                .map(|line| Line::from(line.to_owned()))
                .collect();
            match lines.first_mut() {
                Some(first) => first.spans.insert(0, label),
                None => lines.push(Line::from(label)),
            }
            lines
        }
        MessageBody::ToolCalls(calls) => {
            let mut lines = vec![Line::from(vec![label, Span::raw("tool calls")])];
            for call in calls {
                let pretty = serde_json::to_string_pretty(call)
                    .unwrap_or_else(|_| call.tool_name.clone());
                lines.extend(pretty.lines().map(|line| {
                    Line::from(Span::styled(
                        format!("  {line}"),
                        Style::default().fg(Color::Gray),
                    ))
                }));
            }
            lines
        }
    }
}
