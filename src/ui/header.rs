use crate::app::App;
use crate::sync::DataSourceState;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

pub fn draw_header(frame: &mut Frame, area: Rect, app: &App) {
  let mut spans = vec![
    Span::styled(
      format!(" {} ", app.title()),
      Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    ),
    Span::styled("random legend picker", Style::default().fg(Color::DarkGray)),
  ];

  if app.offline() {
    spans.push(Span::raw("  "));
    spans.push(Span::styled("[offline]", Style::default().fg(Color::Red)));
  }

  if app.syncing() {
    spans.push(Span::raw("  "));
    spans.push(Span::styled("syncing...", Style::default().fg(Color::Yellow)));
  } else {
    let (label, color) = match app.source() {
      DataSourceState::Remote => ("live roster", Color::Green),
      DataSourceState::Cache => ("saved roster", Color::Yellow),
      DataSourceState::Default => ("built-in roster", Color::DarkGray),
    };
    spans.push(Span::raw("  "));
    spans.push(Span::styled(label, Style::default().fg(color)));
  }

  if app.update_pending() {
    spans.push(Span::raw("  "));
    spans.push(Span::styled(
      "update ready (u)",
      Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
    ));
  }

  let block = Block::default()
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));
  let paragraph = Paragraph::new(Line::from(spans)).block(block);
  frame.render_widget(paragraph, area);
}
