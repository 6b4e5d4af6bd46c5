mod header;
mod picker;
mod settings;

use crate::app::{App, Mode};
use crate::commands;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

pub use picker::class_color;

/// Main draw function
pub fn draw(frame: &mut Frame, app: &App) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(3), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  header::draw_header(frame, chunks[0], app);

  match app.mode() {
    Mode::Settings => settings::draw_settings(frame, chunks[1], app),
    _ => picker::draw_picker(frame, chunks[1], app),
  }

  draw_status_bar(frame, chunks[2], app);
}

fn draw_status_bar(frame: &mut Frame, area: Rect, app: &App) {
  let (content, style) = match app.mode() {
    Mode::Normal => {
      if let Some(status) = app.status() {
        (format!(" {}", status), Style::default().fg(Color::White))
      } else {
        let hint = " Space:draw  s:settings  r:sync  :command  q:quit";
        (hint.to_string(), Style::default().fg(Color::DarkGray))
      }
    }
    Mode::Settings => {
      let hint = " j/k:move  Space:toggle  h/l:squad size  Esc:back";
      (hint.to_string(), Style::default().fg(Color::DarkGray))
    }
    Mode::Command => {
      let mut line = format!(":{}", app.command_input());
      let suggestions = commands::get_suggestions(app.command_input());
      if let Some(cmd) = suggestions.get(app.selected_suggestion()) {
        line.push_str(&format!("  ({} - {})", cmd.name, cmd.description));
      }
      (line, Style::default().fg(Color::Yellow))
    }
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}
