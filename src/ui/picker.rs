use crate::app::App;
use crate::legends::LegendClass;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, Paragraph};

pub fn class_color(class: LegendClass) -> Color {
  match class {
    LegendClass::Assault => Color::Red,
    LegendClass::Skirmisher => Color::Cyan,
    LegendClass::Recon => Color::Yellow,
    LegendClass::Support => Color::Green,
    LegendClass::Controller => Color::Blue,
  }
}

pub fn draw_picker(frame: &mut Frame, area: Rect, app: &App) {
  let title = format!(
    " Squad ({} of {} legends) ",
    app.squad_size(),
    app.legends().len() - app.excluded_count()
  );

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  if app.squad().is_empty() {
    let paragraph = Paragraph::new("Press Space to draw a squad.")
      .block(block)
      .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(paragraph, area);
    return;
  }

  let items: Vec<ListItem> = app
    .squad()
    .iter()
    .map(|legend| {
      let line = Line::from(vec![
        Span::styled(
          format!("{:<16}", legend.name),
          Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
          legend.class.as_str(),
          Style::default().fg(class_color(legend.class)),
        ),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items).block(block);
  frame.render_widget(list, area);
}
