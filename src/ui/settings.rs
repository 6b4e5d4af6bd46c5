use crate::app::App;
use crate::ui::class_color;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState};

pub fn draw_settings(frame: &mut Frame, area: Rect, app: &App) {
  let title = format!(
    " Settings - squad size {} - {} excluded ",
    app.squad_size(),
    app.excluded_count()
  );

  let block = Block::default()
    .title(title)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let items: Vec<ListItem> = app
    .legends()
    .iter()
    .map(|legend| {
      let excluded = app.is_excluded(&legend.name);
      let mark = if excluded { "[ ]" } else { "[x]" };
      let name_style = if excluded {
        Style::default().fg(Color::DarkGray)
      } else {
        Style::default().fg(Color::White)
      };

      let line = Line::from(vec![
        Span::styled(format!("{} ", mark), Style::default().fg(Color::DarkGray)),
        Span::styled(format!("{:<16}", legend.name), name_style),
        Span::styled(
          legend.class.as_str(),
          Style::default().fg(class_color(legend.class)),
        ),
      ]);
      ListItem::new(line)
    })
    .collect();

  let list = List::new(items)
    .block(block)
    .highlight_style(
      Style::default()
        .bg(Color::DarkGray)
        .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("> ");

  let mut state = ListState::default();
  state.select(Some(app.settings_cursor()));

  frame.render_stateful_widget(list, area, &mut state);
}
