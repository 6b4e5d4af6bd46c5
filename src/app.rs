use crate::commands;
use crate::config::{Config, MAX_SQUAD_SIZE, MIN_SQUAD_SIZE};
use crate::event::{Event, EventHandler};
use crate::cache::{Destination, Resource, SqliteCacheStore};
use crate::gateway::{
  self, CacheController, GatewayEvent, GatewayHandle, LifecycleState, UpdatePrompt,
};
use crate::legends::{default_legends, sample_without_replacement, slugify, Legend};
use crate::net::{HttpBackend, NetworkBackend, OfflineBackend};
use crate::store::SnapshotStore;
use crate::sync::{DataSourceState, Fetcher, SyncCoordinator, SyncEvent};
use crate::ui;
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::collections::BTreeSet;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
  Settings,
}

/// Legends still in the draw pool.
pub fn eligible_legends(legends: &[Legend], excluded: &BTreeSet<String>) -> Vec<Legend> {
  legends
    .iter()
    .filter(|l| !excluded.contains(&l.name))
    .cloned()
    .collect()
}

/// Main application state
pub struct App {
  /// The roster currently on screen
  legends: Vec<Legend>,

  /// Where that roster came from (only ever advances)
  source: DataSourceState,

  /// Legend names removed from the draw pool
  excluded: BTreeSet<String>,

  /// How many legends a draw picks
  squad_size: usize,

  /// The last drawn squad
  squad: Vec<Legend>,

  /// Cursor in the settings roster list
  settings_cursor: usize,

  /// Current input mode
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  /// One-line status message
  status: Option<String>,

  /// Whether a roster refresh is in flight
  syncing: bool,

  /// Update prompt state (waiting version, reload latch)
  prompt: UpdatePrompt,

  /// Offline gateway, absent when its store failed to open
  gateway: Option<GatewayHandle>,

  coordinator: Arc<SyncCoordinator>,

  /// Origin shared with the gateway, for asset URLs
  base: Url,

  /// Application configuration
  config: Config,

  /// Running with the network disabled
  offline: bool,

  /// Event sender for async tasks
  event_tx: mpsc::UnboundedSender<Event>,

  /// Whether to quit
  should_quit: bool,
}

impl App {
  pub async fn new(config: Config, offline: bool) -> Result<Self> {
    let base = config.base_url()?;
    let data_dir = config.data_dir()?;

    let network: Arc<dyn NetworkBackend> = if offline {
      Arc::new(OfflineBackend)
    } else {
      Arc::new(HttpBackend::new()?)
    };

    // A broken cache database costs the offline layer, not the app.
    let mut update_waiting = false;
    let gateway = match SqliteCacheStore::open_at(&data_dir.join("responses.db")) {
      Ok(store) => {
        let controller =
          CacheController::new(base.clone(), VERSION, network.clone(), Arc::new(store));
        match gateway::spawn(controller, VERSION).await {
          Ok((handle, state)) => {
            // Install runs before we subscribe to gateway events, so a
            // pending update has to be picked up from the returned state.
            update_waiting = state == LifecycleState::Waiting;
            Some(handle)
          }
          Err(e) => {
            warn!("Gateway failed to start, requests go direct: {}", e);
            None
          }
        }
      }
      Err(e) => {
        warn!("Response cache unavailable, requests go direct: {}", e);
        None
      }
    };

    let snapshot = match SnapshotStore::open_at(&data_dir.join(crate::store::DB_FILE)) {
      Ok(store) => Some(Arc::new(store)),
      Err(e) => {
        warn!("Snapshot store unavailable, roster will not persist: {}", e);
        None
      }
    };

    let fetcher = match &gateway {
      Some(handle) => Fetcher::Gateway(handle.clone()),
      None => Fetcher::Direct(network),
    };
    let coordinator = Arc::new(SyncCoordinator::new(snapshot, fetcher, base.clone()));

    let (tx, _rx) = mpsc::unbounded_channel();

    let mut prompt = UpdatePrompt::new();
    let mut status = None;
    if update_waiting {
      prompt.on_update_available();
      status = Some("A new version is ready. Press u to apply.".to_string());
    }

    Ok(Self {
      legends: default_legends(),
      source: DataSourceState::Default,
      excluded: BTreeSet::new(),
      squad_size: config.squad_size,
      squad: Vec::new(),
      settings_cursor: 0,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      status,
      syncing: false,
      prompt,
      gateway,
      coordinator,
      base,
      config,
      offline,
      event_tx: tx,
      should_quit: false,
    })
  }

  pub async fn run(&mut self) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Create event handler
    let mut events = EventHandler::new(Duration::from_millis(250));
    self.event_tx = events.sender();

    self.forward_gateway_events();
    self.start_sync(true);

    // Main loop
    while !self.should_quit {
      // Draw UI
      terminal.draw(|frame| ui::draw(frame, self))?;

      // Handle events
      if let Some(event) = events.next().await {
        self.handle_event(event)?;
      }
    }

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
  }

  /// Bridge gateway broadcasts into the page event loop.
  fn forward_gateway_events(&self) {
    if let Some(handle) = &self.gateway {
      let mut rx = handle.subscribe();
      let tx = self.event_tx.clone();
      tokio::spawn(async move {
        loop {
          match rx.recv().await {
            Ok(event) => {
              if tx.send(Event::Gateway(event)).is_err() {
                break;
              }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
          }
        }
      });
    }
  }

  /// Kick off a roster sync; events come back through the main loop.
  fn start_sync(&self, initial: bool) {
    let coordinator = self.coordinator.clone();
    let tx = self.event_tx.clone();

    tokio::spawn(async move {
      let (sync_tx, mut sync_rx) = mpsc::unbounded_channel();

      let run = async move {
        if initial {
          coordinator.initial_sync(&sync_tx).await;
        } else {
          coordinator.refresh(&sync_tx).await;
        }
      };
      let forward = async {
        while let Some(event) = sync_rx.recv().await {
          if tx.send(Event::Sync(event)).is_err() {
            break;
          }
        }
      };
      tokio::join!(run, forward);
    });
  }

  fn handle_event(&mut self, event: Event) -> Result<()> {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => {} // UI refresh happens automatically
      Event::Sync(sync_event) => self.handle_sync_event(sync_event),
      Event::Gateway(gateway_event) => self.handle_gateway_event(gateway_event),
    }
    Ok(())
  }

  fn handle_sync_event(&mut self, event: SyncEvent) {
    match event {
      SyncEvent::Started => {
        self.syncing = true;
      }
      SyncEvent::Data { legends, source } => {
        // Never replace fresher data with a staler source.
        if source >= self.source {
          self.legends = legends;
          self.source.advance_to(source);
          let names: BTreeSet<String> = self.legends.iter().map(|l| l.name.clone()).collect();
          self.excluded.retain(|name| names.contains(name));
          if self.settings_cursor >= self.legends.len() {
            self.settings_cursor = self.legends.len().saturating_sub(1);
          }
          self.status = Some(match self.source {
            DataSourceState::Remote => "Roster updated".to_string(),
            _ => "Showing the saved roster".to_string(),
          });
        }
      }
      SyncEvent::Failed => {
        self.status = Some(match self.source {
          DataSourceState::Default => "Offline. Using the built-in roster.".to_string(),
          _ => "Offline. Showing the saved roster.".to_string(),
        });
      }
      SyncEvent::Finished => {
        self.syncing = false;
      }
    }
  }

  fn handle_gateway_event(&mut self, event: GatewayEvent) {
    match event {
      GatewayEvent::BackOnline => {
        self.status = Some("Back online, refreshing...".to_string());
        self.start_sync(false);
      }
      GatewayEvent::UpdateAvailable => {
        self.prompt.on_update_available();
        self.status = Some("A new version is ready. Press u to apply.".to_string());
      }
      GatewayEvent::ControllerChanged => {
        // Reload once per takeover, like a page under a new controller.
        if self.prompt.on_controller_changed() {
          self.reload();
        }
      }
    }
  }

  /// Start the session over under the new controller.
  fn reload(&mut self) {
    self.legends = default_legends();
    self.source = DataSourceState::Default;
    self.squad.clear();
    self.status = Some("Updated to the new version".to_string());
    self.start_sync(true);
  }

  fn handle_key(&mut self, key: crossterm::event::KeyEvent) {
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
      Mode::Settings => self.handle_settings_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      // Quit
      KeyCode::Char('q') => {
        self.should_quit = true;
      }
      KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
        self.should_quit = true;
      }

      // Core actions
      KeyCode::Enter | KeyCode::Char(' ') | KeyCode::Char('d') => self.draw_squad(),
      KeyCode::Char('r') => {
        if !self.syncing {
          self.start_sync(false);
        }
      }
      KeyCode::Char('s') => {
        self.mode = Mode::Settings;
      }
      KeyCode::Char('u') => self.apply_update(),

      // Mode switches
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
      }

      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.execute_command();
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
      }
      KeyCode::Tab | KeyCode::Down => {
        // Navigate autocomplete suggestions
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        // Navigate autocomplete suggestions backwards
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0; // Reset selection on input change
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0; // Reset selection on input change
      }
      _ => {}
    }
  }

  fn handle_settings_mode_key(&mut self, key: crossterm::event::KeyEvent) {
    match key.code {
      KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('s') => {
        self.mode = Mode::Normal;
      }
      KeyCode::Up | KeyCode::Char('k') => {
        if self.settings_cursor > 0 {
          self.settings_cursor -= 1;
        }
      }
      KeyCode::Down | KeyCode::Char('j') => {
        if self.settings_cursor + 1 < self.legends.len() {
          self.settings_cursor += 1;
        }
      }
      KeyCode::Enter | KeyCode::Char(' ') => {
        if let Some(legend) = self.legends.get(self.settings_cursor) {
          let name = legend.name.clone();
          if !self.excluded.remove(&name) {
            self.excluded.insert(name);
          }
        }
      }
      KeyCode::Right | KeyCode::Char('l') | KeyCode::Char('+') => {
        if self.squad_size < MAX_SQUAD_SIZE {
          self.squad_size += 1;
        }
      }
      KeyCode::Left | KeyCode::Char('h') | KeyCode::Char('-') => {
        if self.squad_size > MIN_SQUAD_SIZE {
          self.squad_size -= 1;
        }
      }
      _ => {}
    }
  }

  fn execute_command(&mut self) {
    // Get the command to execute - either from selected suggestion or direct input
    let suggestions = commands::get_suggestions(&self.command_input);
    let cmd = if !suggestions.is_empty() && self.selected_suggestion < suggestions.len() {
      suggestions[self.selected_suggestion].name.to_string()
    } else {
      self.command_input.trim().to_lowercase()
    };

    match cmd.as_str() {
      "draw" => self.draw_squad(),
      "settings" => {
        self.mode = Mode::Settings;
        self.command_input.clear();
        return;
      }
      "sync" => {
        if !self.syncing {
          self.start_sync(false);
        }
      }
      "update" => self.apply_update(),
      "quit" => {
        self.should_quit = true;
      }
      _ => {
        // Unknown command
      }
    }
    self.command_input.clear();
  }

  fn draw_squad(&mut self) {
    let pool = eligible_legends(&self.legends, &self.excluded);
    if pool.len() < self.squad_size {
      self.status = Some(format!(
        "Not enough legends left: need {}, have {}",
        self.squad_size,
        pool.len()
      ));
      return;
    }
    self.squad = sample_without_replacement(&pool, self.squad_size);
    self.status = None;
    self.prefetch_portraits();
  }

  /// Warm the image cache for the drawn legends, fire-and-forget. Failures
  /// end at the gateway's fallback handling.
  fn prefetch_portraits(&self) {
    let Some(handle) = &self.gateway else {
      return;
    };
    for legend in &self.squad {
      let Ok(url) = self
        .base
        .join(&format!("/images/apex/{}.png", slugify(&legend.name)))
      else {
        continue;
      };
      let handle = handle.clone();
      tokio::spawn(async move {
        if let Err(e) = handle.fetch(Resource::get(url, Destination::Image)).await {
          debug!("Portrait prefetch failed: {}", e);
        }
      });
    }
  }

  fn apply_update(&mut self) {
    if self.prompt.confirm() {
      if let Some(handle) = &self.gateway {
        handle.skip_waiting();
        self.status = Some("Applying update...".to_string());
      }
    }
  }

  // Accessors for UI rendering
  pub fn legends(&self) -> &[Legend] {
    &self.legends
  }

  pub fn squad(&self) -> &[Legend] {
    &self.squad
  }

  pub fn is_excluded(&self, name: &str) -> bool {
    self.excluded.contains(name)
  }

  pub fn excluded_count(&self) -> usize {
    self.excluded.len()
  }

  pub fn squad_size(&self) -> usize {
    self.squad_size
  }

  pub fn settings_cursor(&self) -> usize {
    self.settings_cursor
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }

  pub fn status(&self) -> Option<&str> {
    self.status.as_deref()
  }

  pub fn syncing(&self) -> bool {
    self.syncing
  }

  pub fn source(&self) -> DataSourceState {
    self.source
  }

  pub fn title(&self) -> String {
    self.config.title()
  }

  pub fn offline(&self) -> bool {
    self.offline
  }

  pub fn update_pending(&self) -> bool {
    self.prompt.update_pending()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_eligible_legends_filters_exclusions() {
    let legends = default_legends();
    let mut excluded = BTreeSet::new();
    excluded.insert("Wraith".to_string());
    excluded.insert("Pathfinder".to_string());

    let pool = eligible_legends(&legends, &excluded);
    assert_eq!(pool.len(), legends.len() - 2);
    assert!(pool.iter().all(|l| l.name != "Wraith" && l.name != "Pathfinder"));
  }

  #[test]
  fn test_eligible_legends_ignores_stale_exclusions() {
    let legends = default_legends();
    let mut excluded = BTreeSet::new();
    excluded.insert("Nobody".to_string());

    let pool = eligible_legends(&legends, &excluded);
    assert_eq!(pool.len(), legends.len());
  }
}
