//! Deferred-write replay queue.
//!
//! Write requests that never reached the network are parked here and
//! replayed in arrival order when connectivity returns. Entries that sit in
//! the queue past the retention window are dropped unreplayed.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::resource::{FetchedResponse, Method, Resource};
use super::storage::{parse_datetime, SqliteCacheStore};

/// Outcome of one replay pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayReport {
  pub replayed: usize,
  pub dropped: usize,
  pub remaining: usize,
}

struct QueuedMutation {
  id: i64,
  resource: Resource,
  expired: bool,
}

/// A named FIFO of pending write requests with a bounded retention window.
#[derive(Clone)]
pub struct WriteQueue {
  name: String,
  retention: Duration,
  store: Arc<SqliteCacheStore>,
}

impl WriteQueue {
  pub fn new(name: &str, retention: Duration, store: Arc<SqliteCacheStore>) -> Self {
    Self {
      name: name.to_string(),
      retention,
      store,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Park a failed write for later replay.
  pub fn enqueue(&self, resource: &Resource) -> Result<()> {
    self.store.with_conn(|conn| {
      conn
        .execute(
          "INSERT INTO write_queue (queue_name, url, method, body, enqueued_at)
           VALUES (?, ?, ?, ?, ?)",
          params![
            self.name,
            resource.url.as_str(),
            resource.method.as_str(),
            resource.body,
            Utc::now().to_rfc3339(),
          ],
        )
        .map_err(|e| eyre!("Failed to enqueue write: {}", e))?;
      Ok(())
    })
  }

  pub fn len(&self) -> Result<usize> {
    self.store.with_conn(|conn| {
      let count: i64 = conn
        .query_row(
          "SELECT COUNT(*) FROM write_queue WHERE queue_name = ?",
          params![self.name],
          |row| row.get(0),
        )
        .map_err(|e| eyre!("Failed to count queue: {}", e))?;
      Ok(count as usize)
    })
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  fn load(&self) -> Result<Vec<QueuedMutation>> {
    let rows: Vec<(i64, String, String, Option<Vec<u8>>, String)> =
      self.store.with_conn(|conn| {
        let mut stmt = conn
          .prepare(
            "SELECT id, url, method, body, enqueued_at FROM write_queue
             WHERE queue_name = ? ORDER BY id",
          )
          .map_err(|e| eyre!("Failed to prepare queue read: {}", e))?;

        let rows = stmt
          .query_map(params![self.name], |row| {
            Ok((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
            ))
          })
          .map_err(|e| eyre!("Failed to read queue: {}", e))?
          .filter_map(|r| r.ok())
          .collect();

        Ok(rows)
      })?;

    let cutoff = Utc::now()
      - chrono::Duration::from_std(self.retention)
        .map_err(|e| eyre!("Retention out of range: {}", e))?;

    let mut entries = Vec::new();
    for (id, url, method, body, enqueued_at) in rows {
      let Ok(url) = Url::parse(&url) else {
        warn!("Dropping queued write with unparseable url: {}", url);
        self.remove(id)?;
        continue;
      };
      let method = match method.as_str() {
        "POST" => Method::Post,
        _ => Method::Get,
      };
      let expired = parse_datetime(&enqueued_at)
        .map(|at| at < cutoff)
        .unwrap_or(true);

      entries.push(QueuedMutation {
        id,
        resource: Resource {
          url,
          method,
          destination: super::resource::Destination::Other,
          body,
        },
        expired,
      });
    }

    Ok(entries)
  }

  fn remove(&self, id: i64) -> Result<()> {
    self.store.with_conn(|conn| {
      conn
        .execute("DELETE FROM write_queue WHERE id = ?", params![id])
        .map_err(|e| eyre!("Failed to remove queue entry: {}", e))?;
      Ok(())
    })
  }

  /// Replay queued writes in FIFO order. Expired entries are dropped
  /// silently; the first failed replay stops the pass and leaves the rest
  /// queued for the next connectivity event.
  pub async fn replay<F, Fut>(&self, fetch: F) -> Result<ReplayReport>
  where
    F: Fn(Resource) -> Fut,
    Fut: Future<Output = Result<FetchedResponse>>,
  {
    let entries = self.load()?;
    let mut report = ReplayReport::default();

    for entry in entries {
      if entry.expired {
        self.remove(entry.id)?;
        report.dropped += 1;
        continue;
      }

      match fetch(entry.resource.clone()).await {
        Ok(_) => {
          self.remove(entry.id)?;
          report.replayed += 1;
        }
        Err(e) => {
          warn!(url = %entry.resource.url, "Replay failed, stopping pass: {}", e);
          break;
        }
      }
    }

    report.remaining = self.len()?;
    if report.replayed > 0 || report.dropped > 0 {
      info!(
        queue = %self.name,
        replayed = report.replayed,
        dropped = report.dropped,
        remaining = report.remaining,
        "Write queue replay pass finished"
      );
    }
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  fn queue(retention: Duration) -> WriteQueue {
    let store = Arc::new(SqliteCacheStore::open_in_memory().unwrap());
    WriteQueue::new("post-queue", retention, store)
  }

  fn submit(body: &str) -> Resource {
    Resource::post(
      Url::parse("https://litenkod.se/api/submit").unwrap(),
      body.as_bytes().to_vec(),
    )
  }

  fn ok_response() -> FetchedResponse {
    FetchedResponse::new(200, None, Vec::new())
  }

  #[tokio::test]
  async fn test_replay_is_fifo() {
    let queue = queue(Duration::from_secs(3600));
    queue.enqueue(&submit("first")).unwrap();
    queue.enqueue(&submit("second")).unwrap();
    queue.enqueue(&submit("third")).unwrap();

    let seen = Mutex::new(Vec::new());
    let report = queue
      .replay(|r| {
        seen.lock().unwrap().push(r.body.unwrap());
        async { Ok(ok_response()) }
      })
      .await
      .unwrap();

    assert_eq!(report.replayed, 3);
    assert_eq!(report.remaining, 0);
    assert_eq!(
      *seen.lock().unwrap(),
      vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]
    );
  }

  #[tokio::test]
  async fn test_expired_entries_dropped_unreplayed() {
    let queue = queue(Duration::from_secs(0));
    queue.enqueue(&submit("too old")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(10));

    let report = queue
      .replay(|_| async { panic!("expired entries must not be replayed") })
      .await
      .unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.replayed, 0);
    assert!(queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_failed_replay_stops_and_retains_rest() {
    let queue = queue(Duration::from_secs(3600));
    queue.enqueue(&submit("a")).unwrap();
    queue.enqueue(&submit("b")).unwrap();

    let report = queue
      .replay(|_| async { Err(eyre!("still offline")) })
      .await
      .unwrap();

    assert_eq!(report.replayed, 0);
    assert_eq!(report.remaining, 2);
  }

  #[tokio::test]
  async fn test_partial_replay_keeps_unsent_tail() {
    let queue = queue(Duration::from_secs(3600));
    queue.enqueue(&submit("a")).unwrap();
    queue.enqueue(&submit("b")).unwrap();

    let calls = Mutex::new(0usize);
    let report = queue
      .replay(|_| {
        let mut n = calls.lock().unwrap();
        *n += 1;
        let fail = *n > 1;
        async move {
          if fail {
            Err(eyre!("dropped again"))
          } else {
            Ok(ok_response())
          }
        }
      })
      .await
      .unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 1);
  }
}
