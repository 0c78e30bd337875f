use serde::Serialize;
use tokio::sync::broadcast;

/// Notices published to connected pages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notice {
  /// Background sync ran to completion.
  BackgroundSync { message: String },
  /// The core file set was refreshed.
  CacheUpdated { refreshed: usize },
}

/// Broadcast hub connecting the cache manager to its subscribers.
///
/// Senders never block; with no subscriber connected a published notice is
/// simply dropped.
#[derive(Debug, Clone)]
pub struct NoticeHub {
  tx: broadcast::Sender<Notice>,
}

impl NoticeHub {
  pub fn new() -> Self {
    let (tx, _rx) = broadcast::channel(16);
    Self { tx }
  }

  pub fn publish(&self, notice: Notice) {
    let _ = self.tx.send(notice);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
    self.tx.subscribe()
  }
}

impl Default for NoticeHub {
  fn default() -> Self {
    Self::new()
  }
}
