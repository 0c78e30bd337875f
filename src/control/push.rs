//! Push payload shaping and notification click routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NotificationConfig;

/// One tappable action on a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  pub icon: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationData {
  #[serde(rename = "dateOfArrival")]
  pub date_of_arrival: DateTime<Utc>,
  #[serde(rename = "primaryKey")]
  pub primary_key: u32,
}

/// The full notification shape shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  fn defaults(config: &NotificationConfig) -> Self {
    Self {
      title: config.title.clone(),
      body: config.body.clone(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: vec![100, 50, 100],
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key: 1,
      },
      actions: vec![
        NotificationAction {
          action: "explore".to_string(),
          title: "View site".to_string(),
          icon: config.icon.clone(),
        },
        NotificationAction {
          action: "close".to_string(),
          title: "Close".to_string(),
          icon: config.icon.clone(),
        },
      ],
    }
  }

  fn apply(&mut self, patch: NotificationPatch) {
    if let Some(title) = patch.title {
      self.title = title;
    }
    if let Some(body) = patch.body {
      self.body = body;
    }
    if let Some(icon) = patch.icon {
      self.icon = icon;
    }
    if let Some(badge) = patch.badge {
      self.badge = badge;
    }
    if let Some(vibrate) = patch.vibrate {
      self.vibrate = vibrate;
    }
    if let Some(actions) = patch.actions {
      self.actions = actions;
    }
  }
}

/// Fields a push payload may override.
#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
  title: Option<String>,
  body: Option<String>,
  icon: Option<String>,
  badge: Option<String>,
  vibrate: Option<Vec<u32>>,
  actions: Option<Vec<NotificationAction>>,
}

/// Merge a push payload into the default notification shape.
///
/// A JSON object overlays the defaults field by field; anything that does
/// not parse becomes the body verbatim.
pub fn shape(config: &NotificationConfig, payload: Option<&[u8]>) -> Notification {
  let mut notification = Notification::defaults(config);

  if let Some(payload) = payload {
    match serde_json::from_slice::<NotificationPatch>(payload) {
      Ok(patch) => notification.apply(patch),
      Err(_) => notification.body = String::from_utf8_lossy(payload).into_owned(),
    }
  }

  notification
}

/// Path opened when a notification is clicked.
///
/// The explore action and the default action both route to the site root;
/// close opens nothing.
pub fn click_target(action: Option<&str>) -> Option<&'static str> {
  match action {
    Some("close") => None,
    _ => Some("/"),
  }
}
