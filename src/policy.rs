//! Request routing policy: destinations, strategies, and versioned store names.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use url::Url;

use crate::config::Config;

/// Resource kind of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
  Document,
  Style,
  Script,
  Image,
  Font,
  Other,
}

impl Destination {
  /// Classify a request from its path and `Accept` header.
  ///
  /// Navigations advertise `text/html`; everything else is classified by
  /// extension. Extensionless paths are treated as navigations.
  pub fn classify(path: &str, accept: Option<&str>) -> Self {
    if accept.is_some_and(|a| a.contains("text/html")) {
      return Destination::Document;
    }

    let path = path.split(['?', '#']).next().unwrap_or(path);
    if path.ends_with('/') {
      return Destination::Document;
    }

    let last = path.rsplit('/').next().unwrap_or(path);
    let ext = match last.rsplit_once('.') {
      Some((_, ext)) => ext.to_ascii_lowercase(),
      None => return Destination::Document,
    };

    match ext.as_str() {
      "html" | "htm" => Destination::Document,
      "css" => Destination::Style,
      "js" | "mjs" => Destination::Script,
      "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" => Destination::Image,
      "woff" | "woff2" | "ttf" | "otf" | "eot" => Destination::Font,
      _ => Destination::Other,
    }
  }
}

/// Resolution order for a request: cache or network consulted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
}

/// Logical cache store a response is written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
  Static,
  Dynamic,
  Runtime,
}

/// Strategy and target store for one destination.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Route {
  pub strategy: Strategy,
  pub store: StoreKind,
}

/// Per-destination routing table.
///
/// One field per destination keeps the mapping exhaustive: adding a
/// destination without a route fails to compile.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouteTable {
  pub document: Route,
  pub style: Route,
  pub script: Route,
  pub image: Route,
  pub font: Route,
  pub other: Route,
}

impl Default for RouteTable {
  fn default() -> Self {
    let cached_static = Route {
      strategy: Strategy::CacheFirst,
      store: StoreKind::Static,
    };
    Self {
      document: Route {
        strategy: Strategy::NetworkFirst,
        store: StoreKind::Static,
      },
      style: cached_static,
      script: cached_static,
      image: cached_static,
      font: cached_static,
      other: Route {
        strategy: Strategy::NetworkFirst,
        store: StoreKind::Dynamic,
      },
    }
  }
}

impl RouteTable {
  pub fn route(&self, destination: Destination) -> Route {
    match destination {
      Destination::Document => self.document,
      Destination::Style => self.style,
      Destination::Script => self.script,
      Destination::Image => self.image,
      Destination::Font => self.font,
      Destination::Other => self.other,
    }
  }
}

/// Store names derived from the version tag.
///
/// The tag is embedded in every name; bumping it strands every prior store,
/// which activation then deletes.
#[derive(Debug, Clone)]
pub struct StoreNames {
  version: String,
}

impl StoreNames {
  pub fn new(version: &str) -> Self {
    Self {
      version: version.to_string(),
    }
  }

  pub fn static_store(&self) -> String {
    format!("{}-static", self.version)
  }

  pub fn dynamic_store(&self) -> String {
    format!("{}-dynamic", self.version)
  }

  pub fn runtime_store(&self) -> String {
    format!("{}-runtime", self.version)
  }

  pub fn for_kind(&self, kind: StoreKind) -> String {
    match kind {
      StoreKind::Static => self.static_store(),
      StoreKind::Dynamic => self.dynamic_store(),
      StoreKind::Runtime => self.runtime_store(),
    }
  }

  /// Whether a store name belongs to the current version.
  pub fn is_current(&self, name: &str) -> bool {
    name.contains(&self.version)
  }
}

/// An intercepted GET request.
#[derive(Debug, Clone)]
pub struct StashRequest {
  pub url: String,
  pub destination: Destination,
}

/// Everything the cache manager needs to make decisions, fixed at
/// construction: version tag, origin, file lists, and the routing table.
#[derive(Debug, Clone)]
pub struct CachePolicy {
  pub version: String,
  pub origin: Url,
  pub core_files: Vec<String>,
  pub static_assets: Vec<String>,
  pub offline_path: String,
  pub routes: RouteTable,
}

impl CachePolicy {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.site.url)
      .map_err(|e| eyre!("Invalid site origin {}: {}", config.site.url, e))?;

    Ok(Self {
      version: config.cache.version.clone(),
      origin,
      core_files: config.cache.core_files.clone(),
      static_assets: config.cache.static_assets.clone(),
      offline_path: config.cache.offline_path.clone(),
      routes: config.cache.routes.clone(),
    })
  }

  pub fn stores(&self) -> StoreNames {
    StoreNames::new(&self.version)
  }

  /// Resolve a site-relative path to an absolute URL. Entries that are
  /// already absolute (cross-origin core files) pass through unchanged.
  pub fn resolve(&self, target: &str) -> Result<String> {
    match Url::parse(target) {
      Ok(absolute) => Ok(absolute.to_string()),
      Err(_) => Ok(
        self
          .origin
          .join(target)
          .map_err(|e| eyre!("Cannot resolve {} against {}: {}", target, self.origin, e))?
          .to_string(),
      ),
    }
  }

  pub fn offline_url(&self) -> Result<String> {
    self.resolve(&self.offline_path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_by_extension() {
    assert_eq!(Destination::classify("/styles.css", None), Destination::Style);
    assert_eq!(Destination::classify("/script.js", None), Destination::Script);
    assert_eq!(
      Destination::classify("/icons/icon-192x192.png", None),
      Destination::Image
    );
    assert_eq!(
      Destination::classify("/webfonts/fa-solid-900.woff2", None),
      Destination::Font
    );
    assert_eq!(Destination::classify("/api/data.json", None), Destination::Other);
  }

  #[test]
  fn test_classify_navigations() {
    assert_eq!(Destination::classify("/", None), Destination::Document);
    assert_eq!(Destination::classify("/index.html", None), Destination::Document);
    assert_eq!(Destination::classify("/about", None), Destination::Document);
    assert_eq!(
      Destination::classify("/anything.bin", Some("text/html,application/xhtml+xml")),
      Destination::Document
    );
  }

  #[test]
  fn test_classify_ignores_query_and_fragment() {
    assert_eq!(
      Destination::classify("/styles.css?v=3", None),
      Destination::Style
    );
    assert_eq!(
      Destination::classify("/img/logo.svg#icon", None),
      Destination::Image
    );
  }

  #[test]
  fn test_default_routes() {
    let table = RouteTable::default();

    let doc = table.route(Destination::Document);
    assert_eq!(doc.strategy, Strategy::NetworkFirst);
    assert_eq!(doc.store, StoreKind::Static);

    for dest in [Destination::Style, Destination::Script, Destination::Image, Destination::Font] {
      let route = table.route(dest);
      assert_eq!(route.strategy, Strategy::CacheFirst);
      assert_eq!(route.store, StoreKind::Static);
    }

    let other = table.route(Destination::Other);
    assert_eq!(other.strategy, Strategy::NetworkFirst);
    assert_eq!(other.store, StoreKind::Dynamic);
  }

  #[test]
  fn test_store_names_carry_version() {
    let names = StoreNames::new("site-v1.1.0");
    assert_eq!(names.static_store(), "site-v1.1.0-static");
    assert_eq!(names.dynamic_store(), "site-v1.1.0-dynamic");
    assert_eq!(names.runtime_store(), "site-v1.1.0-runtime");

    assert!(names.is_current("site-v1.1.0-static"));
    assert!(!names.is_current("site-v1.0.0-static"));
  }

  fn test_policy() -> CachePolicy {
    CachePolicy {
      version: "site-v1".to_string(),
      origin: Url::parse("https://example.com").unwrap(),
      core_files: vec!["/".to_string()],
      static_assets: Vec::new(),
      offline_path: "/offline.html".to_string(),
      routes: RouteTable::default(),
    }
  }

  #[test]
  fn test_resolve_relative_and_absolute() {
    let policy = test_policy();
    assert_eq!(
      policy.resolve("/index.html").unwrap(),
      "https://example.com/index.html"
    );
    assert_eq!(
      policy.resolve("https://cdn.example.net/all.min.css").unwrap(),
      "https://cdn.example.net/all.min.css"
    );
    assert_eq!(
      policy.offline_url().unwrap(),
      "https://example.com/offline.html"
    );
  }
}
