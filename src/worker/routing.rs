//! Per-request strategy selection.

use reqwest::Method;
use url::Url;

use crate::cache::Request;

/// Why a request skips the cache entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
  /// Anything but GET
  Method,
  CrossOrigin,
  /// Path matches a never-cache prefix (API, auth, session)
  NeverCache,
}

/// How the worker handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  Bypass(Bypass),
  /// Document navigation: network-first
  Navigation,
  /// Static asset: cache-first with background revalidation
  Asset,
}

pub fn classify(request: &Request, origin: &Url, never_cache: &[String]) -> Route {
  if request.method != Method::GET {
    return Route::Bypass(Bypass::Method);
  }

  if request.url.origin() != origin.origin() {
    return Route::Bypass(Bypass::CrossOrigin);
  }

  let path = request.url.path();
  if never_cache.iter().any(|prefix| under_prefix(path, prefix)) {
    return Route::Bypass(Bypass::NeverCache);
  }

  if request.accepts_html() {
    Route::Navigation
  } else {
    Route::Asset
  }
}

/// Whether `path` is `prefix` itself or lies below it. Matching stops at
/// segment boundaries: `/session` covers `/session/refresh` but not `/sessions`.
fn under_prefix(path: &str, prefix: &str) -> bool {
  let base = prefix.trim_end_matches('/');
  match path.strip_prefix(base) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://notes.example.com").unwrap()
  }

  fn never_cache() -> Vec<String> {
    vec!["/api/".to_string(), "/auth/".to_string(), "/session".to_string()]
  }

  fn classify_url(request: Request) -> Route {
    classify(&request, &origin(), &never_cache())
  }

  #[test]
  fn test_mutating_requests_bypass() {
    let url = origin().join("/notes/1").unwrap();
    assert_eq!(
      classify_url(Request::new(Method::POST, url.clone())),
      Route::Bypass(Bypass::Method)
    );
    assert_eq!(
      classify_url(Request::new(Method::DELETE, url)),
      Route::Bypass(Bypass::Method)
    );
  }

  #[test]
  fn test_cross_origin_bypasses() {
    let url = Url::parse("https://cdn.example.net/lib.js").unwrap();
    assert_eq!(classify_url(Request::get(url)), Route::Bypass(Bypass::CrossOrigin));

    // Same host, different port is a different origin
    let url = Url::parse("https://notes.example.com:8443/app.js").unwrap();
    assert_eq!(classify_url(Request::get(url)), Route::Bypass(Bypass::CrossOrigin));
  }

  #[test]
  fn test_never_cache_prefixes() {
    for path in ["/api/version", "/auth/login", "/session", "/session/refresh"] {
      let url = origin().join(path).unwrap();
      assert_eq!(
        classify_url(Request::navigate(url)),
        Route::Bypass(Bypass::NeverCache),
        "{path}"
      );
    }
  }

  #[test]
  fn test_never_cache_matches_whole_segments() {
    for path in ["/sessions", "/session-notes/4", "/apis/docs", "/authors"] {
      let url = origin().join(path).unwrap();
      assert_eq!(classify_url(Request::navigate(url)), Route::Navigation, "{path}");
    }
    assert!(under_prefix("/api", "/api/"));
    assert!(!under_prefix("/", "/api/"));
  }

  #[test]
  fn test_navigation_vs_asset() {
    let page = origin().join("/notes/new").unwrap();
    assert_eq!(classify_url(Request::navigate(page)), Route::Navigation);

    let asset = origin().join("/static/css/style.css").unwrap();
    assert_eq!(classify_url(Request::get(asset)), Route::Asset);
  }
}
