//! Utility functions for the application

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

/// Get the user's home directory reliably
fn get_home_dir() -> Option<PathBuf> {
  // Try HOME env var first
  if let Ok(home) = std::env::var("HOME")
    && !home.is_empty()
  {
    return Some(PathBuf::from(home));
  }

  dirs::home_dir()
}

/// Conventional kubeconfig location, `~/.kube/config`
pub fn default_kubeconfig_path() -> Option<PathBuf> {
  get_home_dir().map(|home| home.join(".kube").join("config"))
}

/// Pick the kubeconfig to load.
///
/// An explicit value may be a `KUBECONFIG`-style path list; its first entry wins.
/// Without one, the conventional per-user location is used.
pub fn resolve_kubeconfig(explicit: Option<&Path>) -> Option<PathBuf> {
  if let Some(explicit) = explicit
    && let Some(first) = std::env::split_paths(explicit).find(|p| !p.as_os_str().is_empty())
  {
    return Some(first);
  }

  default_kubeconfig_path()
}

/// Deployment name for a run, unique to the second: `<prefix>-MMDD-HHMMSS`
pub fn workload_name<Tz>(prefix: &str, now: &DateTime<Tz>) -> String
where
  Tz: TimeZone,
  Tz::Offset: std::fmt::Display,
{
  format!("{prefix}-{}", now.format("%m%d-%H%M%S"))
}
