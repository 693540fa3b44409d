use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const CACHE_FILE_NAME: &str = "cache.yaml";

// Cached listings older than this trigger a full remote refresh.
pub const STALE_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub token: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub org: String,
    #[serde(default = "default_picker")]
    pub picker: String,
}

fn default_host() -> String {
    "https://gitlab.com".to_string()
}

fn default_picker() -> String {
    "wofi --show dmenu --prompt 'GitLab Projects' --lines 10".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProject {
    pub id: u64,
    pub path_with_namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppCache {
    pub projects: Vec<CachedProject>,
    pub last_updated: DateTime<Utc>,
}

impl AppCache {
    // Sentinel timestamp guarantees a never-refreshed cache is always stale.
    pub fn empty() -> Self {
        Self {
            projects: Vec::new(),
            last_updated: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_updated) > Duration::days(STALE_AFTER_DAYS)
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    pub fn sorted_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .projects
            .iter()
            .map(|project| project.path_with_namespace.clone())
            .collect();
        paths.sort();
        paths
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("glab-menu");
    }

    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home).join(".config").join("glab-menu");
    }

    PathBuf::from(".config/glab-menu")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}

pub fn default_cache_dir() -> PathBuf {
    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("glab-menu");
    }

    if let Ok(home) = env::var("HOME") {
        return PathBuf::from(home).join(".cache").join("glab-menu");
    }

    PathBuf::from(".cache/glab-menu")
}

pub fn default_cache_path() -> PathBuf {
    default_cache_dir().join(CACHE_FILE_NAME)
}
