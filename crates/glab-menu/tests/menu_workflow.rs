use chrono::{Duration, TimeZone, Utc};
use glab_menu_types::{AppCache, CachedProject};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

struct MenuHarness {
    root_dir: PathBuf,
    config_file: PathBuf,
    cache_file: PathBuf,
}

impl MenuHarness {
    fn new(label: &str) -> Self {
        let root_dir = unique_temp_dir(label);
        fs::create_dir_all(&root_dir).expect("failed to create harness root");
        Self {
            config_file: root_dir.join("config.yaml"),
            cache_file: root_dir.join("cache.yaml"),
            root_dir,
        }
    }

    fn write_config(&self, host: &str, picker: &str) {
        fs::write(
            &self.config_file,
            format!(
                "token: test-token\n\
host: {host}\n\
org: acme\n\
picker: \"{picker}\"\n"
            ),
        )
        .expect("failed to write config file");
    }

    fn write_cache(&self, cache: &AppCache) {
        let data = serde_yaml::to_string(cache).expect("failed to serialize cache fixture");
        fs::write(&self.cache_file, data).expect("failed to write cache file");
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(glab_menu_binary())
            .arg("--config")
            .arg(&self.config_file)
            .arg("--cache")
            .arg(&self.cache_file)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .expect("failed to run glab-menu binary")
    }
}

impl Drop for MenuHarness {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root_dir);
    }
}

fn glab_menu_binary() -> &'static Path {
    Path::new(env!("CARGO_BIN_EXE_glab-menu"))
}

fn unique_temp_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock drift before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("glab-menu-it-{label}-{nanos}"))
}

fn sample_cache(last_updated: chrono::DateTime<Utc>) -> AppCache {
    AppCache {
        projects: vec![
            CachedProject {
                id: 3,
                path_with_namespace: "z/z".to_string(),
                name: "z".to_string(),
                description: None,
            },
            CachedProject {
                id: 1,
                path_with_namespace: "a/b".to_string(),
                name: "b".to_string(),
                description: Some("first project".to_string()),
            },
            CachedProject {
                id: 2,
                path_with_namespace: "a/c".to_string(),
                name: "c".to_string(),
                description: None,
            },
        ],
        last_updated,
    }
}

#[test]
fn list_prints_sorted_cached_paths() {
    let harness = MenuHarness::new("list-sorted");
    harness.write_cache(&sample_cache(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));

    let output = harness.run(&["list"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "a/b\na/c\nz/z\n");
}

#[test]
fn list_with_absent_cache_prints_nothing() {
    let harness = MenuHarness::new("list-absent");
    let cache_file = harness.root_dir.join("nested").join("cache.yaml");

    let output = Command::new(glab_menu_binary())
        .arg("--cache")
        .arg(&cache_file)
        .arg("list")
        .stdin(Stdio::null())
        .output()
        .expect("failed to run glab-menu binary");

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    // The cache directory is created as a side effect of the load.
    assert!(cache_file.parent().unwrap().is_dir());
}

#[test]
fn cancelled_selection_exits_zero_without_refreshing() {
    let harness = MenuHarness::new("menu-cancel");
    harness.write_config("https://gitlab.com", "cat > /dev/null");
    let cache = sample_cache(Utc::now() - Duration::hours(1));
    harness.write_cache(&cache);

    let output = harness.run(&[]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("Updating cache"));
}

#[test]
fn failing_picker_exits_nonzero() {
    let harness = MenuHarness::new("menu-picker-fail");
    harness.write_config("https://gitlab.com", "cat > /dev/null; exit 3");
    harness.write_cache(&sample_cache(Utc::now() - Duration::hours(1)));

    let output = harness.run(&[]);
    assert!(!output.status.success());
}

#[test]
fn stale_cache_triggers_refresh_and_failure_leaves_cache_untouched() {
    let harness = MenuHarness::new("menu-stale-refresh");
    // Nothing listens on this port, so the refresh fails before any write.
    harness.write_config("http://127.0.0.1:9", "cat > /dev/null");
    let cache = sample_cache(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
    harness.write_cache(&cache);
    let before = fs::read_to_string(&harness.cache_file).unwrap();

    let output = harness.run(&[]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Updating cache"));
    assert!(!stdout.contains("Cache updated"));

    let after = fs::read_to_string(&harness.cache_file).unwrap();
    assert_eq!(before, after);
}

#[test]
fn refresh_command_runs_regardless_of_freshness() {
    let harness = MenuHarness::new("forced-refresh");
    harness.write_config("http://127.0.0.1:9", "cat > /dev/null");
    harness.write_cache(&sample_cache(Utc::now()));

    let output = harness.run(&["refresh"]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Updating cache"));
}

#[test]
fn missing_config_fails_the_menu_flow() {
    let harness = MenuHarness::new("menu-no-config");
    harness.write_cache(&sample_cache(Utc::now()));

    let output = harness.run(&[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("does not exist"));
}
