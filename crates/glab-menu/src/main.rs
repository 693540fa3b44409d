use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use glab_menu_types::{AppCache, AppConfig, CachedProject};
use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

const NOTIFY_APP_NAME: &str = "glab-menu";
const PRIVATE_TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const PROJECTS_PER_PAGE: u32 = 100;
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "glab-menu", version, about = "Fuzzy launcher for the projects of a GitLab group")]
struct Cli {
    /// Override the config file location.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Override the cache file location.
    #[arg(long, value_name = "PATH")]
    cache: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print every cached project path, one per line.
    List,
    /// Open a project page in the browser.
    Open {
        #[arg(value_name = "PATH_WITH_NAMESPACE")]
        path: String,
    },
    /// Re-fetch the project listing even if the cache is still fresh.
    Refresh,
}

#[derive(Debug)]
struct AppPaths {
    config_file: PathBuf,
    cache_file: PathBuf,
}

impl AppPaths {
    fn new(config_file: Option<PathBuf>, cache_file: Option<PathBuf>) -> Self {
        Self {
            config_file: config_file.unwrap_or_else(glab_menu_types::default_config_path),
            cache_file: cache_file.unwrap_or_else(glab_menu_types::default_cache_path),
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let paths = AppPaths::new(cli.config, cli.cache);

    match cli.command {
        Some(Commands::List) => cmd_list(&paths),
        Some(Commands::Open { path }) => cmd_open(&paths, &path),
        Some(Commands::Refresh) => cmd_refresh(&paths),
        None => cmd_menu(&paths),
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("GLAB_MENU_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "warn".to_string()),
        )
        .with_writer(io::stderr)
        .try_init();
}

fn cmd_menu(paths: &AppPaths) -> Result<()> {
    let config = load_config(paths)?;
    let cache = load_cache(paths)?;

    if cache.is_stale() {
        refresh_cache(&config, paths)?;
        // The user re-invokes once the refresh is done; selection never
        // chains onto a refresh in the same run.
        return Ok(());
    }

    match pick_project(&config.picker, &cache.sorted_paths())? {
        Some(choice) => {
            open_url(&project_url(&config.host, &choice));
            Ok(())
        }
        None => {
            info!("selection cancelled");
            Ok(())
        }
    }
}

fn cmd_list(paths: &AppPaths) -> Result<()> {
    let cache = load_cache(paths)?;
    print!("{}", render_project_list(&cache));
    io::stdout().flush().context("failed to flush project list")?;
    Ok(())
}

fn cmd_open(paths: &AppPaths, path_with_namespace: &str) -> Result<()> {
    let config = load_config(paths)?;
    open_url(&project_url(&config.host, path_with_namespace));
    Ok(())
}

fn cmd_refresh(paths: &AppPaths) -> Result<()> {
    let config = load_config(paths)?;
    refresh_cache(&config, paths)?;
    Ok(())
}

fn load_config(paths: &AppPaths) -> Result<AppConfig> {
    if let Some(parent) = paths.config_file.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create config directory: {}", parent.display())
        })?;
    }
    if !paths.config_file.exists() {
        bail!("config file {} does not exist", paths.config_file.display());
    }

    let raw = fs::read_to_string(&paths.config_file)
        .with_context(|| format!("failed to read config file: {}", paths.config_file.display()))?;
    let config: AppConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file: {}", paths.config_file.display()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<()> {
    if config.token.trim().is_empty() {
        bail!("config field 'token' must not be empty");
    }
    if config.host.trim().is_empty() {
        bail!("config field 'host' must not be empty");
    }
    if config.org.trim().is_empty() {
        bail!("config field 'org' must not be empty");
    }
    if config.picker.trim().is_empty() {
        bail!("config field 'picker' must not be empty");
    }
    Ok(())
}

fn load_cache(paths: &AppPaths) -> Result<AppCache> {
    if let Some(parent) = paths.cache_file.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create cache directory: {}", parent.display())
        })?;
    }
    if !paths.cache_file.exists() {
        return Ok(AppCache::empty());
    }

    let raw = fs::read_to_string(&paths.cache_file)
        .with_context(|| format!("failed to read cache file: {}", paths.cache_file.display()))?;
    // A cache that no longer parses is an error, not an empty listing; the
    // user decides whether to delete the file.
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse cache file: {}", paths.cache_file.display()))
}

fn save_cache(paths: &AppPaths, cache: &AppCache) -> Result<()> {
    let data = serde_yaml::to_string(cache).context("failed to serialize project cache")?;
    atomic_write_file(&paths.cache_file, data.as_bytes())
}

fn atomic_write_file(target: &Path, data: &[u8]) -> Result<()> {
    let parent = target
        .parent()
        .with_context(|| format!("cannot determine parent directory for {}", target.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    let tmp_path = target.with_extension("tmp");
    fs::write(&tmp_path, data)
        .with_context(|| format!("failed to write temporary file: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, target).with_context(|| {
        format!(
            "failed to rename {} to {}",
            tmp_path.display(),
            target.display()
        )
    })?;
    Ok(())
}

fn refresh_cache(config: &AppConfig, paths: &AppPaths) -> Result<AppCache> {
    notify(
        "Updating cache",
        "GitLab project cache is stale, updating now",
    );

    let client = GitlabClient::new(&config.host, &config.token)?;
    client.authenticate()?;
    let group = client.resolve_group(&config.org)?;
    info!("resolved group {} (id {})", group.full_path, group.id);
    let remote = client.group_projects(group.id)?;
    info!("fetched {} projects for {}", remote.len(), config.org);

    let cache = AppCache {
        projects: remote.into_iter().map(CachedProject::from).collect(),
        last_updated: Utc::now(),
    };
    save_cache(paths, &cache)?;

    notify("Cache updated", "GitLab project cache updated, ready to go");
    Ok(cache)
}

fn render_project_list(cache: &AppCache) -> String {
    let mut output = String::new();
    for path in cache.sorted_paths() {
        output.push_str(&path);
        output.push('\n');
    }
    output
}

fn project_url(host: &str, path_with_namespace: &str) -> String {
    format!("{}/{}", host.trim_end_matches('/'), path_with_namespace)
}

// Feeds the newline-delimited project list to the picker command on stdin and
// reads back the single chosen line. An empty choice means the user cancelled.
fn pick_project(picker_command: &str, entries: &[String]) -> Result<Option<String>> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(picker_command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn picker: {picker_command}"))?;

    {
        let mut stdin = child.stdin.take().context("picker stdin unavailable")?;
        for entry in entries {
            if writeln!(stdin, "{entry}").is_err() {
                // Picker exited before draining the list.
                break;
            }
        }
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to read picker output: {picker_command}"))?;
    if !output.status.success() {
        bail!("picker exited with {}", output.status);
    }

    let chosen = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if chosen.is_empty() {
        Ok(None)
    } else {
        Ok(Some(chosen))
    }
}

fn open_url(url: &str) {
    #[cfg(target_os = "macos")]
    let cmd = "open";
    #[cfg(not(target_os = "macos"))]
    let cmd = "xdg-open";

    let _ = Command::new(cmd)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
}

fn notify(title: &str, message: &str) {
    println!("{title}: {message}");

    match Command::new("notify-send")
        .args(["-a", NOTIFY_APP_NAME, title, message])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) if !status.success() => debug!("notify-send exited with {status}"),
        Ok(_) => {}
        Err(err) => warn!("notify-send unavailable: {err}"),
    }
}

struct GitlabClient {
    http: reqwest::blocking::Client,
    base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RemoteGroup {
    id: u64,
    full_path: String,
}

#[derive(Debug, Deserialize)]
struct RemoteProject {
    id: u64,
    path_with_namespace: String,
    name: String,
    description: Option<String>,
}

impl From<RemoteProject> for CachedProject {
    fn from(project: RemoteProject) -> Self {
        Self {
            id: project.id,
            path_with_namespace: project.path_with_namespace,
            name: project.name,
            description: project.description,
        }
    }
}

impl GitlabClient {
    fn new(host: &str, token: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base: host.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn authenticate(&self) -> Result<()> {
        let url = format!("{}/api/v4/user", self.base);
        let response = self
            .http
            .get(&url)
            .header(PRIVATE_TOKEN_HEADER, &self.token)
            .send()
            .with_context(|| format!("failed to reach {}", self.base))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            bail!("GitLab rejected the configured token for {}", self.base);
        }
        if !response.status().is_success() {
            bail!(
                "GitLab returned {} during authentication",
                response.status()
            );
        }
        Ok(())
    }

    fn resolve_group(&self, org: &str) -> Result<RemoteGroup> {
        let url = format!("{}/api/v4/groups/{}", self.base, encode_group_path(org));
        let response = self
            .http
            .get(&url)
            .header(PRIVATE_TOKEN_HEADER, &self.token)
            .query(&[("with_projects", "false")])
            .send()
            .with_context(|| format!("failed to reach {}", self.base))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            bail!("GitLab group '{org}' not found on {}", self.base);
        }
        if !response.status().is_success() {
            bail!(
                "GitLab returned {} while resolving group '{org}'",
                response.status()
            );
        }
        response
            .json()
            .with_context(|| format!("failed to parse group '{org}'"))
    }

    // Drains every page of the group project listing; the result set is
    // unbounded and a single page is never assumed to be complete.
    fn group_projects(&self, group_id: u64) -> Result<Vec<RemoteProject>> {
        let url = format!("{}/api/v4/groups/{}/projects", self.base, group_id);
        let mut projects = Vec::new();
        let mut page: u32 = 1;

        loop {
            let response = self
                .http
                .get(&url)
                .header(PRIVATE_TOKEN_HEADER, &self.token)
                .query(&[
                    ("per_page", PROJECTS_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .with_context(|| {
                    format!("failed to list projects for group {group_id} (page {page})")
                })?;

            if !response.status().is_success() {
                bail!(
                    "GitLab returned {} while listing projects for group {}",
                    response.status(),
                    group_id
                );
            }

            let next_page = response
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u32>().ok());

            let batch: Vec<RemoteProject> = response
                .json()
                .with_context(|| format!("failed to parse project listing page {page}"))?;
            debug!("fetched {} projects on page {page}", batch.len());
            projects.extend(batch);

            match next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(projects)
    }
}

// The groups endpoint takes a URL-encoded full path; only '/' needs escaping
// in valid GitLab namespace paths.
fn encode_group_path(org: &str) -> String {
    org.replace('/', "%2F")
}
