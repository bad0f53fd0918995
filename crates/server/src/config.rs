use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;

#[derive(Debug)]
pub struct Settings {
    pub server_bind: String,
    pub warehouse_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8090".into(),
            warehouse_url: "sqlite://./data/warehouse.db".into(),
        }
    }
}

/// Defaults, overlaid by `server.toml`, overlaid by environment variables.
/// The environment is the secrets channel for the warehouse URL.
pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("bind_addr") {
                settings.server_bind = v.clone();
            }
            if let Some(v) = file_cfg.get("warehouse_url") {
                settings.warehouse_url = v.clone();
            }
        }
    }

    if let Ok(v) = std::env::var("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("APP__BIND_ADDR") {
        settings.server_bind = v;
    }
    if let Ok(v) = std::env::var("WAREHOUSE_URL") {
        settings.warehouse_url = v;
    }
    if let Ok(v) = std::env::var("APP__WAREHOUSE_URL") {
        settings.warehouse_url = v;
    }

    settings
}

pub fn prepare_warehouse_url(raw_url: &str) -> anyhow::Result<String> {
    let warehouse_url = normalize_warehouse_url(raw_url);
    ensure_parent_dir_exists(&warehouse_url)?;
    Ok(warehouse_url)
}

fn normalize_warehouse_url(raw_url: &str) -> String {
    let raw_url = raw_url.trim();

    if raw_url.is_empty() {
        return Settings::default().warehouse_url;
    }

    if raw_url.starts_with("sqlite::memory:") || raw_url.contains("://") {
        return raw_url.to_string();
    }

    if let Some(path) = raw_url.strip_prefix("sqlite:") {
        return format!("sqlite://{path}");
    }

    format!("sqlite://{raw_url}")
}

fn ensure_parent_dir_exists(warehouse_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(warehouse_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for warehouse url '{warehouse_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(warehouse_url: &str) -> Option<PathBuf> {
    if warehouse_url == "sqlite::memory:" || !warehouse_url.starts_with("sqlite:") {
        return None;
    }

    let path = warehouse_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}
