use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::editor::DEFAULT_HISTORY_CAPACITY;
use crate::export::{ExportFormat, DEFAULT_OUTPUT_SUBDIR};
use crate::gallery::SelectionPolicy;
use crate::geometry::Axis;
use crate::loader::MAX_DECODE_DIMENSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigPathError {
    #[error("neither XDG_CONFIG_HOME nor HOME is set")]
    MissingHomeDirectory,
}

const APP_DIR: &str = "stitcher";
const APP_CONFIG_FILE: &str = "config.json";

/// Order in which picked images enter the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportOrder {
    /// Selection rank order: first pick is drawn first.
    #[default]
    Selection,
    /// First pick is drawn last.
    Reversed,
}

impl ImportOrder {
    pub fn arrange<T>(self, mut items: Vec<T>) -> Vec<T> {
        if self == Self::Reversed {
            items.reverse();
        }
        items
    }
}

/// Application-level settings from `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub history_capacity: usize,
    pub max_decode_dimension: u32,
    pub export_format: ExportFormat,
    pub axis: Axis,
    pub selection_policy: SelectionPolicy,
    pub import_order: ImportOrder,
    pub output_subdir: String,
    pub delete_sources_after_export: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_decode_dimension: MAX_DECODE_DIMENSION,
            export_format: ExportFormat::default(),
            axis: Axis::default(),
            selection_policy: SelectionPolicy::default(),
            import_order: ImportOrder::default(),
            output_subdir: DEFAULT_OUTPUT_SUBDIR.to_string(),
            delete_sources_after_export: true,
        }
    }
}

pub fn load_app_config() -> AppConfig {
    let (xdg_config_home, home) = config_env_dirs();
    load_app_config_with(xdg_config_home.as_deref(), home.as_deref())
}

fn load_app_config_with(xdg_config_home: Option<&Path>, home: Option<&Path>) -> AppConfig {
    let path = match app_config_path(APP_DIR, APP_CONFIG_FILE, xdg_config_home, home) {
        Ok(p) => p,
        Err(_) => return AppConfig::default(),
    };
    if !path.exists() {
        return AppConfig::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(contents) => parse_app_config(&contents).unwrap_or_else(|err| {
            tracing::warn!(?err, ?path, "failed to parse config.json; using defaults");
            AppConfig::default()
        }),
        Err(err) => {
            tracing::warn!(?err, ?path, "failed to read config.json; using defaults");
            AppConfig::default()
        }
    }
}

fn parse_app_config(contents: &str) -> serde_json::Result<AppConfig> {
    serde_json::from_str(contents)
}

pub(crate) fn config_env_dirs() -> (Option<PathBuf>, Option<PathBuf>) {
    (
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

pub(crate) fn app_config_path(
    app_dir: &str,
    file_name: &str,
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    let mut path = config_root(xdg_config_home, home)?;
    path.push(app_dir);
    path.push(file_name);
    Ok(path)
}

fn config_root(
    xdg_config_home: Option<&Path>,
    home: Option<&Path>,
) -> Result<PathBuf, ConfigPathError> {
    if let Some(xdg) = xdg_config_home.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(xdg.to_path_buf());
    }

    let home = home.ok_or(ConfigPathError::MissingHomeDirectory)?;
    Ok(home.join(".config"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_path_prefers_xdg_config_home() {
        let path = app_config_path(
            "stitcher",
            "config.json",
            Some(Path::new("/tmp/config-root")),
            Some(Path::new("/tmp/home")),
        )
        .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/config-root/stitcher/config.json"));
    }

    #[test]
    fn app_config_path_falls_back_to_home_dot_config() {
        let path = app_config_path("stitcher", "config.json", Some(Path::new("")), Some(Path::new("/tmp/home")))
            .expect("path should resolve");

        assert_eq!(path, PathBuf::from("/tmp/home/.config/stitcher/config.json"));
    }

    #[test]
    fn app_config_path_errors_when_home_missing_and_xdg_unset() {
        let error = app_config_path("stitcher", "config.json", None, None).unwrap_err();
        assert_eq!(error, ConfigPathError::MissingHomeDirectory);
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let config = parse_app_config(
            r#"{ "axis": "horizontal", "export_format": "jpeg", "import_order": "reversed" }"#,
        )
        .expect("config should parse");

        assert_eq!(config.axis, Axis::Horizontal);
        assert_eq!(config.export_format, ExportFormat::Jpeg);
        assert_eq!(config.import_order, ImportOrder::Reversed);
        assert_eq!(config.history_capacity, 20);
        assert_eq!(config.max_decode_dimension, 4096);
        assert_eq!(config.output_subdir, "ImageStitcher");
        assert!(config.delete_sources_after_export);
    }

    #[test]
    fn malformed_config_file_falls_back_to_defaults() {
        let root = std::env::temp_dir().join(format!("stitcher-config-{}", std::process::id()));
        let dir = root.join(APP_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(APP_CONFIG_FILE), "{ not json").unwrap();

        let config = load_app_config_with(Some(&root), None);
        assert_eq!(config, AppConfig::default());

        std::fs::write(dir.join(APP_CONFIG_FILE), r#"{ "selection_policy": "range" }"#).unwrap();
        let config = load_app_config_with(Some(&root), None);
        assert_eq!(config.selection_policy, SelectionPolicy::Range);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let config = load_app_config_with(Some(Path::new("/nonexistent/stitcher-config")), None);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn reversed_import_order_flips_picks() {
        assert_eq!(ImportOrder::Reversed.arrange(vec![1, 2, 3]), [3, 2, 1]);
        assert_eq!(ImportOrder::Selection.arrange(vec![1, 2, 3]), [1, 2, 3]);
    }
}
