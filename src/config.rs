use crate::{
    error::MemtreeError,
    properties::{NodeId, ViewScope},
};
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

/// Tunables for [crate::engine::TreeEngine]. Every field has a default, so a partial TOML
/// table is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Leftward drag displacement past which a drop detaches the dragged items to root.
    pub drag_detach_threshold: f64,
    pub focus_retry_attempts: u32,
    pub focus_retry_interval_ms: u64,
    pub highlight_ms: u64,
    pub new_child_name: String,
    pub new_list_name: String,
    pub search_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            drag_detach_threshold: 100.0,
            focus_retry_attempts: 10,
            focus_retry_interval_ms: 50,
            highlight_ms: 1500,
            new_child_name: "New Child Item".to_string(),
            new_list_name: "New Memory List".to_string(),
            search_limit: 50,
        }
    }
}

/// Persisted view state. `expanded` is kept in expansion order so a restore can replay it
/// ancestors first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewSnapshot {
    pub scope: ViewScope,
    pub expanded: Vec<NodeId>,
    pub selected: Vec<NodeId>,
    pub active: Option<NodeId>,
}

pub trait ConfigProvider: Send + Sync {
    fn get_engine_config(&self) -> Result<EngineConfig, MemtreeError>;
    fn get_view(&self) -> Result<ViewSnapshot, MemtreeError>;
    fn set_view(&self, view: ViewSnapshot) -> Result<(), MemtreeError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    view: ViewSnapshot,
}

/// A [ConfigProvider] over one TOML file with `[engine]` and `[view]` tables. A missing file
/// reads as defaults.
#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }

    fn read(&self) -> Result<ConfigFile, MemtreeError> {
        if !self.path.exists() {
            tracing::debug!(
                "[TomlConfigProvider.read] {:?} not found, using defaults",
                &self.path
            );
            return Ok(ConfigFile::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_engine_config(&self) -> Result<EngineConfig, MemtreeError> {
        Ok(self.read()?.engine)
    }

    fn get_view(&self) -> Result<ViewSnapshot, MemtreeError> {
        Ok(self.read()?.view)
    }

    fn set_view(&self, view: ViewSnapshot) -> Result<(), MemtreeError> {
        tracing::debug!("[TomlConfigProvider.set_view] writing view to {:?}", &self.path);
        let mut config = self.read()?;
        config.view = view;
        let toml_string = toml::to_string(&config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_engine_table_fills_defaults() {
        let file: ConfigFile = toml::from_str("[engine]\nsearch_limit = 7\n").unwrap();
        assert_eq!(file.engine.search_limit, 7);
        assert_eq!(file.engine.drag_detach_threshold, 100.0);
        assert_eq!(file.engine.new_child_name, "New Child Item");
        assert_eq!(file.view, ViewSnapshot::default());
    }

    #[test]
    fn view_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("memtree.toml"));
        assert_eq!(provider.get_view().unwrap(), ViewSnapshot::default());

        let view = ViewSnapshot {
            scope: ViewScope::Subtree(NodeId(4)),
            expanded: vec![NodeId(4), NodeId(9)],
            selected: vec![NodeId(9)],
            active: Some(NodeId(9)),
        };
        provider.set_view(view.clone()).unwrap();
        assert_eq!(provider.get_view().unwrap(), view);
        assert_eq!(provider.get_engine_config().unwrap(), EngineConfig::default());
    }

    #[test]
    fn malformed_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memtree.toml");
        write(&path, "[engine\nsearch_limit = ").unwrap();
        let provider = TomlConfigProvider::new(path);
        let err = provider.get_engine_config().unwrap_err();
        assert!(matches!(err, MemtreeError::Serialization(_)), "{err:?}");
        assert!(!err.is_transient());
    }
}
