//! Engine configuration (`config.toml`).
//!
//! ```toml
//! max_range_cells = 100000
//! max_operations = 500000
//! functions_files = ["finance.rhai"]
//! custom_functions = "fn double(x) { x * 2.0 }"
//! log_filter = "gridcalc_core=debug"
//! ```
//!
//! Relative `functions_files` are resolved against the directory of the
//! config file they were loaded from.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use gridcalc_engine::engine::{DEFAULT_MAX_OPERATIONS, DEFAULT_MAX_RANGE_CELLS};

use crate::error::{CalcError, Result};

const MAX_FUNCTION_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Ranges with more cells than this evaluate to `#REF!`.
    pub max_range_cells: u64,
    /// Rhai operations one formula may run before it evaluates to `#NUM!`.
    /// 0 removes the limit.
    pub max_operations: u64,
    /// Rhai scripts defining user functions.
    pub functions_files: Vec<PathBuf>,
    /// Inline Rhai user functions, appended after the files.
    pub custom_functions: Option<String>,
    /// `tracing` filter directive used by the command-line front end.
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_range_cells: DEFAULT_MAX_RANGE_CELLS,
            max_operations: DEFAULT_MAX_OPERATIONS,
            functions_files: Vec::new(),
            custom_functions: None,
            log_filter: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text).map_err(|source| CalcError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(dir) = path.parent() {
            for file in &mut config.functions_files {
                if file.is_relative() {
                    *file = dir.join(&*file);
                }
            }
        }
        Ok(config)
    }

    /// All user-function source: every functions file in order, then the
    /// inline functions. `None` when there is nothing to compile.
    pub fn functions_script(&self) -> Result<Option<String>> {
        let mut parts = Vec::new();
        for path in &self.functions_files {
            parts.push(read_functions_file(path)?);
        }
        if let Some(inline) = &self.custom_functions {
            parts.push(inline.clone());
        }
        if parts.iter().all(|p| p.trim().is_empty()) {
            return Ok(None);
        }
        Ok(Some(parts.join("\n\n")))
    }
}

fn read_functions_file(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_FUNCTION_FILE_BYTES {
        return Err(CalcError::FunctionsFileTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            max: MAX_FUNCTION_FILE_BYTES,
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        assert_eq!(EngineConfig::from_toml("").unwrap(), EngineConfig::default());
        assert_eq!(EngineConfig::default().max_range_cells, 1_000_000);
        assert_eq!(EngineConfig::default().max_operations, 1_000_000);
    }

    #[test]
    fn test_parse_all_fields() {
        let config = EngineConfig::from_toml(
            r#"
            max_range_cells = 10
            max_operations = 500
            functions_files = ["a.rhai"]
            custom_functions = "fn one() { 1.0 }"
            log_filter = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_range_cells, 10);
        assert_eq!(config.max_operations, 500);
        assert_eq!(config.functions_files, vec![PathBuf::from("a.rhai")]);
        assert_eq!(config.custom_functions.as_deref(), Some("fn one() { 1.0 }"));
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(EngineConfig::from_toml("max_cells = 3").is_err());
    }

    #[test]
    fn test_load_resolves_functions_relative_to_config() {
        let dir = std::env::temp_dir().join(format!("gridcalc-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("extra.rhai"), "fn triple(x) { x * 3.0 }").unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "functions_files = [\"extra.rhai\"]\ncustom_functions = \"fn one() { 1.0 }\"\n",
        )
        .unwrap();

        let config = EngineConfig::load(&dir.join("config.toml")).unwrap();
        assert_eq!(config.functions_files, vec![dir.join("extra.rhai")]);
        let script = config.functions_script().unwrap().unwrap();
        assert!(script.starts_with("fn triple"));
        assert!(script.ends_with("fn one() { 1.0 }"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_invalid_config_names_the_file() {
        let dir = std::env::temp_dir().join(format!("gridcalc-bad-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "max_range_cells = \"lots\"").unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert!(matches!(err, CalcError::Config { .. }));
        assert!(err.to_string().contains("config.toml"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_no_functions_means_no_script() {
        assert_eq!(EngineConfig::default().functions_script().unwrap(), None);
    }
}
