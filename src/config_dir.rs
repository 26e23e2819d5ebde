use directories::ProjectDirs;
use std::path::PathBuf;

fn config_dir() -> Option<PathBuf> {
    let proj = ProjectDirs::from("me", "shoryuken", "gridcalc")?;
    Some(proj.config_dir().to_path_buf())
}

/// `config.toml` in the platform config directory.
pub(crate) fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// `default.rhai` in the platform config directory.
pub(crate) fn default_functions_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("default.rhai"))
}

/// Put the user's `default.rhai` (when it exists) ahead of `functions`.
pub(crate) fn prepend_default_functions_if_present(
    functions: &mut Vec<PathBuf>,
    no_default_functions: bool,
) {
    if no_default_functions {
        return;
    }
    let Some(path) = default_functions_path() else {
        return;
    };
    if path.is_file() {
        functions.insert(0, path);
    } else {
        tracing::debug!(path = %path.display(), "no default functions file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_share_a_directory() {
        if let (Some(config), Some(functions)) = (default_config_path(), default_functions_path()) {
            assert_eq!(config.parent(), functions.parent());
            assert!(functions.ends_with("default.rhai"));
        }
    }

    #[test]
    fn disabled_default_functions_are_not_added() {
        let mut functions = vec![PathBuf::from("mine.rhai")];
        prepend_default_functions_if_present(&mut functions, true);
        assert_eq!(functions, vec![PathBuf::from("mine.rhai")]);
    }
}
