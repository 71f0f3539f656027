use std::path::{Component, Path, PathBuf};

use super::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    pub home_dir: PathBuf,
    pub cwd: PathBuf,
}

impl RuntimePaths {
    pub fn new(home_dir: &Path, cwd: &Path) -> Result<Self, ConfigError> {
        if !home_dir.is_absolute() {
            return Err(ConfigError::Path(format!(
                "home_dir must be absolute: {}",
                home_dir.display()
            )));
        }
        if !cwd.is_absolute() {
            return Err(ConfigError::Path(format!(
                "cwd must be absolute: {}",
                cwd.display()
            )));
        }

        Ok(Self {
            home_dir: normalize_lexical(home_dir),
            cwd: normalize_lexical(cwd),
        })
    }

    /// Where state lives when nothing else is configured.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.home_dir.join(".nl2sql")
    }

    /// `~` expands against the home dir, relative paths against the cwd.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf, ConfigError> {
        let expanded = expand_tilde(path, &self.home_dir)?;
        let resolved = if expanded.is_absolute() {
            expanded
        } else {
            self.cwd.join(expanded)
        };
        Ok(normalize_lexical(&resolved))
    }
}

fn expand_tilde(path: &Path, home_dir: &Path) -> Result<PathBuf, ConfigError> {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => {
            let mut expanded = home_dir.to_path_buf();
            for component in components {
                expanded.push(component.as_os_str());
            }
            Ok(expanded)
        }
        Some(Component::Normal(first))
            if first
                .to_str()
                .is_some_and(|segment| segment.starts_with('~')) =>
        {
            Err(ConfigError::Path(format!(
                "unsupported home expansion syntax (only `~` and `~/...` are supported): {}",
                path.display()
            )))
        }
        _ => Ok(path.to_path_buf()),
    }
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            _ => normalized.push(component.as_os_str()),
        }
    }
    normalized
}
