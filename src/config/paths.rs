//! Layered configuration search path: `/etc/<app>/<subdir>/<file>`
//! → `/etc/<app>/<file>` → `/usr/share/<app>/<subdir>/<file>` →
//! `/usr/share/<app>/<file>`, where `<subdir>` is the system-specific
//! compatible name.

use std::path::{Path, PathBuf};

/// The two root directories files are searched under, and the optional
/// system-specific subdirectory name resolved from an
/// *IBMCompatibleSystem* property or an *Inventory.Item* pretty-name
/// fallback.
pub struct ConfigRoots {
    pub app_name: String,
    pub etc_root: PathBuf,
    pub share_root: PathBuf,
    pub system_subdir: Option<String>,
}

impl ConfigRoots {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            etc_root: PathBuf::from("/etc"),
            share_root: PathBuf::from("/usr/share"),
            system_subdir: None,
        }
    }

    pub fn with_system_subdir(mut self, subdir: impl Into<String>) -> Self {
        self.system_subdir = Some(subdir.into());
        self
    }
}

/// Walk the four candidate locations in priority order, returning the
/// first that exists. Returns `None` if the file isn't found anywhere,
/// which callers treat as "use built-in defaults" for optional files or
/// a fatal `ConfigParse` for required ones.
pub fn resolve_config_path(roots: &ConfigRoots, file: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(subdir) = &roots.system_subdir {
        candidates.push(roots.etc_root.join(&roots.app_name).join(subdir).join(file));
    }
    candidates.push(roots.etc_root.join(&roots.app_name).join(file));
    if let Some(subdir) = &roots.system_subdir {
        candidates.push(roots.share_root.join(&roots.app_name).join(subdir).join(file));
    }
    candidates.push(roots.share_root.join(&roots.app_name).join(file));

    candidates.into_iter().find(|p| p.exists())
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}
