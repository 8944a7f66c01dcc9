use std::path::PathBuf;
use std::sync::OnceLock;

static RUNTREE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the runtree home directory (`~/.runtree/`).
/// Supports `$RUNTREE_HOME` env override. Cached via `OnceLock`.
pub fn runtree_home() -> &'static PathBuf {
    RUNTREE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("RUNTREE_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".runtree")
    })
}

/// `~/.runtree/config/`
pub fn config_dir() -> PathBuf {
    runtree_home().join("config")
}

/// `~/.runtree/logs/`
pub fn logs_dir() -> PathBuf {
    runtree_home().join("logs")
}
