use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Environment variable overriding the certsmith home directory
pub const HOME_ENV: &str = "CERTSMITH_HOME";

/// Get certsmith's home directory (`$CERTSMITH_HOME`, default `~/.certsmith`).
pub fn certsmith_home_dir() -> Result<PathBuf, std::io::Error> {
    if let Ok(v) = std::env::var(HOME_ENV)
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    let home = dirs::home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        )
    })?;

    Ok(home.join(".certsmith"))
}

#[cfg(test)]
pub(crate) fn test_home_env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
