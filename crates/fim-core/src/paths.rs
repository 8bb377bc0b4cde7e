use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "fim";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var("FIM_DATA_DIR") {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Anchor a configured path under `base` unless it is already absolute.
pub fn resolve_under(base: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        base.join(configured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_are_anchored() {
        let base = Path::new("/var/lib/fim");
        assert_eq!(
            resolve_under(base, Path::new("secret.txt")),
            PathBuf::from("/var/lib/fim/secret.txt")
        );
        #[cfg(unix)]
        assert_eq!(
            resolve_under(base, Path::new("/etc/secret.txt")),
            PathBuf::from("/etc/secret.txt")
        );
    }
}
