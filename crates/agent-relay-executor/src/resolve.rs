//! Executable lookup.

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute or containing a separator).
/// 2. The current process PATH via `which`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 || path.is_absolute() {
        return tokio::fs::metadata(path)
            .await
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map(|_| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolves_from_path() {
        let sh = resolve_executable_path("sh").await.unwrap();
        assert!(sh.is_absolute());
    }

    #[tokio::test]
    async fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool");
        std::fs::write(&file, "").unwrap();
        assert_eq!(
            resolve_executable_path(file.to_str().unwrap()).await,
            Some(file.clone())
        );
        assert_eq!(
            resolve_executable_path(dir.path().join("missing").to_str().unwrap()).await,
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_and_blank() {
        assert_eq!(resolve_executable_path("definitely-not-a-real-binary-xyz").await, None);
        assert_eq!(resolve_executable_path("  ").await, None);
    }
}
