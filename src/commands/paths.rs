use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::runtime::Runtime;

/// Get the default root directory for the cache and managed packs
#[tracing::instrument(skip(runtime))]
pub fn default_root<R: Runtime>(runtime: &R) -> Result<PathBuf> {
    if runtime.is_privileged() {
        Ok(system_root(runtime))
    } else {
        let home_dir = runtime
            .home_dir()
            .context("Could not find home directory")?;
        Ok(home_dir.join(".tpman"))
    }
}

#[cfg(target_os = "macos")]
#[tracing::instrument(skip(_runtime))]
fn system_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from("/opt/tpman")
}

#[cfg(target_os = "windows")]
#[tracing::instrument(skip(_runtime))]
fn system_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from(r"C:\ProgramData\tpman")
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
#[tracing::instrument(skip(_runtime))]
fn system_root<R: Runtime>(_runtime: &R) -> PathBuf {
    PathBuf::from("/usr/local/tpman")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    #[test]
    fn test_default_root_for_regular_user() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        #[cfg(not(windows))]
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));
        #[cfg(windows)]
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from(r"C:\Users\user")));

        let root = default_root(&runtime).unwrap();
        assert!(root.ends_with(".tpman"));
    }

    #[test]
    fn test_default_root_for_privileged_user() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| true);

        let root = default_root(&runtime).unwrap();
        assert!(!root.ends_with(".tpman"));
    }

    #[test]
    fn test_default_root_without_home_fails() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_privileged().returning(|| false);
        runtime.expect_home_dir().returning(|| None);

        assert!(default_root(&runtime).is_err());
    }
}
