use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("{path:?} is outside of local root {root:?}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
    #[error("expected a file path, got the local root {0:?}")]
    NotAFile(PathBuf),
    #[error("path {0:?} is not valid UTF-8")]
    NonUtf8(PathBuf),
    #[error("cannot resolve current directory: {0}")]
    CurrentDir(#[from] std::io::Error),
    #[error("remote path contains unsupported component: {0}")]
    UnsupportedComponent(String),
}

/// Maps between paths under the local mirror root and absolute remote paths.
///
/// Remote file paths never end in `/`; remote directory paths always do.
#[derive(Debug, Clone)]
pub struct PathTranslator {
    root: PathBuf,
}

impl PathTranslator {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PathError> {
        Ok(Self {
            root: normalize(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn to_remote_file_path(&self, local: &Path) -> Result<String, PathError> {
        let segments = self.segments(local)?;
        if segments.is_empty() {
            return Err(PathError::NotAFile(local.to_path_buf()));
        }
        Ok(format!("/{}", segments.join("/")))
    }

    pub fn to_remote_directory_path(&self, local: &Path) -> Result<String, PathError> {
        let segments = self.segments(local)?;
        if segments.is_empty() {
            return Ok("/".to_string());
        }
        Ok(format!("/{}/", segments.join("/")))
    }

    pub fn to_local_path(&self, remote: &str) -> Result<PathBuf, PathError> {
        let mut out = self.root.clone();
        for part in remote.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(PathError::UnsupportedComponent(remote.to_string())),
                part if Path::new(part).components().count() != 1 => {
                    return Err(PathError::UnsupportedComponent(remote.to_string()));
                }
                part => out.push(part),
            }
        }
        Ok(out)
    }

    /// Root-relative form used in log lines; falls back to the full path.
    pub fn display(&self, local: &Path) -> String {
        match self.segments(local) {
            Ok(segments) if segments.is_empty() => ".".to_string(),
            Ok(segments) => segments.join("/"),
            Err(_) => local.display().to_string(),
        }
    }

    fn segments(&self, local: &Path) -> Result<Vec<String>, PathError> {
        let normalized = normalize(local)?;
        let relative = normalized
            .strip_prefix(&self.root)
            .map_err(|_| PathError::OutsideRoot {
                path: local.to_path_buf(),
                root: self.root.clone(),
            })?;
        relative
            .components()
            .map(|component| match component {
                Component::Normal(part) => part
                    .to_str()
                    .map(str::to_string)
                    .ok_or_else(|| PathError::NonUtf8(local.to_path_buf())),
                _ => Err(PathError::OutsideRoot {
                    path: local.to_path_buf(),
                    root: self.root.clone(),
                }),
            })
            .collect()
    }
}

/// Parent directory of a remote file path, with trailing slash.
pub fn remote_parent(remote_file: &str) -> String {
    match remote_file.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => format!("{parent}/"),
        _ => "/".to_string(),
    }
}

pub fn remote_name(remote_file: &str) -> &str {
    let trimmed = remote_file.trim_end_matches('/');
    trimmed.rsplit_once('/').map_or(trimmed, |(_, name)| name)
}

/// Every ancestor directory of `remote_file`, outermost first, excluding `/`.
pub fn remote_ancestors(remote_file: &str) -> Vec<String> {
    let parts: Vec<&str> = remote_file.split('/').filter(|p| !p.is_empty()).collect();
    let mut current = String::from("/");
    let mut out = Vec::new();
    for part in parts.iter().take(parts.len().saturating_sub(1)) {
        current.push_str(part);
        current.push('/');
        out.push(current.clone());
    }
    out
}

// Lexical normalization: the path may not exist yet, so nothing is resolved on disk.
fn normalize(path: &Path) -> Result<PathBuf, PathError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> PathTranslator {
        PathTranslator::new("/mirror/CIRCUITPY").unwrap()
    }

    #[test]
    fn maps_local_file_to_remote_path() {
        let paths = translator();
        let remote = paths
            .to_remote_file_path(Path::new("/mirror/CIRCUITPY/lib/hello/world.py"))
            .unwrap();
        assert_eq!(remote, "/lib/hello/world.py");
    }

    #[test]
    fn directory_paths_end_with_slash() {
        let paths = translator();
        assert_eq!(
            paths
                .to_remote_directory_path(Path::new("/mirror/CIRCUITPY/lib"))
                .unwrap(),
            "/lib/"
        );
        assert_eq!(
            paths
                .to_remote_directory_path(Path::new("/mirror/CIRCUITPY"))
                .unwrap(),
            "/"
        );
    }

    #[test]
    fn root_is_not_a_file() {
        let paths = translator();
        assert!(matches!(
            paths.to_remote_file_path(Path::new("/mirror/CIRCUITPY/")),
            Err(PathError::NotAFile(_))
        ));
    }

    #[test]
    fn round_trip_is_identity_inside_root() {
        let paths = translator();
        for local in [
            "/mirror/CIRCUITPY/code.py",
            "/mirror/CIRCUITPY/lib/adafruit_bus_device/i2c_device.mpy",
            "/mirror/CIRCUITPY/sd/data log.csv",
        ] {
            let local = PathBuf::from(local);
            let remote = paths.to_remote_file_path(&local).unwrap();
            assert_eq!(paths.to_local_path(&remote).unwrap(), local);
        }
    }

    #[test]
    fn sibling_with_shared_prefix_is_outside_root() {
        let paths = translator();
        assert!(matches!(
            paths.to_remote_file_path(Path::new("/mirror/CIRCUITPY-old/code.py")),
            Err(PathError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn parent_components_are_normalized_before_containment() {
        let paths = translator();
        assert_eq!(
            paths
                .to_remote_file_path(Path::new("/mirror/CIRCUITPY/lib/../code.py"))
                .unwrap(),
            "/code.py"
        );
        assert!(matches!(
            paths.to_remote_file_path(Path::new("/mirror/CIRCUITPY/../secrets.py")),
            Err(PathError::OutsideRoot { .. })
        ));
    }

    #[test]
    fn remote_parent_dirs_are_rejected() {
        let paths = translator();
        assert!(matches!(
            paths.to_local_path("/../etc/passwd"),
            Err(PathError::UnsupportedComponent(_))
        ));
    }

    #[test]
    fn remote_helpers_split_paths() {
        assert_eq!(remote_parent("/lib/hello/world.py"), "/lib/hello/");
        assert_eq!(remote_parent("/code.py"), "/");
        assert_eq!(remote_name("/lib/hello/world.py"), "world.py");
        assert_eq!(remote_name("/lib/"), "lib");
        assert_eq!(
            remote_ancestors("/lib/hello/world.py"),
            vec!["/lib/".to_string(), "/lib/hello/".to_string()]
        );
        assert!(remote_ancestors("/code.py").is_empty());
    }

    #[test]
    fn display_is_root_relative() {
        let paths = translator();
        assert_eq!(
            paths.display(Path::new("/mirror/CIRCUITPY/lib/a.py")),
            "lib/a.py"
        );
        assert_eq!(paths.display(Path::new("/elsewhere/a.py")), "/elsewhere/a.py");
    }
}
