//! Backtrace path filter.
//!
//! Keeps only application frames: anything under a dependency or toolchain
//! root (or produced by an evaluator) is dropped, and frames under the
//! application root are rewritten relative to it.

use std::path::{Path, PathBuf};

/// Marker present in frames produced by code evaluation.
pub const EVAL_MARKER: &str = "(eval):";

/// Path filter applied to every caller frame before redaction.
#[derive(Debug, Clone, Default)]
pub struct BacktraceFilter {
    library_paths: Vec<String>,
    app_root: Option<String>,
}

impl BacktraceFilter {
    /// Filter with the default library roots and the given application root.
    pub fn new(app_root: impl AsRef<Path>) -> Self {
        Self {
            library_paths: Self::default_library_paths(),
            app_root: normalize_root(app_root.as_ref()),
        }
    }

    /// Filter rooted at the current working directory.
    pub fn for_current_dir() -> Self {
        match std::env::current_dir() {
            Ok(dir) => Self::new(dir),
            Err(_) => Self {
                library_paths: Self::default_library_paths(),
                app_root: None,
            },
        }
    }

    /// Replace the library roots.
    pub fn with_library_paths(mut self, paths: Vec<String>) -> Self {
        self.library_paths = paths;
        self
    }

    /// Add one more library root.
    pub fn add_library_path(&mut self, path: impl Into<String>) {
        self.library_paths.push(path.into());
    }

    pub fn library_paths(&self) -> &[String] {
        &self.library_paths
    }

    /// Cargo registry, rustup toolchains, std sources and the eval marker.
    ///
    /// Both the configured and the resolved (symlink-free) forms are listed.
    pub fn default_library_paths() -> Vec<String> {
        let mut roots: Vec<PathBuf> = Vec::new();

        let cargo_home = std::env::var_os("CARGO_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".cargo")));
        if let Some(cargo_home) = cargo_home {
            roots.push(cargo_home.join("registry"));
            roots.push(cargo_home.join("git"));
        }

        let rustup_home = std::env::var_os("RUSTUP_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".rustup")));
        if let Some(rustup_home) = rustup_home {
            roots.push(rustup_home.join("toolchains"));
        }

        let mut paths = Vec::new();
        for root in roots {
            let display = root.to_string_lossy().into_owned();
            if let Ok(real) = std::fs::canonicalize(&root) {
                let real = real.to_string_lossy().into_owned();
                if real != display {
                    paths.push(real);
                }
            }
            paths.push(display);
        }
        paths.push("/rustc/".to_string());
        paths.push(EVAL_MARKER.to_string());
        paths
    }

    /// Drop library frames and relativize application frames, keeping order.
    pub fn filter(&self, frames: &[String]) -> Vec<String> {
        frames
            .iter()
            .filter(|frame| !self.is_library_frame(frame))
            .map(|frame| self.relativize(frame))
            .collect()
    }

    fn is_library_frame(&self, frame: &str) -> bool {
        self.library_paths.iter().any(|p| frame.contains(p.as_str()))
    }

    fn relativize(&self, frame: &str) -> String {
        if let Some(root) = &self.app_root {
            if let Some(rest) = frame.strip_prefix(root.as_str()) {
                if let Some(rel) = rest.strip_prefix('/') {
                    return rel.to_string();
                }
            }
        }
        frame.to_string()
    }
}

/// Strip trailing slashes. The filesystem root relativizes nothing.
fn normalize_root(root: &Path) -> Option<String> {
    let root = root.to_string_lossy();
    let trimmed = root.trim_end_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_drops_library_frames() {
        let filter = BacktraceFilter::new("/srv/app")
            .with_library_paths(vec!["/opt/deps".to_string(), EVAL_MARKER.to_string()]);

        let lines = filter.filter(&frames(&[
            "foo/bar:1 in 'method'",
            "/opt/deps/sqlx-0.7/src/lib.rs:4231 in 'method'",
            "foo/bar:2 in 'method'",
            "(eval):1234 in 'method'",
            "foo/bar:3 in 'method'",
        ]));

        assert_eq!(
            lines,
            frames(&[
                "foo/bar:1 in 'method'",
                "foo/bar:2 in 'method'",
                "foo/bar:3 in 'method'",
            ])
        );
    }

    #[test]
    fn test_relativizes_app_frames() {
        let filter = BacktraceFilter::new("/srv/app/").with_library_paths(Vec::new());
        let lines = filter.filter(&frames(&[
            "/srv/app/src/orders.rs:12 in 'load'",
            "/srv/application/src/x.rs:1",
        ]));
        assert_eq!(
            lines,
            frames(&["src/orders.rs:12 in 'load'", "/srv/application/src/x.rs:1"])
        );
    }

    #[test]
    fn test_filesystem_root_keeps_absolute_frames() {
        let filter = BacktraceFilter::new("/").with_library_paths(Vec::new());
        let lines = filter.filter(&frames(&["/usr/lib/x.rs:1", "src/y.rs:2"]));
        assert_eq!(lines, frames(&["/usr/lib/x.rs:1", "src/y.rs:2"]));
    }

    #[test]
    fn test_default_paths_include_markers() {
        let paths = BacktraceFilter::default_library_paths();
        assert!(paths.iter().any(|p| p == EVAL_MARKER));
        assert!(paths.iter().any(|p| p == "/rustc/"));
    }
}
