//! Request path to file resolution
//!
//! Maps a request path onto a file below the configured root. Anything
//! that would escape the root, including through symlinks, resolves to
//! [`Classification::Missing`].

use std::path::{Path, PathBuf};

use axum::http::Method;

/// Index file served for directory requests
const INDEX_FILE: &str = "index.html";

/// What a request path resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A directory; only seen before index fallback is applied
    Directory,
    /// A regular file to serve
    RegularFile,
    /// Nothing servable
    Missing,
}

/// Result of resolving one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMapping {
    /// Percent-decoded path with `.` and `..` collapsed, without leading `/`
    pub normalized: String,
    /// Canonical filesystem path, when one was found
    pub path: Option<PathBuf>,
    pub classification: Classification,
}

impl RequestMapping {
    fn missing(normalized: impl Into<String>) -> Self {
        Self {
            normalized: normalized.into(),
            path: None,
            classification: Classification::Missing,
        }
    }

    fn file(normalized: String, path: PathBuf) -> Self {
        Self {
            normalized,
            path: Some(path),
            classification: Classification::RegularFile,
        }
    }

    /// File to serve, if the mapping points at one
    pub fn file_path(&self) -> Option<&Path> {
        match self.classification {
            Classification::RegularFile => self.path.as_deref(),
            _ => None,
        }
    }
}

/// Resolve a request against a root directory
///
/// # Arguments
/// * `root` - Canonical root directory
/// * `method` - Request method; only GET is served
/// * `raw_path` - Request path as it appeared on the wire (percent-encoded)
pub async fn resolve(root: &Path, method: &Method, raw_path: &str) -> RequestMapping {
    if *method != Method::GET {
        return RequestMapping::missing("");
    }

    let decoded = match urlencoding::decode(raw_path) {
        Ok(decoded) => decoded,
        Err(_) => return RequestMapping::missing(""),
    };

    if !decoded.starts_with('/') {
        return RequestMapping::missing("");
    }

    let Some(normalized) = normalize(&decoded) else {
        tracing::debug!("Rejected path escaping root: {}", raw_path);
        return RequestMapping::missing("");
    };

    let Some(target) = contained(root, &root.join(&normalized)).await else {
        return RequestMapping::missing(normalized);
    };

    match classify(&target).await {
        Classification::RegularFile => RequestMapping::file(normalized, target),
        Classification::Directory => match_index(root, &target, normalized).await,
        Classification::Missing => RequestMapping::missing(normalized),
    }
}

/// Directory fallback: serve `index.html` if present
async fn match_index(root: &Path, dir: &Path, normalized: String) -> RequestMapping {
    let Some(index) = contained(root, &dir.join(INDEX_FILE)).await else {
        return RequestMapping::missing(normalized);
    };

    match classify(&index).await {
        Classification::RegularFile => RequestMapping::file(normalized, index),
        _ => RequestMapping::missing(normalized),
    }
}

/// Canonicalize `candidate` and check it is still under `root`
///
/// Returns `None` for nonexistent paths, broken symlinks and anything that
/// resolves outside the root.
async fn contained(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let canonical = tokio::fs::canonicalize(candidate).await.ok()?;
    if canonical.starts_with(root) {
        Some(canonical)
    } else {
        tracing::debug!("Rejected path outside root: {}", canonical.display());
        None
    }
}

/// Strip the leading `/` and collapse `.` and `..` segments
///
/// Returns `None` if a `..` would climb above the root.
fn normalize(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s if s.contains('\0') || s.contains('\\') => return None,
            s => segments.push(s),
        }
    }

    Some(segments.join("/"))
}

/// Classify a path on disk without index fallback
async fn classify(path: &Path) -> Classification {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_dir() => Classification::Directory,
        Ok(m) if m.is_file() => Classification::RegularFile,
        _ => Classification::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Layout:
    /// ```text
    /// tmp/secret.txt
    /// tmp/www/index.html
    /// tmp/www/app.js
    /// tmp/www/docs/index.html
    /// tmp/www/empty/
    /// tmp/www/with space.txt
    /// ```
    fn create_test_tree() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let www = dir.path().join("www");
        fs::create_dir_all(www.join("docs")).unwrap();
        fs::create_dir_all(www.join("empty")).unwrap();
        fs::write(dir.path().join("secret.txt"), "secret").unwrap();
        fs::write(www.join("index.html"), "<html>OK</html>").unwrap();
        fs::write(www.join("app.js"), "console.log(1)").unwrap();
        fs::write(www.join("docs/index.html"), "docs").unwrap();
        fs::write(www.join("with space.txt"), "spaced").unwrap();
        let root = www.canonicalize().unwrap();
        (dir, root)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/").as_deref(), Some(""));
        assert_eq!(normalize("/a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(normalize("/a/./b/../c").as_deref(), Some("a/c"));
        assert_eq!(normalize("//a//b/").as_deref(), Some("a/b"));
        assert_eq!(normalize("/a/.."), Some(String::new()));
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert_eq!(normalize("/.."), None);
        assert_eq!(normalize("/../secret.txt"), None);
        assert_eq!(normalize("/a/../../secret.txt"), None);
        assert_eq!(normalize("/a\\..\\b"), None);
    }

    #[tokio::test]
    async fn test_regular_file() {
        let (_dir, root) = create_test_tree();
        let mapping = resolve(&root, &Method::GET, "/app.js").await;
        assert_eq!(mapping.classification, Classification::RegularFile);
        assert_eq!(mapping.file_path(), Some(root.join("app.js").as_path()));
        assert_eq!(mapping.normalized, "app.js");
    }

    #[tokio::test]
    async fn test_root_serves_index() {
        let (_dir, root) = create_test_tree();
        let mapping = resolve(&root, &Method::GET, "/").await;
        assert_eq!(mapping.file_path(), Some(root.join("index.html").as_path()));
    }

    #[tokio::test]
    async fn test_subdirectory_serves_index() {
        let (_dir, root) = create_test_tree();
        for path in ["/docs", "/docs/"] {
            let mapping = resolve(&root, &Method::GET, path).await;
            assert_eq!(mapping.file_path(), Some(root.join("docs/index.html").as_path()));
        }
    }

    #[tokio::test]
    async fn test_directory_without_index_is_missing() {
        let (_dir, root) = create_test_tree();
        let mapping = resolve(&root, &Method::GET, "/empty/").await;
        assert_eq!(mapping.classification, Classification::Missing);
        assert!(mapping.file_path().is_none());
    }

    #[tokio::test]
    async fn test_traversal_is_missing() {
        let (_dir, root) = create_test_tree();
        for path in [
            "/../secret.txt",
            "/docs/../../secret.txt",
            "/%2e%2e/secret.txt",
            "/..%2fsecret.txt",
        ] {
            let mapping = resolve(&root, &Method::GET, path).await;
            assert_eq!(mapping.classification, Classification::Missing, "path {}", path);
        }
    }

    #[tokio::test]
    async fn test_percent_decoding() {
        let (_dir, root) = create_test_tree();
        let mapping = resolve(&root, &Method::GET, "/with%20space.txt").await;
        assert_eq!(mapping.file_path(), Some(root.join("with space.txt").as_path()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_missing() {
        let (_dir, root) = create_test_tree();
        let mapping = resolve(&root, &Method::GET, "/%ff%fe").await;
        assert_eq!(mapping.classification, Classification::Missing);
    }

    #[tokio::test]
    async fn test_non_get_is_missing() {
        let (_dir, root) = create_test_tree();
        for method in [Method::POST, Method::HEAD, Method::OPTIONS, Method::DELETE] {
            let mapping = resolve(&root, &method, "/index.html").await;
            assert_eq!(mapping.classification, Classification::Missing);
        }
    }

    #[tokio::test]
    async fn test_path_without_leading_slash_is_missing() {
        let (_dir, root) = create_test_tree();
        for path in ["index.html", "*", ""] {
            let mapping = resolve(&root, &Method::GET, path).await;
            assert_eq!(mapping.classification, Classification::Missing);
        }
    }

    #[tokio::test]
    async fn test_nonexistent_is_missing() {
        let (_dir, root) = create_test_tree();
        let mapping = resolve(&root, &Method::GET, "/nope.html").await;
        assert_eq!(mapping.classification, Classification::Missing);
        assert_eq!(mapping.normalized, "nope.html");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escaping_root_is_missing() {
        let (dir, root) = create_test_tree();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), root.join("leak.txt")).unwrap();
        std::os::unix::fs::symlink(dir.path(), root.join("parent")).unwrap();

        let mapping = resolve(&root, &Method::GET, "/leak.txt").await;
        assert_eq!(mapping.classification, Classification::Missing);

        let mapping = resolve(&root, &Method::GET, "/parent/secret.txt").await;
        assert_eq!(mapping.classification, Classification::Missing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_root_is_served() {
        let (_dir, root) = create_test_tree();
        std::os::unix::fs::symlink(root.join("app.js"), root.join("alias.js")).unwrap();

        let mapping = resolve(&root, &Method::GET, "/alias.js").await;
        assert_eq!(mapping.file_path(), Some(root.join("app.js").as_path()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_symlink_is_missing() {
        let (_dir, root) = create_test_tree();
        std::os::unix::fs::symlink(root.join("gone.txt"), root.join("broken.txt")).unwrap();

        let mapping = resolve(&root, &Method::GET, "/broken.txt").await;
        assert_eq!(mapping.classification, Classification::Missing);
    }

    #[tokio::test]
    async fn test_classify() {
        let (_dir, root) = create_test_tree();
        assert_eq!(classify(&root).await, Classification::Directory);
        assert_eq!(classify(&root.join("app.js")).await, Classification::RegularFile);
        assert_eq!(classify(&root.join("nope")).await, Classification::Missing);
    }
}
