use std::fmt;
use std::path::{Path, PathBuf};

/// Thin wrapper around a filesystem path.
///
/// Centralizes path handling so sibling-file derivation (`.lock`,
/// `.sha256`, ...) happens in one place instead of being repeated at each
/// call site.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagedPath(PathBuf);

impl ManagedPath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ManagedPath(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// Sibling path with the given extension appended to the file name
    /// (not replacing an existing extension), e.g. `metadata.json` ->
    /// `metadata.json.sha256`.
    pub fn sibling_with_appended_extension(&self, ext: &str) -> PathBuf {
        let mut name = self.0.file_name().map(|n| n.to_owned()).unwrap_or_default();
        name.push(".");
        name.push(ext);
        self.0.with_file_name(name)
    }

    /// Sibling path with the extension replaced, e.g. `metadata.json` ->
    /// `metadata.lock`.
    pub fn sibling_with_extension(&self, ext: &str) -> PathBuf {
        self.0.with_extension(ext)
    }
}

impl From<PathBuf> for ManagedPath {
    fn from(path: PathBuf) -> Self {
        ManagedPath(path)
    }
}

impl From<&Path> for ManagedPath {
    fn from(path: &Path) -> Self {
        ManagedPath(path.to_owned())
    }
}

impl AsRef<Path> for ManagedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ManagedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_extension_keeps_original() {
        let p = ManagedPath::new("/data/metadata.json");
        assert_eq!(
            p.sibling_with_appended_extension("sha256"),
            PathBuf::from("/data/metadata.json.sha256")
        );
    }

    #[test]
    fn replaced_extension_drops_original() {
        let p = ManagedPath::new("/data/metadata.json");
        assert_eq!(
            p.sibling_with_extension("lock"),
            PathBuf::from("/data/metadata.lock")
        );
    }
}
