//! Logical path <-> physical key translation
//!
//! Object stores have a flat key space. The adapter exposes logical paths
//! relative to an optional key prefix, so that several adapters can share a
//! bucket without seeing each other's objects.

use serde::{Deserialize, Serialize};

/// Path separator used for object keys
pub const SEPARATOR: char = '/';

/// Applies and strips the configured key prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathPrefixer {
    /// Normalized prefix: empty, or no leading separator and exactly one trailing separator
    prefix: String,
}

impl PathPrefixer {
    pub fn new(prefix: impl AsRef<str>) -> Self {
        let trimmed = prefix
            .as_ref()
            .trim_start_matches(SEPARATOR)
            .trim_end_matches(['/', '\\']);

        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}{}", trimmed, SEPARATOR)
        };

        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Convert a logical path to the physical key used against the store
    pub fn apply(&self, path: &str) -> String {
        let path = path.trim_start_matches(['/', '\\']);
        format!("{}{}", self.prefix, path)
    }

    /// Convert a physical key back to a logical path
    pub fn remove<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }

    /// Physical key prefix under which the entries of a directory live
    pub fn directory_prefix(&self, directory: &str) -> String {
        let directory = directory.trim_end_matches(SEPARATOR);
        if directory.trim_start_matches(SEPARATOR).is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{}", self.apply(directory), SEPARATOR)
        }
    }
}

/// Components derived from a logical path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
    /// Parent directory, empty for top-level entries
    pub dirname: String,
    pub basename: String,
    pub filename: String,
    pub extension: Option<String>,
}

impl PathInfo {
    pub fn from_path(path: &str) -> Self {
        let path = path.trim_end_matches(SEPARATOR);
        let (dirname, basename) = match path.rsplit_once(SEPARATOR) {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), path.to_string()),
        };

        let (filename, extension) = match basename.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), Some(ext.to_string())),
            _ => (basename.clone(), None),
        };

        Self {
            dirname,
            basename,
            filename,
            extension,
        }
    }
}

/// Strip leading and trailing separators from a logical directory path
pub fn normalize_directory(directory: &str) -> &str {
    directory.trim_matches(SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(PathPrefixer::new("").prefix(), "");
        assert_eq!(PathPrefixer::new("/").prefix(), "");
        assert_eq!(PathPrefixer::new("uploads").prefix(), "uploads/");
        assert_eq!(PathPrefixer::new("/uploads/").prefix(), "uploads/");
        assert_eq!(PathPrefixer::new("//a/b//").prefix(), "a/b/");
    }

    #[test]
    fn test_apply_prefix() {
        let prefixer = PathPrefixer::new("uploads/");
        assert_eq!(prefixer.apply("notes/todo.txt"), "uploads/notes/todo.txt");
        assert_eq!(prefixer.apply("/notes/todo.txt"), "uploads/notes/todo.txt");
        assert_eq!(prefixer.apply("notes/"), "uploads/notes/");

        let bare = PathPrefixer::new("");
        assert_eq!(bare.apply("/notes/todo.txt"), "notes/todo.txt");
    }

    #[test]
    fn test_remove_inverts_apply() {
        let paths = [
            "todo.txt",
            "notes/todo.txt",
            "a/b/c/d.tar.gz",
            "dir/",
            "with space/and-dash_1",
            "",
        ];
        for prefix in ["", "uploads", "/deep/nested/prefix/"] {
            let prefixer = PathPrefixer::new(prefix);
            for path in paths {
                assert_eq!(prefixer.remove(&prefixer.apply(path)), path);
            }
        }
    }

    #[test]
    fn test_remove_foreign_key_untouched() {
        let prefixer = PathPrefixer::new("uploads");
        assert_eq!(prefixer.remove("other/key"), "other/key");
    }

    #[test]
    fn test_directory_prefix() {
        let prefixer = PathPrefixer::new("uploads");
        assert_eq!(prefixer.directory_prefix(""), "uploads/");
        assert_eq!(prefixer.directory_prefix("notes"), "uploads/notes/");
        assert_eq!(prefixer.directory_prefix("notes/"), "uploads/notes/");

        let bare = PathPrefixer::new("");
        assert_eq!(bare.directory_prefix(""), "");
        assert_eq!(bare.directory_prefix("/"), "");
        assert_eq!(bare.directory_prefix("a/b"), "a/b/");
    }

    #[test]
    fn test_path_info() {
        let info = PathInfo::from_path("notes/todo.txt");
        assert_eq!(info.dirname, "notes");
        assert_eq!(info.basename, "todo.txt");
        assert_eq!(info.filename, "todo");
        assert_eq!(info.extension.as_deref(), Some("txt"));

        let info = PathInfo::from_path("archive.tar.gz");
        assert_eq!(info.dirname, "");
        assert_eq!(info.filename, "archive.tar");
        assert_eq!(info.extension.as_deref(), Some("gz"));

        let info = PathInfo::from_path("a/.hidden");
        assert_eq!(info.filename, ".hidden");
        assert_eq!(info.extension, None);

        let info = PathInfo::from_path("a/b/");
        assert_eq!(info.dirname, "a");
        assert_eq!(info.basename, "b");
    }
}
