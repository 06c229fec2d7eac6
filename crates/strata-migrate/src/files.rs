//! File access for unit directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Access to a directory of unit files, addressed by bare filename.
pub trait Files {
    /// Returns the directory the filenames are relative to.
    fn root(&self) -> &Path;

    /// Lists the filenames in the directory ending in `extension`, sorted
    /// ascending. A missing directory lists as empty.
    fn list(&self, extension: &str) -> io::Result<Vec<String>>;

    /// Reads a file to a string.
    fn read(&self, filename: &str) -> io::Result<String>;

    /// Writes a file, creating the directory if needed.
    fn write(&self, filename: &str, contents: &str) -> io::Result<()>;

    /// Returns whether the file exists.
    fn exists(&self, filename: &str) -> bool;

    /// Returns the full path of a file.
    fn path(&self, filename: &str) -> PathBuf {
        self.root().join(filename)
    }
}

/// [`Files`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    /// Creates a file store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Files for LocalFiles {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list(&self, extension: &str) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let suffix = format!(".{extension}");
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.ends_with(&suffix) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self, filename: &str) -> io::Result<String> {
        fs::read_to_string(self.path(filename))
    }

    fn write(&self, filename: &str, contents: &str) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.path(filename);
        debug!(path = %path.display(), "Writing file");
        fs::write(path, contents)
    }

    fn exists(&self, filename: &str) -> bool {
        self.path(filename).is_file()
    }
}
