// Category folder discovery

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Lists the example folders under a category root
pub trait DirectoryListing {
    /// Immediate subdirectories of `root` in a stable order
    fn list_dirs(&self, root: &Path) -> io::Result<Vec<PathBuf>>;

    /// Fails unless `root` is a readable directory
    fn check_root(&self, root: &Path) -> io::Result<()>;
}

/// Real file system listing; hidden entries are skipped and results sorted by name.
/// Symlinked folders are followed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsDirectoryListing;

impl DirectoryListing for FsDirectoryListing {
    fn list_dirs(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn check_root(&self, root: &Path) -> io::Result<()> {
        if fs::metadata(root)?.is_dir() {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ))
        }
    }
}

/// Folder identity used for de-duplication: the last path component
pub fn folder_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
