use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

pub const SOURCE_EXTENSION: &str = "nib";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path relative to the search root.
    pub path: PathBuf,
    pub contents: String,
}

/// Every `.nib` file beneath `root`, sorted by path.
pub fn load_sources(root: impl AsRef<Path>) -> Result<Vec<SourceFile>, std::io::Error> {
    let root = root.as_ref();
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION)
        {
            let contents = fs::read_to_string(path)?;
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            files.push(SourceFile {
                path: relative,
                contents,
            });
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
