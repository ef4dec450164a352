//! File-system helpers shared by the registry, the table loaders and the CLI.

use log::debug;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Component, Path, PathBuf};

/// Resolves a path recorded in a manifest or config file against a root directory.
///
/// Absolute paths are returned unchanged. Relative paths lose their `.` and `..`
/// components before being joined to `root`: manifests written by the training runs
/// record paths relative to the training scripts (`../saved_models/x.toml`), while the
/// serving process resolves them under its own root.
pub fn resolve_under_root(root: &Path, recorded: &str) -> PathBuf {
    let recorded_path = Path::new(recorded.trim());
    if recorded_path.is_absolute() {
        return recorded_path.to_path_buf();
    }

    let cleaned: PathBuf = recorded_path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    let resolved = root.join(cleaned);
    debug!("Resolved '{recorded}' to '{}'", resolved.display());
    resolved
}

/// True only for an existing regular file. Directories and broken links are not bundles.
pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Reads an entire text input. `None` or `-` reads standard input.
pub fn read_text_input(path: Option<&Path>) -> io::Result<String> {
    let mut text = String::new();
    match path {
        Some(p) if p != Path::new("-") => {
            File::open(p)?.read_to_string(&mut text)?;
        }
        _ => {
            io::stdin().read_to_string(&mut text)?;
        }
    }
    Ok(text)
}

/// Creates an output file, creating its parent directory first if necessary.
pub fn create_output(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(BufWriter::new(File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn relative_paths_drop_parent_components() {
        let root = Path::new("/srv/staywise");
        assert_eq!(
            resolve_under_root(root, "../model/Age_Group.toml"),
            PathBuf::from("/srv/staywise/model/Age_Group.toml")
        );
        assert_eq!(
            resolve_under_root(root, "./model/x.toml"),
            PathBuf::from("/srv/staywise/model/x.toml")
        );
    }

    #[test]
    fn absolute_paths_are_kept() {
        let root = Path::new("/srv/staywise");
        assert_eq!(
            resolve_under_root(root, "/models/a.toml"),
            PathBuf::from("/models/a.toml")
        );
    }

    #[test]
    fn regular_file_check_rejects_directories() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "x").unwrap();
        assert!(is_regular_file(file.path()));
        let dir = file.path().parent().unwrap();
        assert!(!is_regular_file(dir));
        assert!(!is_regular_file(&dir.join("definitely-not-here.toml")));
    }

    #[test]
    fn text_input_reads_named_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"Gender\": \"M\"}}").unwrap();
        let text = read_text_input(Some(file.path())).unwrap();
        assert_eq!(text, "{\"Gender\": \"M\"}");
    }
}
