//! Tolerant note reading and path resolution.

use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum NoteFileError {
    #[error("note file does not exist: {0}")]
    Missing(PathBuf),
    #[error("path is not a file: {0}")]
    NotAFile(PathBuf),
    #[error("error reading note {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve a note path against the vault root.
///
/// Absolute paths and paths that already start with the vault directory name
/// pass through; everything else is joined onto the vault root.
pub fn resolve_note_path(note_path: &str, vault_path: Option<&Path>) -> PathBuf {
    let note = Path::new(note_path);
    let Some(vault) = vault_path else {
        return note.to_path_buf();
    };
    if note.is_absolute() {
        return note.to_path_buf();
    }
    let vault_dir_name = vault.file_name();
    let first_component = note.components().next().map(|c| c.as_os_str().to_owned());
    if vault_dir_name.is_some() && first_component.as_deref() == vault_dir_name {
        return note.to_path_buf();
    }
    vault.join(note)
}

/// Check that a note exists and is a plain file. Logs a warning for
/// extensions that do not look like text.
pub fn validate_note_file(path: &Path) -> Result<(), NoteFileError> {
    if !path.exists() {
        return Err(NoteFileError::Missing(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(NoteFileError::NotAFile(path.to_path_buf()));
    }
    let looks_textual = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| matches!(e.to_ascii_lowercase().as_str(), "md" | "markdown" | "txt"));
    if !looks_textual {
        tracing::warn!("file may not be a text file: {}", path.display());
    }
    Ok(())
}

/// Read a note as UTF-8, falling back to lossy decoding so a stray byte does
/// not abort an entire sync.
pub fn read_note(path: &Path) -> Result<String, NoteFileError> {
    let bytes = std::fs::read(path).map_err(|source| NoteFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            tracing::warn!("note {} is not valid UTF-8, decoding lossily", path.display());
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_the_vault() {
        let resolved = resolve_note_path("notes/today.md", Some(Path::new("/home/me/vault")));
        assert_eq!(resolved, PathBuf::from("/home/me/vault/notes/today.md"));
    }

    #[test]
    fn absolute_paths_pass_through() {
        let resolved = resolve_note_path("/elsewhere/x.md", Some(Path::new("/home/me/vault")));
        assert_eq!(resolved, PathBuf::from("/elsewhere/x.md"));
    }

    #[test]
    fn vault_prefixed_paths_are_not_doubled() {
        let resolved = resolve_note_path("vault/notes/x.md", Some(Path::new("/home/me/vault")));
        assert_eq!(resolved, PathBuf::from("vault/notes/x.md"));
    }

    #[test]
    fn missing_note_is_an_error() {
        assert!(matches!(
            validate_note_file(Path::new("/definitely/not/here.md")),
            Err(NoteFileError::Missing(_))
        ));
    }

    #[test]
    fn reads_utf8_and_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.md");
        std::fs::write(&good, "hello").unwrap();
        assert_eq!(read_note(&good).unwrap(), "hello");

        let bad = dir.path().join("bad.md");
        std::fs::write(&bad, [b'h', 0xFF, b'i']).unwrap();
        let text = read_note(&bad).unwrap();
        assert!(text.starts_with('h') && text.ends_with('i'));
    }
}
