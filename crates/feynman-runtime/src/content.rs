//! Literal-or-file arguments of `html`, `css` and `run`.
//!
//! An argument that ends in the kind's extension (`.html`, `.css`, `.js`) is
//! a filename, resolved against the directory of the source file that made
//! the call. Anything else is the content itself.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use feynman_core::ContentKind;

/// Whether `source` names a file rather than carrying content.
pub fn is_file_reference(kind: ContentKind, source: &str) -> bool {
    !source.contains('\n')
        && Path::new(source.trim())
            .extension()
            .is_some_and(|ext| ext == kind.extension())
}

/// Content for `source`, reading the file it names if it names one.
///
/// A file that cannot be found or read yields empty content; the failure is
/// logged at debug level.
pub fn resolve(kind: ContentKind, source: &str, caller_file: &str) -> String {
    if !is_file_reference(kind, source) {
        return source.to_owned();
    }
    let candidates = candidates(caller_file, source.trim());
    for path in &candidates {
        match fs::read_to_string(path) {
            Ok(content) => return content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "content file unreadable");
                return String::new();
            }
        }
    }
    tracing::debug!(
        file = source,
        caller = caller_file,
        tried = candidates.len(),
        "content file not found, sending empty content"
    );
    String::new()
}

/// Paths tried for `name`, in order.
///
/// `caller_file` is a compile-time source path, which is relative to the
/// workspace root for local crates. Since the process may run from any
/// directory below that root, the relative form is tried against the
/// working directory and each of its ancestors.
pub fn candidates(caller_file: &str, name: &str) -> Vec<PathBuf> {
    let name = Path::new(name);
    if name.is_absolute() {
        return vec![name.to_path_buf()];
    }
    let relative = Path::new(caller_file)
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(name);
    if relative.is_absolute() {
        return vec![relative];
    }
    match env::current_dir() {
        Ok(cwd) => cwd.ancestors().map(|dir| dir.join(&relative)).collect(),
        Err(_) => vec![relative],
    }
}
