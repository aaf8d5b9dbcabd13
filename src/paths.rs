//! Canonical path handling for project membership tests.
//!
//! Sources embed working-directory strings in many spellings (trailing
//! slashes, symlinked prefixes, `..` segments). Adapters never compare raw
//! strings; this module is the single authority for "does this session
//! belong to this project?".

use std::path::{Component, Path, PathBuf};

/// Canonical form: absolute, symlinks resolved where possible, lexically
/// cleaned. Empty input stays empty. Paths that do not exist (or whose
/// symlink resolution fails) fall back to the cleaned absolute form, so the
/// result is still usable for equality tests.
pub fn canonicalize(p: &Path) -> PathBuf {
    if p.as_os_str().is_empty() {
        return PathBuf::new();
    }
    let absolute = if p.is_absolute() {
        p.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(p),
            Err(_) => p.to_path_buf(),
        }
    };
    match std::fs::canonicalize(&absolute) {
        Ok(resolved) => resolved,
        Err(_) => clean(&absolute),
    }
}

/// True iff `p` equals `root` or lies strictly under it, both canonicalized.
pub fn contains(root: &Path, p: &Path) -> bool {
    let root = canonicalize(root);
    let p = canonicalize(p);
    if root.as_os_str().is_empty() || p.as_os_str().is_empty() {
        return false;
    }
    p == root || p.starts_with(&root)
}

/// Lexical cleanup: resolve `.` and `..` components without touching the
/// filesystem. `..` at the root is dropped.
fn clean(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Nothing left to pop above the root; drop the component.
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(canonicalize(Path::new("")), PathBuf::new());
    }

    #[test]
    fn nonexistent_paths_are_cleaned_absolute() {
        let p = canonicalize(Path::new("/no/such/./dir/../place"));
        assert_eq!(p, PathBuf::from("/no/such/place"));
    }

    #[test]
    fn contains_is_reflexive() {
        let dir = TempDir::new().unwrap();
        assert!(contains(dir.path(), dir.path()));
    }

    #[test]
    fn contains_accepts_strict_descendants() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("a/b");
        fs::create_dir_all(&sub).unwrap();
        assert!(contains(dir.path(), &sub));
        assert!(!contains(&sub, dir.path()));
    }

    #[test]
    fn contains_rejects_sibling_name_prefixes() {
        // /p/proj must not contain /p/proj2.
        assert!(!contains(Path::new("/p/proj"), Path::new("/p/proj2")));
    }

    #[test]
    fn symlinks_resolve_to_the_same_canonical_path() {
        #[cfg(unix)]
        {
            let dir = TempDir::new().unwrap();
            let real = dir.path().join("real");
            fs::create_dir_all(&real).unwrap();
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            assert_eq!(canonicalize(&link), canonicalize(&real));
            assert!(contains(&link, &real.join("x")));
        }
    }
}
