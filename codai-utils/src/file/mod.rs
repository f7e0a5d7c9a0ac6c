//! File system helpers
//!
//! Path normalisation for cache keys and tolerant decoding of file bytes into
//! text for the AI backend.

use std::path::{Component, Path, PathBuf};

/// Safely join paths, refusing absolute paths and `..` traversal out of `base`
pub fn safe_path_join(base: &Path, relative: &Path) -> crate::Result<PathBuf> {
    let normalized = normalize_path(relative);

    if normalized.is_absolute()
        || normalized
            .components()
            .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(crate::UtilError::PathOperation(format!(
            "Unsafe path join attempted: {} + {}",
            base.display(),
            relative.display()
        )));
    }

    Ok(base.join(normalized))
}

/// Lexically normalize a path (collapses `.`, `..` and duplicate separators)
pub fn normalize_path(path: &Path) -> PathBuf {
    path_clean::clean(path)
}

/// Express `path` relative to `root`, normalized.
///
/// Paths outside `root` are returned normalized but otherwise untouched.
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
    let path = normalize_path(path);
    let root = normalize_path(root);
    match path.strip_prefix(&root) {
        Ok(rel) if rel.as_os_str().is_empty() => PathBuf::from("."),
        Ok(rel) => rel.to_path_buf(),
        Err(_) => path,
    }
}

/// Render a path with `/` separators regardless of platform
pub fn display_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            Component::CurDir => Some(".".to_string()),
            Component::ParentDir => Some("..".to_string()),
            Component::RootDir | Component::Prefix(_) => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Decode file bytes into text.
///
/// Tries UTF-8 first, then UTF-16 when a byte-order mark is present, and
/// finally falls back to ISO-8859-1, which accepts every byte sequence.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.strip_prefix('\u{feff}').unwrap_or(text).to_string();
    }

    if let Some(text) = decode_utf16_with_bom(bytes) {
        return text;
    }

    bytes.iter().map(|&b| char::from(b)).collect()
}

fn decode_utf16_with_bom(bytes: &[u8]) -> Option<String> {
    let (body, little_endian) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        _ => return None,
    };
    if body.len() % 2 != 0 {
        return None;
    }

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_path_join() {
        let base = Path::new("/project");
        assert_eq!(
            safe_path_join(base, Path::new("src/./main.rs")).unwrap(),
            PathBuf::from("/project/src/main.rs")
        );
        assert!(safe_path_join(base, Path::new("../etc/passwd")).is_err());
        assert!(safe_path_join(base, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_relative_to() {
        let root = Path::new("/project");
        assert_eq!(
            relative_to(Path::new("/project/src//lib.rs"), root),
            PathBuf::from("src/lib.rs")
        );
        assert_eq!(relative_to(Path::new("/project"), root), PathBuf::from("."));
        assert_eq!(
            relative_to(Path::new("/elsewhere/a.rs"), root),
            PathBuf::from("/elsewhere/a.rs")
        );
    }

    #[test]
    fn test_display_path() {
        assert_eq!(display_path(Path::new("src/core/lib.rs")), "src/core/lib.rs");
    }

    #[test]
    fn test_decode_text_fallbacks() {
        assert_eq!(decode_text(b"plain"), "plain");
        assert_eq!(decode_text(b"\xEF\xBB\xBFbom"), "bom");
        assert_eq!(decode_text(&[0xFF, 0xFE, b'h', 0, b'i', 0]), "hi");
        // 0xE9 alone is invalid UTF-8, latin-1 maps it to 'é'
        assert_eq!(decode_text(&[b'c', b'a', b'f', 0xE9]), "café");
    }
}
