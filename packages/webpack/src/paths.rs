// Paths
//
// Canonical path form used for every cache key: forward slashes, resolved
// `.` and `..` segments. Host-native separators are restored only at the
// boundary back to the bundler.

use std::path::MAIN_SEPARATOR;

/// Normalize a path to the canonical forward-slash form.
pub fn normalize_path(path: &str) -> String {
    let slashed = path.replace('\\', "/");
    let absolute = slashed.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for part in slashed.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(&s) if s != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Convert a canonical path back to the host-native separator.
pub fn denormalize_path(path: &str) -> String {
    if MAIN_SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace('/', &MAIN_SEPARATOR.to_string())
    }
}

/// Directory part of a canonical path.
pub fn dirname(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
        None => ".".to_string(),
    }
}

/// Join and normalize.
pub fn resolve(base: &str, relative: &str) -> String {
    if relative.starts_with('/') || relative.contains(":\\") || relative.contains(":/") {
        normalize_path(relative)
    } else {
        normalize_path(&format!("{}/{}", base, relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_and_dots() {
        assert_eq!(normalize_path("C:\\src\\.\\app\\main.ts"), "C:/src/app/main.ts");
        assert_eq!(normalize_path("/src/app/../shared/x.ts"), "/src/shared/x.ts");
    }

    #[test]
    fn parent_segments_do_not_escape_root() {
        assert_eq!(normalize_path("/../../a"), "/a");
    }

    #[test]
    fn relative_parent_segments_are_kept() {
        assert_eq!(normalize_path("../a/b"), "../a/b");
    }

    #[test]
    fn resolve_joins_relative_against_base() {
        assert_eq!(resolve("/src/app", "./app.component.html"), "/src/app/app.component.html");
        assert_eq!(resolve("/src/app", "/abs/x.ts"), "/abs/x.ts");
    }

    #[test]
    fn dirname_handles_root_and_bare_names() {
        assert_eq!(dirname("/main.ts"), "/");
        assert_eq!(dirname("main.ts"), ".");
        assert_eq!(dirname("/src/app/main.ts"), "/src/app");
    }
}
