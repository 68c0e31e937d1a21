//! Znode path rules: absolute, `/`-separated, no empty, `.` or `..` segments.

use crate::error::CoordinationError;

pub const ROOT: &str = "/";

pub fn validate(path: &str) -> Result<(), CoordinationError> {
    if path == ROOT {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(CoordinationError::invalid_path(path, "must start with '/'"));
    }
    if path.ends_with('/') {
        return Err(CoordinationError::invalid_path(path, "must not end with '/'"));
    }
    for segment in path[1..].split('/') {
        match segment {
            "" => return Err(CoordinationError::invalid_path(path, "empty segment")),
            "." | ".." => {
                return Err(CoordinationError::invalid_path(path, "relative segment"));
            }
            s if s.contains('\0') => {
                return Err(CoordinationError::invalid_path(path, "null character"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parent of a valid path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of a valid path.
pub fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Every proper ancestor of `path`, root excluded, shallowest first.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        if p == ROOT {
            break;
        }
        out.push(p);
        current = parent(p);
    }
    out.reverse();
    out
}
