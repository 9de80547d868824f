// crates/engram-server/src/config/project.rs
// Project detection: walk up from CWD for a project marker, slugify the name

use std::path::Path;

use super::GLOBAL_PROJECT;

/// Namespaces that may not be claimed as project ids.
/// `global` is special-cased as the cross-project fallback namespace.
const RESERVED_IDS: &[&str] = &["global", "system", "admin", "default"];

/// Marker files that identify a project root, in priority order.
const PROJECT_MARKERS: &[&str] = &[".git", "package.json", "pyproject.toml", "Cargo.toml"];

/// Detect the project id for the current working directory.
///
/// Walks up from `start` looking for a project marker; the id is the
/// slugified package name (from the manifest) or directory name. An explicit
/// override wins. Falls back to `global` when nothing at all can be derived.
pub fn detect_project_id(start: &Path, env_override: Option<&str>) -> String {
    if let Some(id) = env_override
        && let Some(clean) = sanitize_project_id(id)
    {
        return clean;
    }

    let mut dir = Some(start);
    while let Some(d) = dir {
        if PROJECT_MARKERS.iter().any(|m| d.join(m).exists()) {
            let name = manifest_name(d).or_else(|| {
                d.file_name()
                    .and_then(|n| n.to_str())
                    .map(|s| s.to_string())
            });
            if let Some(name) = name
                && let Some(clean) = sanitize_project_id(&name)
            {
                return clean;
            }
        }
        dir = d.parent();
    }

    // No marker anywhere above; use the starting directory's own name
    if let Some(name) = start.file_name().and_then(|n| n.to_str())
        && let Some(clean) = sanitize_project_id(name)
    {
        return clean;
    }

    GLOBAL_PROJECT.to_string()
}

/// Read the package name from Cargo.toml or package.json in `dir`, if any.
fn manifest_name(dir: &Path) -> Option<String> {
    let cargo_toml = dir.join("Cargo.toml");
    if cargo_toml.exists()
        && let Ok(content) = std::fs::read_to_string(&cargo_toml)
    {
        let mut in_package = false;
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                in_package = line == "[package]";
            } else if in_package
                && line.starts_with("name")
                && let Some(name) = line.split('=').nth(1)
            {
                let name = name.trim().trim_matches('"').trim_matches('\'');
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }

    let package_json = dir.join("package.json");
    if package_json.exists()
        && let Ok(contents) = std::fs::read_to_string(&package_json)
        && let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents)
        && let Some(name) = value["name"].as_str()
        && !name.is_empty()
    {
        return Some(name.to_string());
    }

    None
}

/// Sanitize a candidate project id: lowercase, `[a-z0-9_-]`, 1-64 chars.
///
/// Returns None for empty results and for the reserved set.
pub fn sanitize_project_id(raw: &str) -> Option<String> {
    let slug: String = raw
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() || slug.len() > 64 {
        return None;
    }
    if RESERVED_IDS.contains(&slug.as_str()) {
        return None;
    }
    Some(slug)
}
