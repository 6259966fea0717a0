//! Deterministic names for workspaces and branches.

const MAX_SLUG_LEN: usize = 40;

/// Lowercase, hyphen-separated slug of `title`, at most 40 characters.
///
/// Falls back to `"task"` when the title has no alphanumerics.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.len() >= MAX_SLUG_LEN {
            break;
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Workspace slug: task id plus title slug, safe as a directory name.
pub fn workspace_slug(task_id: &str, title: &str) -> String {
    format!("{}-{}", slugify(task_id), slugify(title))
}

/// Branch name for a task, e.g. `conductor/42-fix-login`.
pub fn branch_name(prefix: &str, slug: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        slug.to_string()
    } else {
        format!("{prefix}/{slug}")
    }
}
