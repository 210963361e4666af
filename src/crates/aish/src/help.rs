//! Static documentation path references
//!
//! `aish help` and `aish <component> help` print paths into the training
//! and user documentation trees; help content is never generated
//! dynamically.

use std::path::{Path, PathBuf};

/// Path to the top-level shell documentation
pub fn shell_help(root: &Path) -> PathBuf {
    root.join("docs/aish/README.md")
}

/// Path to a component's documentation
pub fn component_help(root: &Path, component: &str) -> PathBuf {
    root.join("docs/components").join(format!("{}.md", component))
}

/// Path printed alongside error diagnostics for a failure category
pub fn error_help(root: &Path, code: &str) -> PathBuf {
    root.join("docs/errors").join(format!("{}.md", code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_under_root() {
        let root = Path::new("/srv/tekton");
        assert_eq!(
            shell_help(root),
            PathBuf::from("/srv/tekton/docs/aish/README.md")
        );
        assert_eq!(
            component_help(root, "apollo"),
            PathBuf::from("/srv/tekton/docs/components/apollo.md")
        );
        assert_eq!(
            error_help(root, "unknown-ci"),
            PathBuf::from("/srv/tekton/docs/errors/unknown-ci.md")
        );
    }
}
