//! File-name denylist applied to tree paths before any content is fetched.

/// Case-insensitive denylist of trailing path segments.
///
/// A name matches a path when the path equals it or ends with `/` followed by
/// it, so `README.md` excludes `README.md` and `docs/readme.md` but not
/// `NOT_README.md`.  Names containing `/` match the same number of trailing
/// segments.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    names: Vec<String>,
}

impl ExclusionList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim_matches('/').to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        let path = path.to_lowercase();
        self.names.iter().any(|name| {
            path == *name
                || path
                    .strip_suffix(name.as_str())
                    .is_some_and(|prefix| prefix.ends_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ExclusionList {
        ExclusionList::new(["README.md", ".gitattributes", ".gitignore"])
    }

    #[test]
    fn excludes_root_files() {
        let list = defaults();
        assert!(list.is_excluded("README.md"));
        assert!(list.is_excluded(".gitignore"));
        assert!(list.is_excluded(".gitattributes"));
    }

    #[test]
    fn excludes_nested_files() {
        let list = defaults();
        assert!(list.is_excluded("assets/README.md"));
        assert!(list.is_excluded("a/b/c/.gitignore"));
    }

    #[test]
    fn comparison_ignores_case() {
        let list = defaults();
        assert!(list.is_excluded("readme.MD"));
        assert!(list.is_excluded("Docs/ReadMe.md"));
        assert!(ExclusionList::new([".GITIGNORE"]).is_excluded("x/.gitignore"));
    }

    #[test]
    fn partial_segment_is_kept() {
        let list = defaults();
        assert!(!list.is_excluded("NOT_README.md"));
        assert!(!list.is_excluded("assets/my.gitignore"));
        assert!(!list.is_excluded("README.md.bak"));
        assert!(!list.is_excluded("pack.mcmeta"));
    }

    #[test]
    fn multi_segment_names() {
        let list = ExclusionList::new(["docs/notes.txt"]);
        assert!(list.is_excluded("docs/notes.txt"));
        assert!(list.is_excluded("a/docs/notes.txt"));
        assert!(!list.is_excluded("notes.txt"));
        assert!(!list.is_excluded("mydocs/notes.txt"));
    }

    #[test]
    fn blank_names_are_ignored() {
        let list = ExclusionList::new(["", "/"]);
        assert!(!list.is_excluded(""));
        assert!(!list.is_excluded("anything"));
    }
}
