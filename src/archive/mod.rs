//! Repository-to-ZIP assembly.
//!
//! A download resolves the branch to its blob list, drops excluded names,
//! then fetches raw contents in fixed-size waves and appends each buffer to a
//! streaming ZIP writer whose output is piped straight into the HTTP body.

pub mod assemble;
pub mod filter;

pub use assemble::{stream_archive, ArchiveJob, AssemblyReport};
pub use filter::ExclusionList;

use crate::forge::TreeEntry;

/// Split a blob listing into the paths to fetch and the number excluded.
///
/// Tree order is preserved.
pub fn select_files(entries: Vec<TreeEntry>, exclusions: &ExclusionList) -> (Vec<String>, usize) {
    let total = entries.len();
    let files: Vec<String> = entries
        .into_iter()
        .filter(TreeEntry::is_blob)
        .map(|e| e.path)
        .filter(|p| !exclusions.is_excluded(p))
        .collect();
    let excluded = total - files.len();
    (files, excluded)
}

/// Attachment name for a download: `{repo}-{branch}[-{suffix}].zip`.
pub fn archive_file_name(repo: &str, branch: &str, suffix: Option<&str>) -> String {
    let suffix = suffix.map(clean_suffix).unwrap_or_default();
    let mut name = format!("{}-{}", replace_unsafe(repo), replace_unsafe(branch));
    if !suffix.is_empty() {
        name.push('-');
        name.push_str(&suffix);
    }
    name.push_str(".zip");
    name
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Suffixes are user-supplied; anything outside `[A-Za-z0-9._-]` is dropped.
fn clean_suffix(suffix: &str) -> String {
    suffix.chars().filter(|c| is_name_char(*c)).collect()
}

fn replace_unsafe(part: &str) -> String {
    part.chars()
        .map(|c| if is_name_char(c) { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(path: &str) -> TreeEntry {
        TreeEntry {
            path: path.to_string(),
            kind: "blob".to_string(),
            size: None,
        }
    }

    #[test]
    fn file_name_without_suffix() {
        assert_eq!(archive_file_name("pack", "main", None), "pack-main.zip");
        assert_eq!(archive_file_name("pack", "main", Some("")), "pack-main.zip");
    }

    #[test]
    fn file_name_with_clean_suffix() {
        assert_eq!(
            archive_file_name("pack", "1.20", Some("v2_final")),
            "pack-1.20-v2_final.zip"
        );
    }

    #[test]
    fn file_name_strips_injection_from_suffix() {
        assert_eq!(
            archive_file_name("pack", "main", Some("x\"; rm -rf /")),
            "pack-main-xrm-rf.zip"
        );
        assert_eq!(archive_file_name("pack", "main", Some("\"/;")), "pack-main.zip");
    }

    #[test]
    fn file_name_flattens_branch_slashes() {
        assert_eq!(
            archive_file_name("pack", "feature/new-sky", None),
            "pack-feature-new-sky.zip"
        );
    }

    #[test]
    fn select_files_filters_and_counts() {
        let exclusions = ExclusionList::new(["README.md", ".gitignore"]);
        let entries = vec![
            blob("README.md"),
            blob("pack.mcmeta"),
            blob("assets/.gitignore"),
            blob("assets/sky.png"),
        ];
        let (files, excluded) = select_files(entries, &exclusions);
        assert_eq!(files, vec!["pack.mcmeta", "assets/sky.png"]);
        assert_eq!(excluded, 2);
    }
}
