//! File discovery: source enumeration by language extension, documentation
//! enumeration by extension and name patterns, and document classification.

use crate::language;
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Documentation file extensions (without dots).
const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc", "asciidoc"];

/// Documentation filename prefixes matched case-insensitively.
const DOC_NAME_PREFIXES: &[&str] = &["README", "CONTRIBUTING", "SECURITY", "CHANGELOG", "LICENSE"];

/// Directories whose entire contents count as documentation.
const DOC_DIRS: &[&str] = &["docs", "documentation"];

/// Extensions that are never text documents.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "pdf", "zip", "tar", "gz", "exe", "bin", "woff",
    "woff2", "ttf", "eot", "svg",
];

/// Walk the tree once, skipping hidden entries and the standard noise
/// directories, and hand every file to `visit`.
fn walk_files(root: &Path, mut visit: impl FnMut(&Path)) {
    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(|entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !language::SKIP_DIRS.contains(&name.as_ref());
            }
            true
        })
        .build();

    for entry in walker.flatten() {
        if entry.file_type().is_some_and(|ft| ft.is_file()) {
            visit(entry.path());
        }
    }
}

/// Substring exclusion against both the relative and absolute path form.
/// Glob markers in patterns are stripped, leaving the stable core.
fn is_excluded(root: &Path, path: &Path, excluded_patterns: &[String]) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/");
    let absolute = path.to_string_lossy().replace('\\', "/");

    excluded_patterns.iter().any(|pattern| {
        let core = pattern.replace("**", "").replace('*', "");
        !core.is_empty() && (relative.contains(&core) || absolute.contains(&core))
    })
}

/// Enumerate source files for `language` under `root`, minus exclusions.
pub fn discover_source_files(
    root: &Path,
    language: &str,
    excluded_patterns: &[String],
) -> Vec<PathBuf> {
    let extensions = language::extensions_for(language);
    let mut files = Vec::new();

    walk_files(root, |path| {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if !extensions.contains(&ext.as_str()) {
            return;
        }
        if !is_excluded(root, path, excluded_patterns) {
            files.push(path.to_path_buf());
        }
    });

    files.sort();
    files
}

/// Enumerate documentation files: doc extensions, well-known filenames, and
/// everything under `docs/` or `documentation/`, minus binaries and
/// exclusions.
pub fn discover_documents(root: &Path, excluded_patterns: &[String]) -> Vec<PathBuf> {
    let mut found: BTreeSet<PathBuf> = BTreeSet::new();

    walk_files(root, |path| {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            return;
        }

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let name_upper = name.to_uppercase();

        let by_extension = DOC_EXTENSIONS.contains(&ext.as_str());
        let by_name = DOC_NAME_PREFIXES.iter().any(|p| name_upper.starts_with(p));
        let by_dir = path
            .strip_prefix(root)
            .ok()
            .map(|rel| {
                rel.components().any(|c| {
                    let part = c.as_os_str().to_string_lossy().to_lowercase();
                    DOC_DIRS.contains(&part.as_str())
                })
            })
            .unwrap_or(false);

        if (by_extension || by_name || by_dir) && !is_excluded(root, path, excluded_patterns) {
            found.insert(path.to_path_buf());
        }
    });

    found.into_iter().collect()
}

/// Classify a document by filename and relative path.
pub fn classify_document(filename: &str, relative_path: &str) -> &'static str {
    let name_upper = filename.to_uppercase();
    let path_lower = relative_path.to_lowercase();

    if name_upper.contains("README") {
        "readme"
    } else if name_upper.contains("CONTRIBUTING") {
        "contributing"
    } else if name_upper.contains("SECURITY") {
        "security_policy"
    } else if name_upper.contains("CHANGELOG") {
        "changelog"
    } else if name_upper.contains("LICENSE") {
        "license"
    } else if name_upper.contains("API") || path_lower.contains("api") {
        "api_doc"
    } else if name_upper.contains("ARCHITECTURE") || path_lower.contains("architecture") {
        "architecture"
    } else if name_upper.contains("DESIGN") || path_lower.contains("design") {
        "design_doc"
    } else if name_upper.contains("GUIDE") || path_lower.contains("tutorial") {
        "guide"
    } else {
        "documentation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_language_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn main() {}\n").unwrap();

        let files = discover_source_files(dir.path(), "python", &[]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.py"));
    }

    #[test]
    fn exclusion_patterns_match_substrings() {
        let dir = tempfile::tempdir().unwrap();
        let generated = dir.path().join("generated");
        std::fs::create_dir(&generated).unwrap();
        std::fs::write(generated.join("gen.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("main.py"), "y = 2\n").unwrap();

        let files =
            discover_source_files(dir.path(), "python", &["*/generated/*".to_string()]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("main.py"));
    }

    #[test]
    fn documents_by_extension_name_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# hi\n").unwrap();
        std::fs::write(dir.path().join("LICENSE"), "MIT\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "notes\n").unwrap();
        std::fs::write(dir.path().join("logo.png"), [0u8, 1, 2]).unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir(&docs).unwrap();
        std::fs::write(docs.join("setup.html"), "<html></html>\n").unwrap();
        std::fs::write(dir.path().join("main.py"), "x = 1\n").unwrap();

        let found = discover_documents(dir.path(), &[]);
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"README.md".to_string()));
        assert!(names.contains(&"LICENSE".to_string()));
        assert!(names.contains(&"notes.txt".to_string()));
        assert!(names.contains(&"setup.html".to_string()));
        assert!(!names.contains(&"logo.png".to_string()));
        assert!(!names.contains(&"main.py".to_string()));
    }

    #[test]
    fn classification() {
        assert_eq!(classify_document("README.md", "README.md"), "readme");
        assert_eq!(classify_document("SECURITY.md", "SECURITY.md"), "security_policy");
        assert_eq!(classify_document("api.md", "docs/api.md"), "api_doc");
        assert_eq!(classify_document("overview.md", "docs/architecture/overview.md"), "architecture");
        assert_eq!(classify_document("notes.txt", "notes.txt"), "documentation");
    }
}
