//! Primary-language detection by extension census over the source tree.

use crate::error::{Error, Result};
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::Path;

/// Language → file extensions (without dots).
pub const LANGUAGE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("c", &["c", "h"]),
    ("cpp", &["cpp", "cc", "cxx", "hpp", "hh"]),
    ("python", &["py"]),
    ("rust", &["rs"]),
    ("go", &["go"]),
    ("php", &["php"]),
    ("java", &["java"]),
    ("dart", &["dart"]),
    ("javascript", &["js", "jsx", "mjs", "cjs"]),
    ("typescript", &["ts", "tsx"]),
    ("ruby", &["rb", "rake"]),
];

/// Directories skipped during the census walk.
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "build",
    "dist",
    "target",
    ".git",
    ".svn",
    "vendor",
    ".dart_tool",
    "Pods",
    "DerivedData",
];

/// Binary artifact suffixes ignored during the census.
const SKIP_SUFFIXES: &[&str] = &[".pyc", ".class", ".o", ".so", ".dylib"];

pub fn extensions_for(language: &str) -> &'static [&'static str] {
    LANGUAGE_EXTENSIONS
        .iter()
        .find(|(lang, _)| *lang == language)
        .map(|(_, exts)| *exts)
        .unwrap_or(&[])
}

pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let ext = ext.to_lowercase();
    LANGUAGE_EXTENSIONS
        .iter()
        .find(|(_, exts)| exts.contains(&ext.as_str()))
        .map(|(lang, _)| *lang)
}

pub fn is_supported_language(language: &str) -> bool {
    let lower = language.to_lowercase();
    LANGUAGE_EXTENSIONS.iter().any(|(lang, _)| *lang == lower)
}

pub fn supported_languages() -> Vec<&'static str> {
    LANGUAGE_EXTENSIONS.iter().map(|(lang, _)| *lang).collect()
}

/// Detect the primary language of a codebase root or single file.
pub fn detect_language(path: &Path, forced: Option<&str>) -> Result<String> {
    if let Some(forced) = forced {
        if !is_supported_language(forced) {
            return Err(Error::LanguageDetection(format!("unsupported language: {forced}")));
        }
        return Ok(forced.to_lowercase());
    }

    if path.is_file() {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        return language_for_extension(ext)
            .map(|l| l.to_string())
            .ok_or_else(|| Error::LanguageDetection(format!("unsupported file type: .{ext}")));
    }

    let counts = count_files_by_language(path);
    if counts.is_empty() {
        return Err(Error::LanguageDetection(format!(
            "no supported source files found in {}",
            path.display()
        )));
    }

    Ok(determine_primary(&counts).to_string())
}

/// All languages present in the tree, sorted by file count descending.
pub fn detect_all_languages(path: &Path) -> Result<Vec<String>> {
    if path.is_file() {
        return detect_language(path, None).map(|l| vec![l]);
    }
    let counts = count_files_by_language(path);
    if counts.is_empty() {
        return Err(Error::LanguageDetection(format!(
            "no supported source files found in {}",
            path.display()
        )));
    }
    let mut languages: Vec<(&str, usize)> = counts.iter().map(|(l, c)| (*l, *c)).collect();
    languages.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    Ok(languages.into_iter().map(|(l, _)| l.to_string()).collect())
}

/// Count source files per language, skipping noise directories, hidden files,
/// and binary artifacts.
fn count_files_by_language(root: &Path) -> HashMap<&'static str, usize> {
    let mut counts: HashMap<&'static str, usize> = HashMap::new();

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .filter_entry(|entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !SKIP_DIRS.contains(&name.as_ref());
            }
            true
        })
        .build();

    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if SKIP_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            continue;
        }
        let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or("");
        if let Some(language) = language_for_extension(ext) {
            *counts.entry(language).or_default() += 1;
        }
    }

    counts
}

/// Pick the dominant language: > 60% wins outright, otherwise apply
/// mixed-project tie-breaks.
fn determine_primary(counts: &HashMap<&'static str, usize>) -> &'static str {
    let total: usize = counts.values().sum();
    let mut sorted: Vec<(&str, usize)> = counts.iter().map(|(l, c)| (*l, *c)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let (top, top_count) = sorted[0];
    if total > 0 && (top_count as f64 / total as f64) * 100.0 > 60.0 {
        return top;
    }

    // Mixed-language tie-breaks.
    if counts.contains_key("c") && counts.contains_key("rust") {
        return "rust";
    }
    if let Some(&dart) = counts.get("dart") {
        if (dart as f64 / total as f64) * 100.0 > 20.0 {
            return "dart";
        }
    }
    if let Some(&python) = counts.get("python") {
        if (python as f64 / total as f64) * 100.0 > 25.0 {
            return "python";
        }
    }
    if counts.contains_key("typescript") && counts.contains_key("javascript") {
        return "typescript";
    }

    top
}
