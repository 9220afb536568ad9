//! Lenient parsing of model output into findings, and line-span recovery by
//! locating quoted snippets in the source file.
//!
//! Models wrap JSON in markdown fences, surround it with prose, emit invalid
//! escape sequences (Windows paths are the classic case), leave trailing
//! commas, and keep talking after the closing brace. The extractor tries a
//! series of narrowing strategies, each followed by a character-scanner
//! repair pass; an irrecoverable response is captured to a temp file and
//! yields an empty finding list rather than an error.

use crate::error::{Error, Result};
use crate::types::{Confidence, SecurityFinding, Severity};
use chrono::Utc;
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use tracing::{error, warn};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse a raw model response into normalized findings. Never fails: an
/// undecodable response is dumped for diagnostics and produces `[]`.
pub fn parse_findings(raw_response: &str, file_path: &str) -> Vec<SecurityFinding> {
    match extract_json(raw_response) {
        Ok(value) => normalize_findings(&value, file_path),
        Err(e) => {
            let debug_file = save_debug_response(raw_response, file_path, &e);
            error!(
                file = file_path,
                error = %e,
                debug_file = debug_file.as_deref().unwrap_or("(unsaved)"),
                "Could not decode model response; skipping findings for this call"
            );
            Vec::new()
        }
    }
}

/// Anchor findings to source lines by locating their quoted snippets in the
/// target file, expanding each match with four lines of context. Findings
/// whose snippet cannot be located are kept unchanged.
pub fn locate_findings(findings: Vec<SecurityFinding>, target: &Path) -> Vec<SecurityFinding> {
    let Ok(bytes) = std::fs::read(target) else {
        warn!(file = %target.display(), "Could not read file for line-span recovery");
        return findings;
    };
    let content = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = content.lines().collect();

    findings
        .into_iter()
        .map(|mut finding| {
            if finding.code_snippet.is_empty() {
                return finding;
            }
            if let Some((start, end)) = locate_snippet(&finding.code_snippet, &lines) {
                finding.line_start = Some(start);
                finding.line_end = Some(end);
                finding.code_snippet = expand_snippet(&lines, start, end, 4);
            }
            finding
        })
        .collect()
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Extract a JSON value from a possibly fenced, prose-wrapped, or slightly
/// malformed response.
pub fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(serde_json::json!({ "reviews": [] }));
    }

    if let Some(body) = fenced_body(trimmed, "```json") {
        return parse_with_repair(body);
    }
    if let Some(body) = fenced_body(trimmed, "```") {
        return parse_with_repair(body);
    }
    if let Some(block) = first_balanced_block(trimmed) {
        if let Ok(value) = parse_with_repair(block) {
            return Ok(value);
        }
    }
    parse_with_repair(trimmed)
}

fn parse_with_repair(text: &str) -> Result<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    let repaired = repair_json(text);
    serde_json::from_str(&repaired).map_err(|e| Error::ResponseDecode(e.to_string()))
}

/// Body between an opening fence marker and the next closing fence (or the
/// end of the response when the model stopped mid-fence).
fn fenced_body<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find("```").unwrap_or(rest.len());
    Some(rest[..end].trim())
}

/// The first balanced `{...}` or `[...]` block, honoring strings.
fn first_balanced_block(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let (open_char, close_char) = if bytes[open] == b'{' { (b'{', b'}') } else { (b'[', b']') };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open_char => depth += 1,
            b if b == close_char => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Repair pass
// ---------------------------------------------------------------------------

/// Repair recoverable JSON damage: invalid escape sequences inside strings,
/// trailing commas, and prose after the final closing brace/bracket.
pub fn repair_json(text: &str) -> String {
    let escaped = fix_escape_sequences(text);
    let without_commas = strip_trailing_commas(&escaped);
    trim_after_last_close(&without_commas)
}

/// Single-pass scanner that rewrites `\x` into `\\x` for any `x` outside the
/// valid JSON escape set, tracking unescaped quotes to stay inside strings.
fn fix_escape_sequences(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            // A quote toggles the string state unless an odd run of
            // backslashes precedes it.
            let mut backslashes = 0;
            let mut j = i;
            while j > 0 && chars[j - 1] == '\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                in_string = !in_string;
            }
            out.push(c);
            i += 1;
            continue;
        }

        if in_string && c == '\\' && i + 1 < chars.len() {
            let next = chars[i + 1];
            match next {
                '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => {
                    out.push('\\');
                    out.push(next);
                    i += 2;
                }
                'u' => {
                    let valid = chars.len() > i + 5
                        && chars[i + 2..i + 6].iter().all(|c| c.is_ascii_hexdigit());
                    if valid {
                        out.push('\\');
                    } else {
                        out.push_str("\\\\");
                    }
                    i += 1;
                }
                _ => {
                    out.push_str("\\\\");
                    i += 1;
                }
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Drop commas that directly precede a closing brace or bracket.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next_significant =
                    chars[i + 1..].iter().find(|c| !c.is_whitespace()).copied();
                if !matches!(next_significant, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Remove trailing prose after the last closing brace/bracket matching the
/// opening character.
fn trim_after_last_close(text: &str) -> String {
    let trimmed = text.trim();
    let cut = if trimmed.starts_with('{') {
        trimmed.rfind('}').map(|i| i + 1)
    } else if trimmed.starts_with('[') {
        trimmed.rfind(']').map(|i| i + 1)
    } else {
        None
    };
    match cut {
        Some(end) => trimmed[..end].to_string(),
        None => trimmed.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Build findings from `{"reviews": [...]}` or a bare top-level array. A
/// malformed entry is skipped with a warning, never fatal.
fn normalize_findings(value: &Value, file_path: &str) -> Vec<SecurityFinding> {
    let empty = Vec::new();
    let reviews: &Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.get("reviews").and_then(|r| r.as_array()).unwrap_or(&empty),
        _ => &empty,
    };

    reviews
        .iter()
        .filter_map(|review| {
            let Some(obj) = review.as_object() else {
                warn!(file = file_path, "Skipping malformed finding entry (not an object)");
                return None;
            };

            let get_str = |key: &str| obj.get(key).and_then(|v| v.as_str()).unwrap_or("");
            let confidence_score = obj.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.7);

            Some(SecurityFinding {
                id: Uuid::new_v4(),
                issue: {
                    let issue = get_str("issue");
                    if issue.is_empty() { "Unknown issue".to_string() } else { issue.to_string() }
                },
                reasoning: get_str("reasoning").to_string(),
                mitigation: get_str("mitigation").to_string(),
                severity: Severity::parse(
                    obj.get("severity").and_then(|v| v.as_str()).unwrap_or("medium"),
                ),
                confidence: Confidence::from_score(confidence_score),
                file_path: file_path.to_string(),
                code_snippet: get_str("code_snippet").to_string(),
                line_start: obj.get("line_start").and_then(|v| v.as_u64()).map(|v| v as usize),
                line_end: obj.get("line_end").and_then(|v| v.as_u64()).map(|v| v as usize),
                cwe_id: obj.get("cwe_id").and_then(|v| v.as_str()).map(|s| s.to_string()),
                tags: obj
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|tags| {
                        tags.iter().filter_map(|t| t.as_str()).map(|s| s.to_string()).collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Line-span recovery
// ---------------------------------------------------------------------------

/// Find the first position where the snippet's normalized lines match the
/// file lines by substring containment at the same relative offsets.
/// Returns 1-based inclusive `(line_start, line_end)`.
pub fn locate_snippet(snippet: &str, file_lines: &[&str]) -> Option<(usize, usize)> {
    let snippet_lines: Vec<String> = snippet
        .trim()
        .lines()
        .map(|line| {
            let cleaned = line.trim();
            // Drop a "  123 | code" gutter if present.
            if let Some((prefix, rest)) = cleaned.split_once('|') {
                let prefix = prefix.trim();
                if !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()) {
                    return rest.trim().to_string();
                }
            }
            cleaned.to_string()
        })
        .collect();

    if snippet_lines.is_empty() || file_lines.is_empty() {
        return None;
    }

    'outer: for i in 0..file_lines.len() {
        for (j, snippet_line) in snippet_lines.iter().enumerate() {
            let Some(file_line) = file_lines.get(i + j) else { continue 'outer };
            if !snippet_line.is_empty() && !file_line.contains(snippet_line.as_str()) {
                continue 'outer;
            }
        }
        return Some((i + 1, i + snippet_lines.len()));
    }

    None
}

/// Render the matched region with `context` lines above and below, marking
/// finding lines with `>` and context lines with `|`.
pub fn expand_snippet(
    file_lines: &[&str],
    line_start: usize,
    line_end: usize,
    context: usize,
) -> String {
    let start_idx = line_start.saturating_sub(1).saturating_sub(context);
    let end_idx = (line_end + context).min(file_lines.len());

    (start_idx..end_idx)
        .map(|i| {
            let line_number = i + 1;
            let content = file_lines[i].trim_end();
            if line_number >= line_start && line_number <= line_end {
                format!("{line_number:4} > {content}")
            } else {
                format!("{line_number:4} | {content}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn save_debug_response(raw: &str, file_path: &str, error: &Error) -> Option<String> {
    let path = std::env::temp_dir()
        .join(format!("falconeye_failed_response_{}.txt", Utc::now().timestamp()));
    let mut file = std::fs::File::create(&path).ok()?;
    writeln!(file, "File: {file_path}").ok()?;
    writeln!(file, "Error: {error}").ok()?;
    writeln!(file, "Response length: {}", raw.len()).ok()?;
    writeln!(file, "{}", "=".repeat(80)).ok()?;
    file.write_all(raw.as_bytes()).ok()?;
    Some(path.display().to_string())
}
