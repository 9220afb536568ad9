//! tree-sitter structural metadata extraction.
//!
//! Extracts function definitions, imports, calls, class declarations, and
//! control-flow markers with 1-based line numbers across ten languages. The
//! output feeds prompt context assembly; it is never used for detection.

use crate::types::{
    CallInfo, ClassInfo, ControlFlowNode, FunctionInfo, ImportInfo, StructuralMetadata,
};
use std::collections::BTreeSet;
use tracing::warn;
use tree_sitter::{Language, Node, Parser};

// ---------------------------------------------------------------------------
// Language registry
// ---------------------------------------------------------------------------

/// Resolve a language name to its tree-sitter grammar.
///
/// Dart is detected and chunked like any other language but carries no
/// compiled grammar; it falls through to the empty-metadata path.
fn grammar_for(language: &str) -> Option<Language> {
    match language {
        "rust" => Some(tree_sitter_rust::LANGUAGE.into()),
        "typescript" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "javascript" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "python" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        "php" => Some(tree_sitter_php::LANGUAGE_PHP.into()),
        _ => None,
    }
}

/// Analyze one file. Unsupported languages yield empty metadata with
/// `language = "unknown"`; parse failures are logged and yield empty
/// metadata without aborting the caller.
pub fn analyze_file(relative_path: &str, content: &str, language: &str) -> StructuralMetadata {
    let Some(grammar) = grammar_for(language) else {
        return StructuralMetadata::empty(relative_path, "unknown");
    };

    let mut parser = Parser::new();
    if parser.set_language(&grammar).is_err() {
        warn!(file = relative_path, language, "Could not load grammar");
        return StructuralMetadata::empty(relative_path, language);
    }

    let Some(tree) = parser.parse(content, None) else {
        warn!(file = relative_path, language, "Parse failed");
        return StructuralMetadata::empty(relative_path, language);
    };

    let mut metadata = StructuralMetadata::empty(relative_path, language);
    let mut extractor = Extractor { source: content.as_bytes(), language, metadata: &mut metadata };

    let root = tree.root_node();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        extractor.walk(&child, None, &[]);
    }

    metadata.dependencies = metadata
        .imports
        .iter()
        .filter(|i| !i.is_relative && !i.module.is_empty())
        .map(|i| i.module.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    metadata
}

// ---------------------------------------------------------------------------
// Node classification
// ---------------------------------------------------------------------------

fn is_function_kind(kind: &str) -> bool {
    matches!(
        kind,
        "function_definition"       // python, c, cpp, php
            | "function_item"       // rust
            | "function_declaration" // javascript, typescript, go
            | "method_declaration"  // java, go
            | "method_definition"   // javascript, typescript
    )
}

fn is_class_kind(kind: &str) -> bool {
    matches!(
        kind,
        "class_definition"          // python
            | "class_declaration"   // javascript, typescript, java, php
            | "struct_item"         // rust
            | "enum_item"
            | "trait_item"
            | "interface_declaration" // typescript, java
            | "struct_specifier"    // c, cpp
            | "class_specifier"     // cpp
    )
}

fn is_import_kind(kind: &str) -> bool {
    matches!(
        kind,
        "import_statement"              // python, javascript, typescript
            | "import_from_statement"   // python
            | "use_declaration"         // rust
            | "import_declaration"      // go, java
            | "preproc_include"         // c, cpp
            | "namespace_use_declaration" // php
    )
}

fn is_call_kind(kind: &str) -> bool {
    matches!(
        kind,
        "call"                         // python
            | "call_expression"        // javascript, typescript, go, rust, c, cpp
            | "method_invocation"      // java
            | "function_call_expression" // php
            | "member_call_expression" // php
    )
}

fn control_flow_label(kind: &str) -> Option<&'static str> {
    match kind {
        "if_statement" | "if_expression" | "if_let_expression" => Some("if"),
        "while_statement" | "while_expression" | "do_statement" => Some("while"),
        "for_statement" | "for_expression" | "for_in_statement" | "foreach_statement"
        | "enhanced_for_statement" | "range_clause" => Some("for"),
        "try_statement" | "try_expression" | "catch_clause" => Some("try"),
        "switch_statement" | "match_expression" | "match_statement" => Some("switch"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Extraction walk
// ---------------------------------------------------------------------------

struct Extractor<'a> {
    source: &'a [u8],
    language: &'a str,
    metadata: &'a mut StructuralMetadata,
}

impl<'a> Extractor<'a> {
    fn text(&self, node: &Node) -> String {
        node.utf8_text(self.source).unwrap_or("").to_string()
    }

    fn line(&self, node: &Node) -> usize {
        node.start_position().row + 1
    }

    /// Recursive walk. `class_idx` is the index of the enclosing class (for
    /// method attribution); `decorators` carries decorator text down from a
    /// `decorated_definition` wrapper.
    fn walk(&mut self, node: &Node, class_idx: Option<usize>, decorators: &[String]) {
        let kind = node.kind();

        if kind == "decorated_definition" {
            let mut collected = Vec::new();
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "decorator" {
                    collected.push(self.text(&child));
                }
            }
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() != "decorator" {
                    self.walk(&child, class_idx, &collected);
                }
            }
            return;
        }

        if is_function_kind(kind) {
            self.extract_function(node, class_idx, decorators);
            // Descend for nested functions and the calls inside the body.
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                self.walk(&child, class_idx, &[]);
            }
            return;
        }

        if is_class_kind(kind) {
            let idx = self.extract_class(node);
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                self.walk(&child, idx.or(class_idx), &[]);
            }
            return;
        }

        if is_import_kind(kind) {
            self.extract_import(node);
            return;
        }

        if is_call_kind(kind) {
            self.extract_call(node);
            // Calls nest (e.g. `f(g(x))`).
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                self.walk(&child, class_idx, &[]);
            }
            return;
        }

        if let Some(label) = control_flow_label(kind) {
            let condition = node
                .child_by_field_name("condition")
                .map(|c| truncate(&self.text(&c), 120));
            self.metadata.control_flow.push(ControlFlowNode {
                node_type: label.to_string(),
                line: self.line(node),
                condition,
            });
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(&child, class_idx, &[]);
        }
    }

    fn extract_function(&mut self, node: &Node, class_idx: Option<usize>, decorators: &[String]) {
        let name = self.function_name(node);
        if name.is_empty() {
            return;
        }

        let parameters = node
            .child_by_field_name("parameters")
            .map(|p| split_parameters(&self.text(&p)))
            .unwrap_or_default();

        let is_async = {
            let mut cursor = node.walk();
            let result = node.children(&mut cursor).any(|c| c.kind() == "async");
            result
        };

        if let Some(idx) = class_idx {
            if let Some(class) = self.metadata.classes.get_mut(idx) {
                class.methods.push(name.clone());
            }
        }

        self.metadata.functions.push(FunctionInfo {
            name,
            line: self.line(node),
            parameters,
            is_async,
            decorators: decorators.to_vec(),
        });
    }

    fn function_name(&self, node: &Node) -> String {
        if let Some(name_node) = node.child_by_field_name("name") {
            return self.text(&name_node).trim().to_string();
        }

        // C/C++: the identifier hides inside the declarator chain.
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(inner) = decl.child_by_field_name("declarator") {
                return self.text(&inner).trim().to_string();
            }
            let text = self.text(&decl);
            let trimmed = text.trim();
            if let Some(paren) = trimmed.find('(') {
                return trimmed[..paren].trim().to_string();
            }
            return trimmed.to_string();
        }

        String::new()
    }

    fn extract_class(&mut self, node: &Node) -> Option<usize> {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(&n).trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            return None;
        }

        let bases = node
            .child_by_field_name("superclasses")
            .or_else(|| node.child_by_field_name("superclass"))
            .or_else(|| node.child_by_field_name("heritage"))
            .map(|n| {
                self.text(&n)
                    .trim_start_matches(['(', ':'])
                    .trim_end_matches(')')
                    .split(',')
                    .map(|s| s.trim().trim_start_matches("extends").trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        self.metadata.classes.push(ClassInfo {
            name,
            line: self.line(node),
            bases,
            methods: Vec::new(),
        });
        Some(self.metadata.classes.len() - 1)
    }

    fn extract_import(&mut self, node: &Node) {
        let statement = truncate(self.text(node).lines().next().unwrap_or(""), 200);
        let line = self.line(node);
        let kind = node.kind();

        let (module, imported_names, is_relative) = match kind {
            "preproc_include" => {
                let raw = node
                    .child_by_field_name("path")
                    .map(|p| self.text(&p))
                    .unwrap_or_default();
                // Quoted includes are project-relative; angle brackets are not.
                let relative = raw.starts_with('"');
                let module =
                    raw.trim_matches(['"', '<', '>']).trim().to_string();
                (module, Vec::new(), relative)
            }
            "import_from_statement" => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|m| self.text(&m))
                    .unwrap_or_default();
                let mut names = Vec::new();
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == "dotted_name" || child.kind() == "aliased_import" {
                        let text = self.text(&child);
                        if text != module {
                            names.push(text);
                        }
                    }
                }
                let relative = module.starts_with('.');
                (module, names, relative)
            }
            "import_statement" => {
                // Python `import x.y`, or JS/TS `import { a } from "mod"`.
                if let Some(source) = node.child_by_field_name("source") {
                    let module = self.text(&source).trim_matches(['"', '\'']).to_string();
                    let relative = module.starts_with('.');
                    (module, Vec::new(), relative)
                } else {
                    let mut module = String::new();
                    let mut cursor = node.walk();
                    for child in node.children(&mut cursor) {
                        if matches!(child.kind(), "dotted_name" | "aliased_import") {
                            module = self.text(&child);
                            break;
                        }
                    }
                    (module, Vec::new(), false)
                }
            }
            "use_declaration" => {
                let module = node
                    .child_by_field_name("argument")
                    .map(|a| self.text(&a))
                    .unwrap_or_default();
                let relative = module.starts_with("crate")
                    || module.starts_with("self")
                    || module.starts_with("super");
                (module, Vec::new(), relative)
            }
            _ => {
                // go/java/php: take the first string or identifier path child.
                let mut module = String::new();
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    match child.kind() {
                        "import_spec" | "import_spec_list" => {
                            module = self
                                .text(&child)
                                .lines()
                                .next()
                                .unwrap_or("")
                                .trim_matches(['(', '"', ' '])
                                .to_string();
                        }
                        "interpreted_string_literal" | "string_literal" | "scoped_identifier"
                        | "qualified_name" | "identifier" => {
                            module = self.text(&child).trim_matches('"').to_string();
                        }
                        _ => continue,
                    }
                    if !module.is_empty() {
                        break;
                    }
                }
                (module, Vec::new(), false)
            }
        };

        self.metadata.imports.push(ImportInfo {
            statement,
            line,
            module,
            imported_names,
            is_relative,
        });
    }

    fn extract_call(&mut self, node: &Node) {
        let callee = node
            .child_by_field_name("function")
            .or_else(|| node.child_by_field_name("name"))
            .map(|f| self.text(&f))
            .unwrap_or_else(|| self.text(node));
        let callee = truncate(callee.lines().next().unwrap_or(""), 120);
        if callee.is_empty() {
            return;
        }
        // Java names the receiver separately; reattach for readability.
        let function = if self.language == "java" {
            match node.child_by_field_name("object") {
                Some(obj) => format!("{}.{}", self.text(&obj), callee),
                None => callee,
            }
        } else {
            callee
        };

        self.metadata.calls.push(CallInfo { function, line: self.line(node) });
    }
}

fn split_parameters(raw: &str) -> Vec<String> {
    raw.trim_matches(['(', ')'])
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty() && p != "self" && p != "&self" && p != "&mut self")
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_functions_imports_and_flow() {
        let src = r#"
import os
from .helpers import clean

@app.route("/login")
async def login(user, password):
    if user == "admin":
        os.system("true")
    return clean(password)

class Session(Base):
    def refresh(self):
        pass
"#;
        let meta = analyze_file("app.py", src, "python");

        let login = meta.functions.iter().find(|f| f.name == "login").expect("login fn");
        assert!(login.is_async);
        assert_eq!(login.parameters, vec!["user", "password"]);
        assert!(login.decorators.iter().any(|d| d.contains("app.route")));

        assert_eq!(meta.imports.len(), 2);
        assert!(meta.imports.iter().any(|i| i.module == "os" && !i.is_relative));
        assert!(meta.imports.iter().any(|i| i.module == ".helpers" && i.is_relative));
        assert_eq!(meta.dependencies, vec!["os"]);

        let session = meta.classes.iter().find(|c| c.name == "Session").expect("class");
        assert_eq!(session.bases, vec!["Base"]);
        assert!(session.methods.contains(&"refresh".to_string()));

        assert!(meta.control_flow.iter().any(|n| n.node_type == "if"));
        assert!(meta.calls.iter().any(|c| c.function.contains("os.system")));
    }

    #[test]
    fn rust_items() {
        let src = r#"
use std::collections::HashMap;

pub struct Store {
    items: HashMap<String, u64>,
}

pub fn insert(store: &mut Store, key: String) {
    for _ in 0..3 {
        store.items.insert(key.clone(), 1);
    }
}
"#;
        let meta = analyze_file("store.rs", src, "rust");
        assert!(meta.functions.iter().any(|f| f.name == "insert"));
        assert!(meta.classes.iter().any(|c| c.name == "Store"));
        assert!(meta.imports.iter().any(|i| i.module.contains("HashMap")));
        assert!(meta.control_flow.iter().any(|n| n.node_type == "for"));
        assert!(!meta.calls.is_empty());
    }

    #[test]
    fn c_function_names_via_declarator() {
        let src = "#include \"util.h\"\n\nint add(int a, int b) {\n    return a + b;\n}\n";
        let meta = analyze_file("math.c", src, "c");
        assert!(meta.functions.iter().any(|f| f.name == "add"));
        let include = &meta.imports[0];
        assert_eq!(include.module, "util.h");
        assert!(include.is_relative);
    }

    #[test]
    fn unsupported_language_is_empty_unknown() {
        let meta = analyze_file("x.cob", "MOVE A TO B.", "cobol");
        assert_eq!(meta.language, "unknown");
        assert!(meta.functions.is_empty());
        assert!(meta.imports.is_empty());
    }

    #[test]
    fn dart_has_no_grammar_but_does_not_fail() {
        let meta = analyze_file("main.dart", "void main() {}\n", "dart");
        assert_eq!(meta.language, "unknown");
    }

    #[test]
    fn line_numbers_are_one_based() {
        let src = "fn first() {}\n\nfn second() {}\n";
        let meta = analyze_file("two.rs", src, "rust");
        let first = meta.functions.iter().find(|f| f.name == "first").unwrap();
        let second = meta.functions.iter().find(|f| f.name == "second").unwrap();
        assert_eq!(first.line, 1);
        assert_eq!(second.line, 3);
    }
}
