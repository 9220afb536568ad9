//! Language plugins: per-language analysis context registered into a map at
//! initialization.
//!
//! A plugin carries the non-semantic knobs the review pipeline needs for one
//! language: vulnerability categories and framework names (context the model
//! reasons with, never matching rules), a chunking strategy, and the system
//! prompt assembled from that data. Prompt prose itself is one shared
//! template; only the structured lists vary per language.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingStrategy {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        Self { chunk_size: 50, chunk_overlap: 10 }
    }
}

pub trait LanguagePlugin: Send + Sync {
    fn language_name(&self) -> &'static str;

    /// Extensions with leading dots, e.g. `[".py", ".pyw"]`.
    fn file_extensions(&self) -> &'static [&'static str];

    /// Vulnerability categories the model should weigh for this language.
    fn vulnerability_categories(&self) -> &'static [&'static str];

    /// Frameworks and libraries commonly seen with this language.
    fn framework_context(&self) -> &'static [&'static str] {
        &[]
    }

    fn chunking_strategy(&self) -> ChunkingStrategy {
        ChunkingStrategy::default()
    }

    /// System prompt for security analysis of this language.
    fn system_prompt(&self) -> String {
        build_system_prompt(
            self.language_name(),
            self.vulnerability_categories(),
            self.framework_context(),
        )
    }

    /// Prompt for the second-pass validation of candidate findings.
    fn validation_prompt(&self) -> String {
        format!(
            "You are validating candidate security findings in {} code. Re-evaluate each \
             finding against the code and its context, discard false positives, and keep \
             only genuine, exploitable issues. Respond with JSON only, in the same \
             {{\"reviews\": [...]}} shape you received.",
            self.language_name()
        )
    }
}

/// Shared prompt template: one body of prose, per-language lists spliced in.
fn build_system_prompt(
    language: &str,
    categories: &[&str],
    frameworks: &[&str],
) -> String {
    let mut prompt = format!(
        "You are an expert security analyst reviewing {language} code. Reason deeply about \
         how untrusted input flows through the code, what validation exists and whether it \
         can be bypassed, and whether potential issues are actually exploitable. Use the \
         structural metadata, related code, and documentation provided as context.\n"
    );

    if !categories.is_empty() {
        prompt.push_str("\nVulnerability categories to weigh for this language:\n");
        for category in categories {
            prompt.push_str("- ");
            prompt.push_str(category);
            prompt.push('\n');
        }
    }

    if !frameworks.is_empty() {
        prompt.push_str("\nCommonly used frameworks and libraries:\n");
        for framework in frameworks {
            prompt.push_str("- ");
            prompt.push_str(framework);
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\nRespond with JSON only, in the shape {\"reviews\": [{\"issue\": str, \
         \"reasoning\": str, \"mitigation\": str, \"severity\": \
         \"critical|high|medium|low|info\", \"confidence\": number in [0,1], \
         \"code_snippet\": str, \"cwe_id\": str?, \"tags\": [str]}]}. Return \
         {\"reviews\": []} when the code is clean.",
    );
    prompt
}

// ---------------------------------------------------------------------------
// Built-in plugins
// ---------------------------------------------------------------------------

struct PythonPlugin;

impl LanguagePlugin for PythonPlugin {
    fn language_name(&self) -> &'static str {
        "python"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".py", ".pyw"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "Command Injection",
            "SQL Injection",
            "Code Injection (eval/exec)",
            "Deserialization (pickle)",
            "Path Traversal",
            "SSRF",
            "XXE",
            "Cryptographic Issues",
            "Authentication/Authorization",
            "Template Injection",
            "Insecure Randomness",
            "Hardcoded Secrets",
            "Open Redirect",
            "CSRF",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Django", "Flask", "FastAPI", "SQLAlchemy", "Requests", "Celery"]
    }
}

struct JavaScriptPlugin;

impl LanguagePlugin for JavaScriptPlugin {
    fn language_name(&self) -> &'static str {
        "javascript"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".js", ".jsx", ".mjs", ".cjs"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "Cross-Site Scripting (XSS)",
            "Prototype Pollution",
            "Command Injection",
            "SQL/NoSQL Injection",
            "Insecure Deserialization",
            "Path Traversal",
            "SSRF",
            "Open Redirect",
            "Regex Denial of Service",
            "Hardcoded Secrets",
            "Insecure JWT Handling",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Node.js", "Express", "React", "Next.js", "Electron"]
    }
}

struct TypeScriptPlugin;

impl LanguagePlugin for TypeScriptPlugin {
    fn language_name(&self) -> &'static str {
        "typescript"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".ts", ".tsx"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        JavaScriptPlugin.vulnerability_categories()
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Node.js", "Express", "NestJS", "React", "Angular"]
    }
}

struct GoPlugin;

impl LanguagePlugin for GoPlugin {
    fn language_name(&self) -> &'static str {
        "go"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".go"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "Command Injection",
            "SQL Injection",
            "Path Traversal",
            "SSRF",
            "Race Conditions",
            "Improper Error Handling",
            "Insecure TLS Configuration",
            "Integer Overflow",
            "Hardcoded Secrets",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["net/http", "Gin", "Echo", "gRPC", "database/sql"]
    }
}

struct RustPlugin;

impl LanguagePlugin for RustPlugin {
    fn language_name(&self) -> &'static str {
        "rust"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".rs"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "Unsafe Block Misuse",
            "Integer Overflow",
            "Command Injection",
            "Path Traversal",
            "Panic-based Denial of Service",
            "Race Conditions",
            "Insecure Deserialization",
            "Cryptographic Issues",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["tokio", "actix-web", "axum", "serde", "sqlx"]
    }
    fn chunking_strategy(&self) -> ChunkingStrategy {
        // Rust items run long; larger chunks keep whole functions together.
        ChunkingStrategy { chunk_size: 60, chunk_overlap: 10 }
    }
}

struct CCppPlugin;

impl LanguagePlugin for CCppPlugin {
    fn language_name(&self) -> &'static str {
        "c"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".c", ".h", ".cpp", ".cc", ".cxx", ".hpp", ".hh"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "Buffer Overflow",
            "Use After Free",
            "Double Free",
            "Integer Overflow/Underflow",
            "Format String",
            "Command Injection",
            "Null Pointer Dereference",
            "Off-by-One",
            "Race Conditions (TOCTOU)",
            "Uninitialized Memory",
        ]
    }
}

struct CppPlugin;

impl LanguagePlugin for CppPlugin {
    fn language_name(&self) -> &'static str {
        "cpp"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".cpp", ".cc", ".cxx", ".hpp", ".hh"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        CCppPlugin.vulnerability_categories()
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["STL", "Boost", "Qt"]
    }
}

struct JavaPlugin;

impl LanguagePlugin for JavaPlugin {
    fn language_name(&self) -> &'static str {
        "java"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".java"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "SQL Injection",
            "Insecure Deserialization",
            "XXE",
            "Path Traversal",
            "Expression Language Injection",
            "LDAP Injection",
            "SSRF",
            "Insecure Reflection",
            "Cryptographic Issues",
            "Hardcoded Secrets",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Spring", "Hibernate", "Jakarta EE", "Log4j"]
    }
}

struct PhpPlugin;

impl LanguagePlugin for PhpPlugin {
    fn language_name(&self) -> &'static str {
        "php"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".php"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "SQL Injection",
            "Cross-Site Scripting (XSS)",
            "Remote File Inclusion",
            "Local File Inclusion",
            "Command Injection",
            "Insecure Deserialization (unserialize)",
            "Type Juggling",
            "Session Fixation",
            "CSRF",
            "Upload Handling",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Laravel", "Symfony", "WordPress", "Composer"]
    }
}

struct DartPlugin;

impl LanguagePlugin for DartPlugin {
    fn language_name(&self) -> &'static str {
        "dart"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".dart"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "Insecure Data Storage",
            "Certificate Validation Bypass",
            "Hardcoded Secrets",
            "Insecure Deep Links",
            "WebView Injection",
            "Insecure Randomness",
            "Path Traversal",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Flutter", "dio", "shared_preferences"]
    }
}

struct RubyPlugin;

impl LanguagePlugin for RubyPlugin {
    fn language_name(&self) -> &'static str {
        "ruby"
    }
    fn file_extensions(&self) -> &'static [&'static str] {
        &[".rb", ".rake"]
    }
    fn vulnerability_categories(&self) -> &'static [&'static str] {
        &[
            "SQL Injection",
            "Command Injection",
            "Mass Assignment",
            "Insecure Deserialization (Marshal/YAML)",
            "Open Redirect",
            "Cross-Site Scripting (XSS)",
            "Path Traversal",
            "CSRF",
        ]
    }
    fn framework_context(&self) -> &'static [&'static str] {
        &["Rails", "Sinatra", "Rack"]
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Plugin lookup by language name or file extension. Built once at
/// initialization; no runtime loading.
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Box<dyn LanguagePlugin>>,
    extension_map: HashMap<&'static str, &'static str>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { plugins: HashMap::new(), extension_map: HashMap::new() }
    }

    pub fn register(&mut self, plugin: Box<dyn LanguagePlugin>) {
        let name = plugin.language_name();
        for ext in plugin.file_extensions() {
            // First registration wins for shared extensions (c vs cpp headers).
            self.extension_map.entry(ext).or_insert(name);
        }
        self.plugins.insert(name, plugin);
    }

    /// Registry populated with every built-in language plugin.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(PythonPlugin));
        registry.register(Box::new(JavaScriptPlugin));
        registry.register(Box::new(TypeScriptPlugin));
        registry.register(Box::new(GoPlugin));
        registry.register(Box::new(RustPlugin));
        registry.register(Box::new(CCppPlugin));
        registry.register(Box::new(CppPlugin));
        registry.register(Box::new(JavaPlugin));
        registry.register(Box::new(PhpPlugin));
        registry.register(Box::new(DartPlugin));
        registry.register(Box::new(RubyPlugin));
        registry
    }

    pub fn get(&self, language: &str) -> Option<&dyn LanguagePlugin> {
        self.plugins.get(language.to_lowercase().as_str()).map(|p| p.as_ref())
    }

    /// Lookup by extension with a leading dot, e.g. `".py"`.
    pub fn get_by_extension(&self, extension: &str) -> Option<&dyn LanguagePlugin> {
        let ext = extension.to_lowercase();
        self.extension_map.get(ext.as_str()).and_then(|name| self.get(name))
    }

    pub fn supported_languages(&self) -> Vec<&'static str> {
        let mut languages: Vec<&'static str> = self.plugins.keys().copied().collect();
        languages.sort();
        languages
    }

    /// System prompt for a language, falling back to the generic template
    /// when no plugin covers it.
    pub fn system_prompt_for(&self, language: &str) -> String {
        match self.get(language) {
            Some(plugin) => plugin.system_prompt(),
            None => build_system_prompt(language, &[], &[]),
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_all_supported_languages() {
        let registry = PluginRegistry::with_builtins();
        for language in crate::language::supported_languages() {
            assert!(registry.get(language).is_some(), "missing plugin for {language}");
        }
    }

    #[test]
    fn extension_lookup() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.get_by_extension(".py").unwrap().language_name(), "python");
        assert_eq!(registry.get_by_extension(".tsx").unwrap().language_name(), "typescript");
        assert!(registry.get_by_extension(".xyz").is_none());
    }

    #[test]
    fn shared_extensions_resolve_deterministically() {
        // ".hpp" is claimed by both C and C++ plugins; registration order
        // decides, and it must not change between runs.
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.get_by_extension(".hpp").unwrap().language_name(), "c");
    }

    #[test]
    fn prompts_embed_categories_and_shape() {
        let registry = PluginRegistry::with_builtins();
        let prompt = registry.system_prompt_for("python");
        assert!(prompt.contains("python code"));
        assert!(prompt.contains("Deserialization (pickle)"));
        assert!(prompt.contains("Django"));
        assert!(prompt.contains("{\"reviews\": []}"));

        // Unknown languages still get a usable generic prompt.
        let generic = registry.system_prompt_for("cobol");
        assert!(generic.contains("cobol code"));
        assert!(generic.contains("{\"reviews\": []}"));
    }

    #[test]
    fn chunking_strategy_overrides() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.get("rust").unwrap().chunking_strategy().chunk_size, 60);
        assert_eq!(registry.get("python").unwrap().chunking_strategy(), ChunkingStrategy::default());
    }
}
