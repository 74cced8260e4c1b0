//! Declarative fix templates
//!
//! A template is a named, ordered list of match/replace rewrites plus
//! optional import-statement rewrites and a manual-steps checklist. The
//! registry is loaded once at startup and passed to the generator — fix
//! rules live here, not scattered through code.

use indexmap::IndexMap;
use regex::Regex;

/// Errors from building a template registry
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Rewrite pattern failed to compile
    #[error("invalid rewrite in template '{template}': {source}")]
    InvalidRewrite {
        /// Offending template id
        template: String,
        /// Compile error
        source: regex::Error,
    },
}

/// One ordered match/replace rule
///
/// Replacement strings support `$1`/`${1}` back-references into the
/// match's capture groups.
#[derive(Debug, Clone)]
pub struct Rewrite {
    /// Compiled match pattern
    pub pattern: Regex,

    /// Replacement template
    pub replacement: String,

    /// What this rewrite does, recorded on each change
    pub description: String,
}

/// Import-statement rewrite rule
#[derive(Debug, Clone)]
pub struct ImportRewrite {
    /// Compiled match pattern over import statements
    pub pattern: Regex,

    /// Replacement template
    pub replacement: String,
}

/// A named fix template
#[derive(Debug, Clone)]
pub struct FixTemplate {
    /// Stable template id
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Ordered code rewrites
    pub rewrites: Vec<Rewrite>,

    /// Import-statement rewrites, applied after the code rewrites
    pub import_rewrites: Vec<ImportRewrite>,

    /// Steps a human must still carry out after application
    pub manual_steps: Vec<String>,

    /// How to validate the fix worked
    pub validation: String,
}

/// Template registry, loaded once at startup
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: IndexMap<String, FixTemplate>,
}

impl TemplateRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            templates: IndexMap::new(),
        }
    }

    /// The builtin templates
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.insert(FixTemplate {
            id: String::from("lazy-singleton"),
            name: String::from("Lazy singleton initialization"),
            rewrites: vec![Rewrite {
                pattern: Regex::new(
                    r"(?m)^(\s*)export\s+const\s+(\w+)\s*=\s*new\s+(\w+)\s*\(([^)]*)\)\s*;?\s*$",
                )
                .expect("lazy-singleton rewrite"),
                replacement: String::from(
                    "${1}let ${2}_instance: ${3} | null = null;\n\
                     ${1}export function ${2}(): ${3} {\n\
                     ${1}  if (!${2}_instance) {\n\
                     ${1}    ${2}_instance = new ${3}(${4});\n\
                     ${1}  }\n\
                     ${1}  return ${2}_instance;\n\
                     ${1}}",
                ),
                description: String::from(
                    "convert module-scope construction to a guarded getter function",
                ),
            }],
            import_rewrites: Vec::new(),
            manual_steps: vec![String::from("update callers to invoke the getter")],
            validation: String::from("re-run the failing test after updating callers"),
        });

        registry.insert(FixTemplate {
            id: String::from("guard-browser-global"),
            name: String::from("Guard browser global access"),
            rewrites: vec![Rewrite {
                pattern: Regex::new(r"(?m)^(\s*)(const|let)\s+(\w+)\s*=\s*window\.(\w+)\s*;?\s*$")
                    .expect("guard-browser-global rewrite"),
                replacement: String::from(
                    "${1}${2} ${3} = typeof window !== 'undefined' ? window.${4} : undefined;",
                ),
                description: String::from("guard module-scope window access with a runtime check"),
            }],
            import_rewrites: Vec::new(),
            manual_steps: Vec::new(),
            validation: String::from("re-run the failing test"),
        });

        registry
    }

    /// Register a template, replacing any previous one with the same id
    #[inline]
    pub fn insert(&mut self, template: FixTemplate) {
        self.templates.insert(template.id.clone(), template);
    }

    /// Look up a template by id
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&FixTemplate> {
        self.templates.get(id)
    }

    /// Registered template ids, insertion order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Number of templates
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
