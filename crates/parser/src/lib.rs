//! Element-extraction collaborator.
//!
//! Turns raw source text into an [`ElementSet`] of classes, functions,
//! methods and routes. Extraction is regex based and deliberately
//! shallow; a per-file failure is reported to the caller and never
//! aborts a whole parsing pass.

mod error;

pub use error::ParseError;

use agentflow_core::{CodeElement, ElementSet};
use regex::Regex;
use tracing::debug;

/// Regex-based source parser for PHP and JS-family files.
pub struct CodeParser {
    php_class: Regex,
    php_function: Regex,
    php_method: Regex,
    php_route: Regex,
    js_function: Regex,
    js_class: Regex,
}

impl Default for CodeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeParser {
    pub fn new() -> Self {
        Self {
            php_class: Regex::new(r"class\s+(\w+)").expect("Invalid class regex pattern"),
            php_function: Regex::new(r"(?m)^\s*function\s+(\w+)\s*\(")
                .expect("Invalid function regex pattern"),
            php_method: Regex::new(r"(?:public|private|protected)\s+(?:static\s+)?function\s+(\w+)\s*\(")
                .expect("Invalid method regex pattern"),
            php_route: Regex::new(r#"Route::(?:get|post|put|patch|delete)\s*\(\s*['"]([^'"]+)['"]"#)
                .expect("Invalid route regex pattern"),
            js_function: Regex::new(r"(?:function\s+(\w+)\s*\(|const\s+(\w+)\s*=\s*(?:async\s*)?\()")
                .expect("Invalid js function regex pattern"),
            js_class: Regex::new(r"class\s+(\w+)").expect("Invalid js class regex pattern"),
        }
    }

    /// Parse one file. Unsupported or unparsable files return an error
    /// the caller records as a non-fatal warning.
    pub fn parse(&self, path: &str, content: &str) -> Result<ElementSet, ParseError> {
        if content.trim().is_empty() {
            return Err(ParseError::EmptyFile(path.to_string()));
        }
        if content.contains('\u{0}') {
            return Err(ParseError::BinaryContent(path.to_string()));
        }

        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .ok_or_else(|| ParseError::UnsupportedFile(path.to_string()))?;

        let elements = match extension.as_str() {
            "php" => self.parse_php(content),
            "js" | "ts" | "vue" => self.parse_js(content),
            _ => return Err(ParseError::UnsupportedFile(path.to_string())),
        };

        debug!(path = %path, elements = elements.len(), "File parsed");
        Ok(elements)
    }

    fn parse_php(&self, content: &str) -> ElementSet {
        let methods = self.capture_names(&self.php_method, content);
        let method_names: Vec<&str> = methods.iter().map(|m| m.name.as_str()).collect();

        ElementSet {
            classes: self.capture_names(&self.php_class, content),
            // Plain functions exclude visibility-qualified methods.
            functions: self
                .capture_names(&self.php_function, content)
                .into_iter()
                .filter(|f| !method_names.contains(&f.name.as_str()))
                .collect(),
            methods,
            routes: self.capture_names(&self.php_route, content),
        }
    }

    fn parse_js(&self, content: &str) -> ElementSet {
        ElementSet {
            classes: self.capture_names(&self.js_class, content),
            functions: self.capture_names(&self.js_function, content),
            methods: Vec::new(),
            routes: Vec::new(),
        }
    }

    fn capture_names(&self, pattern: &Regex, content: &str) -> Vec<CodeElement> {
        pattern
            .captures_iter(content)
            .filter_map(|caps| {
                let group = caps.iter().skip(1).flatten().next()?;
                let line = content[..group.start()].matches('\n').count() + 1;
                Some(CodeElement::new(group.as_str(), line))
            })
            .collect()
    }
}
