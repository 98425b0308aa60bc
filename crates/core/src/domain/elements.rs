use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One input file submitted for analysis: path plus raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// File extension, lowercased, without the leading dot.
    pub fn extension(&self) -> Option<String> {
        self.path.rsplit_once('.').map(|(_, ext)| ext.to_lowercase())
    }
}

/// A single extracted code element (class, function, method, route).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CodeElement {
    pub name: String,
    /// 1-based line where the element was found.
    pub line: usize,
}

impl CodeElement {
    pub fn new(name: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            line,
        }
    }
}

/// Structured output of the parser for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ElementSet {
    #[serde(default)]
    pub classes: Vec<CodeElement>,
    #[serde(default)]
    pub functions: Vec<CodeElement>,
    #[serde(default)]
    pub methods: Vec<CodeElement>,
    #[serde(default)]
    pub routes: Vec<CodeElement>,
}

impl ElementSet {
    pub fn len(&self) -> usize {
        self.classes.len() + self.functions.len() + self.methods.len() + self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
