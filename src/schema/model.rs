//! Serde model of the portable correction schema.
//!
//! The layout follows the community "correctionlib" schema version 2 so the
//! produced documents can be loaded by existing physics tooling:
//!
//! ```text
//! CorrectionSet { schema_version: 2, corrections: [Correction] }
//! Correction    { name, version, inputs: [Variable], output, data: Content }
//! Content       = number | category | formula | binning
//! ```
//!
//! Only the node types this pipeline produces or consumes are modelled.

use std::fs::{File, create_dir_all};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionSet {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub corrections: Vec<Correction>,
}

impl CorrectionSet {
    pub fn new(description: impl Into<String>, corrections: Vec<Correction>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            description: Some(description.into()),
            corrections,
        }
    }

    /// Look up a correction by name.
    pub fn get(&self, name: &str) -> Option<&Correction> {
        self.corrections.iter().find(|c| c.name == name)
    }

    /// Read a schema document from disk.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| {
            AppError::new(
                2,
                format!("Failed to open correction schema '{}': {e}", path.display()),
            )
        })?;
        let cset: CorrectionSet = serde_json::from_reader(std::io::BufReader::new(file))
            .map_err(|e| {
                AppError::new(
                    2,
                    format!("Invalid correction schema '{}': {e}", path.display()),
                )
            })?;
        if cset.schema_version != SCHEMA_VERSION {
            return Err(AppError::new(
                2,
                format!(
                    "Unsupported schema_version {} in '{}' (expected {SCHEMA_VERSION}).",
                    cset.schema_version,
                    path.display()
                ),
            ));
        }
        Ok(cset)
    }

    /// Write the schema document as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(|e| {
                AppError::new(2, format!("Failed to create directory '{}': {e}", parent.display()))
            })?;
        }
        let file = File::create(path).map_err(|e| {
            AppError::new(
                2,
                format!("Failed to create correction schema '{}': {e}", path.display()),
            )
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| AppError::new(2, format!("Failed to write correction schema: {e}")))?;
        writer
            .flush()
            .map_err(|e| AppError::new(2, format!("Failed to write correction schema: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: u32,
    pub inputs: Vec<Variable>,
    pub output: Variable,
    pub data: Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Real,
    Int,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VarType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variable {
    pub fn new(name: &str, kind: VarType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: None,
        }
    }

    pub fn described(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// A node of the correction tree: either a constant or a typed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Value(f64),
    Node(Node),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "nodetype", rename_all = "lowercase")]
pub enum Node {
    Category(Category),
    Formula(Formula),
    Binning(Binning),
}

impl From<Category> for Content {
    fn from(value: Category) -> Self {
        Content::Node(Node::Category(value))
    }
}

impl From<Formula> for Content {
    fn from(value: Formula) -> Self {
        Content::Node(Node::Formula(value))
    }
}

impl From<Binning> for Content {
    fn from(value: Binning) -> Self {
        Content::Node(Node::Binning(value))
    }
}

/// Discrete lookup on one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub input: String,
    pub content: Vec<CategoryItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Box<Content>>,
}

impl Category {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
            content: Vec::new(),
            default: None,
        }
    }

    pub fn push(&mut self, key: impl Into<CategoryKey>, value: impl Into<Content>) {
        self.content.push(CategoryItem {
            key: key.into(),
            value: value.into(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryItem {
    pub key: CategoryKey,
    pub value: Content,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CategoryKey {
    Int(i64),
    Str(String),
}

impl From<&str> for CategoryKey {
    fn from(value: &str) -> Self {
        CategoryKey::Str(value.to_string())
    }
}

impl From<String> for CategoryKey {
    fn from(value: String) -> Self {
        CategoryKey::Str(value)
    }
}

impl std::fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryKey::Int(v) => write!(f, "{v}"),
            CategoryKey::Str(v) => f.write_str(v),
        }
    }
}

/// Analytic expression over named inputs with bound parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    pub expression: String,
    pub parser: String,
    pub variables: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<f64>,
}

impl Formula {
    pub fn tformula(expression: String, variables: &[&str], parameters: Vec<f64>) -> Self {
        Self {
            expression,
            parser: "TFormula".to_string(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
            parameters,
        }
    }
}

/// Piecewise-constant lookup on one real input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    pub input: String,
    pub edges: Vec<f64>,
    pub content: Vec<Content>,
    pub flow: Flow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flow {
    Mode(FlowMode),
    Default(Box<Content>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowMode {
    Clamp,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_document() {
        let doc = r#"{
            "schema_version": 2,
            "corrections": [{
                "name": "puweights",
                "version": 1,
                "inputs": [
                    {"name": "NumTrueInteractions", "type": "real"},
                    {"name": "weights", "type": "string"}
                ],
                "output": {"name": "weight", "type": "real"},
                "data": {
                    "nodetype": "category",
                    "input": "weights",
                    "content": [
                        {"key": "nominal", "value": {
                            "nodetype": "binning",
                            "input": "NumTrueInteractions",
                            "edges": [0.0, 10.0, 20.0],
                            "content": [0.5, 1.5],
                            "flow": "clamp"
                        }},
                        {"key": "up", "value": 1.0}
                    ]
                }
            }]
        }"#;

        let cset: CorrectionSet = serde_json::from_str(doc).unwrap();
        let corr = cset.get("puweights").unwrap();
        let Content::Node(Node::Category(cat)) = &corr.data else {
            panic!("expected category");
        };
        assert_eq!(cat.content.len(), 2);
        assert_eq!(cat.content[0].key, CategoryKey::from("nominal"));
        let Content::Node(Node::Binning(bin)) = &cat.content[0].value else {
            panic!("expected binning");
        };
        assert_eq!(bin.flow, Flow::Mode(FlowMode::Clamp));
        assert_eq!(cat.content[1].value, Content::Value(1.0));
    }

    #[test]
    fn formula_serializes_with_nodetype_tag() {
        let f = Formula::tformula("[0]*x".to_string(), &["met_pt"], vec![2.0]);
        let json = serde_json::to_value(Content::from(f)).unwrap();
        assert_eq!(json["nodetype"], "formula");
        assert_eq!(json["parser"], "TFormula");
        assert_eq!(json["variables"][0], "met_pt");

        let mut cat = Category::new("dtmc");
        cat.push("DATA", Content::Value(1.0));
        let json = serde_json::to_value(Content::from(cat)).unwrap();
        assert_eq!(json["nodetype"], "category");
        assert!(json.get("default").is_none());
    }
}
