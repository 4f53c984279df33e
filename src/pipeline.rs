use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::query::{parse_query_at, Query};
use crate::value::{display_document, Document, Value};

// ---------------------------------------------------------------------------
// Path references
// ---------------------------------------------------------------------------

/// Validate a `$`-prefixed field reference and return the bare path.
pub fn parse_path_reference(reference: &str) -> Result<String> {
    match reference.strip_prefix('$') {
        Some(path) if !path.is_empty() => Ok(path.to_string()),
        _ => Err(Error::BadPathReference(format!("\"{reference}\""))),
    }
}

// ---------------------------------------------------------------------------
// Unwind
// ---------------------------------------------------------------------------

/// Operand of an `$unwind` stage: either a bare path reference or an
/// options document. Paths are stored without the `$` sigil.
#[derive(Debug, Clone, PartialEq)]
pub enum UnwindExpression {
    Path(String),
    Options {
        path: String,
        include_array_index: Option<String>,
        preserve_null_and_empty_arrays: Option<bool>,
    },
}

pub fn parse_unwind(operand: &Value) -> Result<UnwindExpression> {
    match operand {
        Value::String(s) => Ok(UnwindExpression::Path(parse_path_reference(s)?)),
        Value::Document(doc) => parse_unwind_options(doc),
        other => Err(Error::BadOperandType {
            operator: "$unwind".to_string(),
            expected: "a path reference or an options document",
            found: other.to_string(),
        }),
    }
}

fn parse_unwind_options(doc: &Document) -> Result<UnwindExpression> {
    let mut path = None;
    let mut include_array_index = None;
    let mut preserve_null_and_empty_arrays = None;

    for (key, val) in doc {
        match key.as_str() {
            "path" => match val {
                Value::String(s) => path = Some(parse_path_reference(s)?),
                other => return Err(Error::BadPathReference(other.to_string())),
            },
            "includeArrayIndex" => match val {
                Value::String(s) if !s.is_empty() && !s.starts_with('$') => {
                    include_array_index = Some(s.clone());
                }
                other => {
                    return Err(Error::BadOperandType {
                        operator: "includeArrayIndex".to_string(),
                        expected: "a plain path string",
                        found: other.to_string(),
                    });
                }
            },
            "preserveNullAndEmptyArrays" => match val {
                Value::Bool(b) => preserve_null_and_empty_arrays = Some(*b),
                other => {
                    return Err(Error::BadOperandType {
                        operator: "preserveNullAndEmptyArrays".to_string(),
                        expected: "a bool",
                        found: other.to_string(),
                    });
                }
            },
            other => return Err(Error::UnrecognizedOption(format!("\"{other}\""))),
        }
    }

    let Some(path) = path else {
        return Err(Error::MissingPath(display_document(doc)));
    };
    Ok(UnwindExpression::Options {
        path,
        include_array_index,
        preserve_null_and_empty_arrays,
    })
}

impl UnwindExpression {
    pub fn path(&self) -> &str {
        match self {
            UnwindExpression::Path(path) => path,
            UnwindExpression::Options { path, .. } => path,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            UnwindExpression::Path(path) => Value::String(format!("${path}")),
            UnwindExpression::Options {
                path,
                include_array_index,
                preserve_null_and_empty_arrays,
            } => {
                let mut doc = Document::new();
                doc.insert("path".to_string(), Value::String(format!("${path}")));
                if let Some(index) = include_array_index {
                    doc.insert(
                        "includeArrayIndex".to_string(),
                        Value::String(index.clone()),
                    );
                }
                if let Some(preserve) = preserve_null_and_empty_arrays {
                    doc.insert(
                        "preserveNullAndEmptyArrays".to_string(),
                        Value::Bool(*preserve),
                    );
                }
                Value::Document(doc)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionField {
    Include,
    Exclude,
    /// Value-definition (computed field). Accepted as-is; the expression
    /// sub-grammar is not validated here.
    Expression(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub fields: Vec<(String, ProjectionField)>,
}

pub fn parse_projection(operand: &Value) -> Result<Projection> {
    let Value::Document(doc) = operand else {
        return Err(Error::NotADocument(operand.to_string()));
    };

    let mut fields = Vec::with_capacity(doc.len());
    let mut inclusion_seen = false;
    let mut exclusion_seen = false;

    for (name, val) in doc {
        let field = match val {
            Value::Int(0) | Value::Bool(false) => ProjectionField::Exclude,
            Value::Int(1) | Value::Bool(true) => ProjectionField::Include,
            other => ProjectionField::Expression(other.clone()),
        };

        // "_id" may always be excluded, and only excluded.
        if name == "_id" {
            if field != ProjectionField::Exclude {
                return Err(Error::BadIdProjection(val.to_string()));
            }
            fields.push((name.clone(), field));
            continue;
        }

        match &field {
            ProjectionField::Exclude => {
                if inclusion_seen {
                    return Err(Error::MixedProjectionMode(name.clone()));
                }
                exclusion_seen = true;
            }
            ProjectionField::Include => {
                if exclusion_seen {
                    return Err(Error::MixedProjectionMode(name.clone()));
                }
                inclusion_seen = true;
            }
            ProjectionField::Expression(_) => {}
        }
        fields.push((name.clone(), field));
    }

    Ok(Projection { fields })
}

impl Projection {
    /// Rebuild the raw projection document. Boolean flags re-serialize
    /// canonically as `1` / `0`.
    pub fn to_value(&self) -> Value {
        let doc: Document = self
            .fields
            .iter()
            .map(|(name, field)| {
                let val = match field {
                    ProjectionField::Include => Value::Int(1),
                    ProjectionField::Exclude => Value::Int(0),
                    ProjectionField::Expression(value) => value.clone(),
                };
                (name.clone(), val)
            })
            .collect();
        Value::Document(doc)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Query),
    Unwind(UnwindExpression),
    Project(Projection),
}

impl Stage {
    pub fn tag(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Unwind(_) => "$unwind",
            Stage::Project(_) => "$project",
        }
    }

    pub fn to_value(&self) -> Value {
        let operand = match self {
            Stage::Match(query) => query.to_value(),
            Stage::Unwind(unwind) => unwind.to_value(),
            Stage::Project(projection) => projection.to_value(),
        };
        let mut doc = Document::new();
        doc.insert(self.tag().to_string(), operand);
        Value::Document(doc)
    }
}

/// Validate a single stage: a document with exactly one recognized stage
/// tag, whose operand satisfies that stage's grammar.
pub(crate) fn parse_stage(stage: &Value) -> Result<Stage> {
    let Value::Document(doc) = stage else {
        return Err(Error::NotADocument(stage.to_string()));
    };
    if doc.len() != 1 {
        return Err(Error::WrongArity(display_document(doc)));
    }
    let (tag, operand) = doc.iter().next().expect("single entry");
    match tag.as_str() {
        "$match" => Ok(Stage::Match(parse_query_at(operand, 0)?)),
        "$unwind" => Ok(Stage::Unwind(parse_unwind(operand)?)),
        "$project" => Ok(Stage::Project(parse_projection(operand)?)),
        other => Err(Error::UnknownStage(format!("\"{other}\""))),
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parse and validate a whole pipeline: an array of stages, checked
    /// in order, failing on the first ill-formed stage.
    pub fn parse(pipeline: &Value) -> Result<Self> {
        let Value::Array(items) = pipeline else {
            return Err(Error::NotAnArray(pipeline.to_string()));
        };
        let stages: Result<Vec<Stage>> = items.iter().map(parse_stage).collect();
        Ok(Pipeline { stages: stages? })
    }

    /// Parse a pipeline straight from JSON.
    pub fn parse_json(pipeline: &JsonValue) -> Result<Self> {
        Self::parse(&Value::from_json(pipeline)?)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Stage> {
        self.stages
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.stages.iter().map(Stage::to_value).collect())
    }

    pub fn to_json(&self) -> JsonValue {
        self.to_value().to_json()
    }
}

/// The boolean-style entry point: succeeds iff the candidate is a
/// well-formed pipeline. `Pipeline::parse` is the typed variant.
pub fn validate_pipeline(pipeline: &Value) -> Result<()> {
    Pipeline::parse(pipeline).map(|_| ())
}

// ===========================================================================
// Tests
// ===========================================================================
