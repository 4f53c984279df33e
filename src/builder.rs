use crate::error::Result;
use crate::pipeline::parse_stage;
use crate::value::{Document, Value};

/// Accumulates an ordered sequence of already-validated stage documents.
/// Every stage passes through the stage validator before it is stored, so
/// a builder never holds an ill-formed stage.
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    stages: Vec<Value>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from pre-assembled raw stage documents, validating each.
    pub fn from_stages(stages: Vec<Value>) -> Result<Self> {
        for stage in &stages {
            parse_stage(stage)?;
        }
        Ok(PipelineBuilder { stages })
    }

    /// Append a `$match` stage from a raw query document.
    pub fn match_stage(self, query: Value) -> Result<Self> {
        self.tagged("$match", query)
    }

    /// Append an `$unwind` stage from a path reference or options document.
    pub fn unwind(self, expression: Value) -> Result<Self> {
        self.tagged("$unwind", expression)
    }

    /// Append a `$project` stage from a raw projection document.
    pub fn project(self, projection: Value) -> Result<Self> {
        self.tagged("$project", projection)
    }

    /// Append a raw, already-tagged stage document.
    pub fn push(mut self, stage: Value) -> Result<Self> {
        parse_stage(&stage)?;
        self.stages.push(stage);
        Ok(self)
    }

    fn tagged(self, tag: &str, operand: Value) -> Result<Self> {
        let mut doc = Document::new();
        doc.insert(tag.to_string(), operand);
        self.push(Value::Document(doc))
    }

    /// The accumulated stage documents, in insertion order.
    pub fn stages(&self) -> &[Value] {
        &self.stages
    }

    pub fn into_stages(self) -> Vec<Value> {
        self.stages
    }
}

// ===========================================================================
// Tests
// ===========================================================================
