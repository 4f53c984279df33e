pub mod builder;
pub mod error;
pub mod pipeline;
pub mod query;
pub mod value;

pub use builder::PipelineBuilder;
pub use error::{Error, Result};
pub use pipeline::{validate_pipeline, Pipeline, Projection, ProjectionField, Stage, UnwindExpression};
pub use query::{Condition, Criterion, CriterionBody, ElemMatchBody, Query};
pub use value::{key_discipline, validate_value, Document, KeyDiscipline, ObjectId, Value};
