use thiserror::Error;

/// One variant per violated grammar rule. Every variant carries the
/// offending value (rendered as JSON) so callers can build a readable
/// diagnostic without re-traversing the input.
#[derive(Error, Debug)]
pub enum Error {
    #[error("expected a document, got {0}")]
    NotADocument(String),

    #[error("expected an array, got {0}")]
    NotAnArray(String),

    #[error("a stage must have exactly one key, got {0}")]
    WrongArity(String),

    #[error("cannot mix operator keys (beginning with '$') with plain keys in {0}")]
    MixedKeys(String),

    #[error("unknown operator {0}")]
    UnknownOperator(String),

    #[error("unknown stage type {0}")]
    UnknownStage(String),

    #[error("{operator} requires {expected}, got {found}")]
    BadOperandType {
        operator: String,
        expected: &'static str,
        found: String,
    },

    #[error("$not requires a document with exactly one entry, got {0}")]
    BadNotArity(String),

    #[error("expected a '$'-prefixed path reference, got {0}")]
    BadPathReference(String),

    #[error("$unwind options require a 'path' entry, got {0}")]
    MissingPath(String),

    #[error("unrecognized $unwind option {0}")]
    UnrecognizedOption(String),

    #[error("cannot mix inclusion and exclusion in one projection (field '{0}')")]
    MixedProjectionMode(String),

    #[error("'_id' can only be excluded from a projection, got {0}")]
    BadIdProjection(String),

    #[error("{0} cannot be mapped to a BSON value")]
    UnsupportedValue(String),

    #[error("operator keys (beginning with '$') are not allowed inside a plain value: {0}")]
    OperatorKeyInValue(String),

    #[error("value nested deeper than {0} levels")]
    TooDeeplyNested(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
