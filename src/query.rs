use crate::error::{Error, Result};
use crate::value::{
    descend, display_document, key_discipline, validate_value_at, Document, KeyDiscipline, Value,
};

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ComparisonOp {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "$eq" => Some(ComparisonOp::Eq),
            "$ne" => Some(ComparisonOp::Ne),
            "$gt" => Some(ComparisonOp::Gt),
            "$gte" => Some(ComparisonOp::Gte),
            "$lt" => Some(ComparisonOp::Lt),
            "$lte" => Some(ComparisonOp::Lte),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "$eq",
            ComparisonOp::Ne => "$ne",
            ComparisonOp::Gt => "$gt",
            ComparisonOp::Gte => "$gte",
            ComparisonOp::Lt => "$lt",
            ComparisonOp::Lte => "$lte",
        }
    }
}

/// Array-membership operators. All three take an array operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOp {
    In,
    Nin,
    All,
}

impl MembershipOp {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "$in" => Some(MembershipOp::In),
            "$nin" => Some(MembershipOp::Nin),
            "$all" => Some(MembershipOp::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipOp::In => "$in",
            MembershipOp::Nin => "$nin",
            MembershipOp::All => "$all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nor,
}

impl LogicalOp {
    fn parse(key: &str) -> Option<Self> {
        match key {
            "$and" => Some(LogicalOp::And),
            "$or" => Some(LogicalOp::Or),
            "$nor" => Some(LogicalOp::Nor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOp::And => "$and",
            LogicalOp::Or => "$or",
            LogicalOp::Nor => "$nor",
        }
    }
}

// ---------------------------------------------------------------------------
// Query AST
// ---------------------------------------------------------------------------

/// A single-field operator applied to an operand:
/// `{"$exists": true}`, `{"$size": 2}`, `{"$not": {<condition>}}`,
/// `{"$elemMatch": {<query or conditions>}}`, `{"$gte": <value>}`,
/// `{"$in": [<value>, ...]}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Exists(bool),
    Size(i64),
    Not(Box<Condition>),
    ElemMatch(ElemMatchBody),
    Compare(ComparisonOp, Value),
    Membership(MembershipOp, Vec<Value>),
}

/// `$elemMatch` takes either a full query or a bare set of conditions,
/// disambiguated by the key discipline of its operand.
#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatchBody {
    Conditions(Vec<Condition>),
    Query(Query),
}

/// One entry of a query document: a logical operator over sub-queries,
/// or a field path matched against a value or a set of conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Logical(LogicalOp, Vec<Query>),
    Field { path: String, body: CriterionBody },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CriterionBody {
    Value(Value),
    Conditions(Vec<Condition>),
}

/// A query document; an implicit conjunction over its criteria, in the
/// document's own entry order.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub criteria: Vec<Criterion>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_condition(operator: &str, operand: &Value) -> Result<Condition> {
    parse_condition_at(operator, operand, 0)
}

fn parse_condition_at(operator: &str, operand: &Value, depth: usize) -> Result<Condition> {
    if let Some(op) = ComparisonOp::parse(operator) {
        validate_value_at(operand, depth)?;
        return Ok(Condition::Compare(op, operand.clone()));
    }
    if let Some(op) = MembershipOp::parse(operator) {
        let Value::Array(items) = operand else {
            return Err(Error::BadOperandType {
                operator: operator.to_string(),
                expected: "an array",
                found: operand.to_string(),
            });
        };
        let depth = descend(depth)?;
        for item in items {
            validate_value_at(item, depth)?;
        }
        return Ok(Condition::Membership(op, items.clone()));
    }
    match operator {
        "$exists" => match operand {
            Value::Bool(b) => Ok(Condition::Exists(*b)),
            other => Err(Error::BadOperandType {
                operator: operator.to_string(),
                expected: "a bool",
                found: other.to_string(),
            }),
        },
        "$size" => match operand {
            Value::Int(n) => Ok(Condition::Size(*n)),
            other => Err(Error::BadOperandType {
                operator: operator.to_string(),
                expected: "an int",
                found: other.to_string(),
            }),
        },
        "$not" => {
            let Value::Document(doc) = operand else {
                return Err(Error::BadOperandType {
                    operator: operator.to_string(),
                    expected: "a document",
                    found: operand.to_string(),
                });
            };
            if doc.len() != 1 {
                return Err(Error::BadNotArity(display_document(doc)));
            }
            let (key, val) = doc.iter().next().expect("single entry");
            let inner = parse_condition_at(key, val, descend(depth)?)?;
            Ok(Condition::Not(Box::new(inner)))
        }
        "$elemMatch" => {
            let Value::Document(doc) = operand else {
                return Err(Error::BadOperandType {
                    operator: operator.to_string(),
                    expected: "a document",
                    found: operand.to_string(),
                });
            };
            match key_discipline(doc)? {
                KeyDiscipline::Operator => {
                    let depth = descend(depth)?;
                    let conditions: Result<Vec<Condition>> = doc
                        .iter()
                        .map(|(key, val)| parse_condition_at(key, val, depth))
                        .collect();
                    Ok(Condition::ElemMatch(ElemMatchBody::Conditions(conditions?)))
                }
                KeyDiscipline::Plain => {
                    let query = parse_query_doc(doc, descend(depth)?)?;
                    Ok(Condition::ElemMatch(ElemMatchBody::Query(query)))
                }
            }
        }
        _ => Err(Error::UnknownOperator(operator.to_string())),
    }
}

pub fn parse_criterion(key: &str, body: &Value) -> Result<Criterion> {
    parse_criterion_at(key, body, 0)
}

fn parse_criterion_at(key: &str, body: &Value, depth: usize) -> Result<Criterion> {
    if let Some(op) = LogicalOp::parse(key) {
        let Value::Array(items) = body else {
            return Err(Error::BadOperandType {
                operator: key.to_string(),
                expected: "an array of queries",
                found: body.to_string(),
            });
        };
        let depth = descend(depth)?;
        let queries: Result<Vec<Query>> =
            items.iter().map(|item| parse_query_at(item, depth)).collect();
        return Ok(Criterion::Logical(op, queries?));
    }

    // Anything else is a field path. Dotted segments are accepted
    // uninterpreted; only the empty path is rejected.
    if key.is_empty() {
        return Err(Error::BadPathReference("\"\"".to_string()));
    }

    if let Value::Document(doc) = body {
        if key_discipline(doc)? == KeyDiscipline::Operator {
            let depth = descend(depth)?;
            let conditions: Result<Vec<Condition>> = doc
                .iter()
                .map(|(op, operand)| parse_condition_at(op, operand, depth))
                .collect();
            return Ok(Criterion::Field {
                path: key.to_string(),
                body: CriterionBody::Conditions(conditions?),
            });
        }
    }

    validate_value_at(body, depth)?;
    Ok(Criterion::Field {
        path: key.to_string(),
        body: CriterionBody::Value(body.clone()),
    })
}

pub fn parse_query(query: &Value) -> Result<Query> {
    parse_query_at(query, 0)
}

pub(crate) fn parse_query_at(query: &Value, depth: usize) -> Result<Query> {
    let Value::Document(doc) = query else {
        return Err(Error::NotADocument(query.to_string()));
    };
    parse_query_doc(doc, depth)
}

fn parse_query_doc(doc: &Document, depth: usize) -> Result<Query> {
    let depth = descend(depth)?;
    let criteria: Result<Vec<Criterion>> = doc
        .iter()
        .map(|(key, body)| parse_criterion_at(key, body, depth))
        .collect();
    Ok(Query {
        criteria: criteria?,
    })
}

// ---------------------------------------------------------------------------
// Re-serialization
// ---------------------------------------------------------------------------

fn conditions_to_document(conditions: &[Condition]) -> Document {
    conditions.iter().map(Condition::to_entry).collect()
}

impl Condition {
    /// The `(operator, operand)` pair this condition was parsed from.
    pub fn to_entry(&self) -> (String, Value) {
        match self {
            Condition::Exists(b) => ("$exists".to_string(), Value::Bool(*b)),
            Condition::Size(n) => ("$size".to_string(), Value::Int(*n)),
            Condition::Not(inner) => {
                let (key, val) = inner.to_entry();
                let mut doc = Document::new();
                doc.insert(key, val);
                ("$not".to_string(), Value::Document(doc))
            }
            Condition::ElemMatch(body) => {
                let operand = match body {
                    ElemMatchBody::Conditions(conditions) => {
                        Value::Document(conditions_to_document(conditions))
                    }
                    ElemMatchBody::Query(query) => query.to_value(),
                };
                ("$elemMatch".to_string(), operand)
            }
            Condition::Compare(op, value) => (op.as_str().to_string(), value.clone()),
            Condition::Membership(op, values) => {
                (op.as_str().to_string(), Value::Array(values.clone()))
            }
        }
    }
}

impl Criterion {
    pub fn to_entry(&self) -> (String, Value) {
        match self {
            Criterion::Logical(op, queries) => (
                op.as_str().to_string(),
                Value::Array(queries.iter().map(Query::to_value).collect()),
            ),
            Criterion::Field { path, body } => {
                let value = match body {
                    CriterionBody::Value(value) => value.clone(),
                    CriterionBody::Conditions(conditions) => {
                        Value::Document(conditions_to_document(conditions))
                    }
                };
                (path.clone(), value)
            }
        }
    }
}

impl Query {
    /// Rebuild the raw query document this AST was parsed from, entry
    /// order preserved.
    pub fn to_value(&self) -> Value {
        Value::Document(self.criteria.iter().map(Criterion::to_entry).collect())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value(json: serde_json::Value) -> Value {
        Value::from_json(&json).unwrap()
    }

    fn roundtrip(raw: serde_json::Value) {
        let v = value(raw);
        let query = parse_query(&v).unwrap();
        assert_eq!(query.to_value(), v, "re-serialized query differs");
        // Idempotence: the round-tripped form is itself valid.
        assert!(parse_query(&query.to_value()).is_ok());
    }

    #[test]
    fn accepts_primitive_equality_queries() {
        for raw in [
            json!({"someField": null}),
            json!({"someField": true}),
            json!({"someField": 2}),
            json!({"someField": 2.5}),
            json!({"someField": "someValue"}),
            json!({"someField": {"$date": "2024-01-15T10:30:00Z"}}),
            json!({"someField": {"$oid": "507f1f77bcf86cd799439011"}}),
        ] {
            roundtrip(raw);
        }
    }

    #[test]
    fn accepts_object_and_array_bodies() {
        for raw in [
            json!({"someField": {}}),
            json!({"someField": {"someSubfield": true}}),
            json!({"someField": {"subField1": 1, "subfield2": 1.57}}),
            json!({"someField": {"subField": {"subsubfield": "someValue"}}}),
            json!({"someField": []}),
            json!({"someField": [null, true, 3, "x"]}),
            json!({"someField": {"subField": true}, "someOtherField": "someValue"}),
        ] {
            roundtrip(raw);
        }
    }

    #[test]
    fn accepts_comparison_and_membership_conditions() {
        for raw in [
            json!({"height": {"$gte": 98}}),
            json!({"created": {"$gt": {"$date": "2024-01-01T00:00:00Z"},
                               "$lte": {"$date": "2024-06-01T00:00:00Z"}}}),
            json!({"_id": {"$in": [{"$oid": "507f1f77bcf86cd799439011"}]}}),
            json!({"field.subfield": {"$nin": ["dog", "tree", 3]}}),
            json!({"tags": {"$all": ["a", "b"]}}),
        ] {
            roundtrip(raw);
        }
    }

    #[test]
    fn accepts_logical_operators() {
        roundtrip(json!({
            "$and": [{"workflow": "shameless"}, {"dialog": "self-promotion"}]
        }));
        roundtrip(json!({
            "$or": [
                {"$nor": [
                    {"workflow": "shameless", "dialog": "self-promotion"},
                    {"_id": {"$in": ["cat"]}}
                ]},
                {"splendid": {"$ne": 3}}
            ]
        }));
    }

    #[test]
    fn accepts_exists_size_not_elem_match() {
        roundtrip(json!({"_contactSettings.contacted": {"$exists": true}}));
        roundtrip(json!({"deliveryFailureUsers": {"$size": 0}}));
        roundtrip(json!({"someField": {"$not": {"$size": 2}}}));
        roundtrip(json!({"someField": {"$elemMatch": {"created": {"$gt": 1, "$lte": 5}}}}));
    }

    #[test]
    fn field_and_logical_keys_can_coexist() {
        roundtrip(json!({"tags": {"$in": ["a", "b"]}, "$or": [{}]}));
    }

    #[test]
    fn empty_query_is_valid() {
        let query = parse_query(&value(json!({}))).unwrap();
        assert!(query.criteria.is_empty());
    }

    #[test]
    fn query_must_be_a_document() {
        assert!(matches!(
            parse_query(&value(json!([1, 2]))),
            Err(Error::NotADocument(_))
        ));
    }

    #[test]
    fn exists_requires_bool() {
        assert!(matches!(
            parse_condition("$exists", &Value::Int(1)),
            Err(Error::BadOperandType { .. })
        ));
    }

    #[test]
    fn size_requires_int() {
        assert!(parse_condition("$size", &Value::Int(0)).is_ok());
        assert!(matches!(
            parse_condition("$size", &Value::String("two".into())),
            Err(Error::BadOperandType { .. })
        ));
    }

    #[test]
    fn membership_requires_array() {
        assert!(matches!(
            parse_condition("$in", &Value::String("not-a-list".into())),
            Err(Error::BadOperandType { .. })
        ));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(matches!(
            parse_condition("$regexish", &Value::Null),
            Err(Error::UnknownOperator(_))
        ));
    }

    #[test]
    fn not_requires_single_entry() {
        assert!(parse_condition("$not", &value(json!({"$size": 2}))).is_ok());
        assert!(matches!(
            parse_condition("$not", &value(json!({"$size": 2, "$exists": true}))),
            Err(Error::BadNotArity(_))
        ));
        assert!(matches!(
            parse_condition("$not", &value(json!({}))),
            Err(Error::BadNotArity(_))
        ));
    }

    #[test]
    fn not_requires_document_operand() {
        assert!(matches!(
            parse_condition("$not", &Value::Int(3)),
            Err(Error::BadOperandType { .. })
        ));
    }

    #[test]
    fn elem_match_takes_conditions_or_query() {
        let conditions = parse_condition("$elemMatch", &value(json!({"$gte": 1, "$lt": 9})));
        assert!(matches!(
            conditions,
            Ok(Condition::ElemMatch(ElemMatchBody::Conditions(_)))
        ));
        let query = parse_condition("$elemMatch", &value(json!({"qty": {"$gte": 1}})));
        assert!(matches!(
            query,
            Ok(Condition::ElemMatch(ElemMatchBody::Query(_)))
        ));
    }

    #[test]
    fn elem_match_mixed_keys_fail() {
        assert!(matches!(
            parse_condition("$elemMatch", &value(json!({"$gte": 1, "qty": 2}))),
            Err(Error::MixedKeys(_))
        ));
    }

    #[test]
    fn logical_operator_requires_array() {
        assert!(matches!(
            parse_criterion("$or", &value(json!({"a": 1}))),
            Err(Error::BadOperandType { .. })
        ));
    }

    #[test]
    fn empty_field_path_is_rejected() {
        assert!(matches!(
            parse_criterion("", &Value::Int(1)),
            Err(Error::BadPathReference(_))
        ));
    }

    #[test]
    fn mixed_keys_in_criterion_body_fail() {
        assert!(matches!(
            parse_query(&value(json!({"someField": {"$in": ["dog"], "tree": 2}}))),
            Err(Error::MixedKeys(_))
        ));
    }

    #[test]
    fn condition_validation_is_atomic() {
        // One bad element anywhere fails the whole operand.
        assert!(matches!(
            parse_condition("$in", &value(json!([1, {"$bad": 2}, 3]))),
            Err(Error::OperatorKeyInValue(_))
        ));
    }

    #[test]
    fn deeply_nested_query_is_rejected() {
        // $not chains recurse one condition per level.
        let mut raw = json!({"$size": 2});
        for _ in 0..200 {
            raw = json!({"$not": raw});
        }
        assert!(matches!(
            parse_query(&value(json!({"field": raw}))),
            Err(Error::TooDeeplyNested(_))
        ));
    }
}
