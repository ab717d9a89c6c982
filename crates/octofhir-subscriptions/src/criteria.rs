//! Restricted criteria evaluation for resource triggers.
//!
//! Topics describe their trigger conditions with a small equality/conjunction
//! language rather than full FHIRPath:
//!
//! ```text
//! expr   := clause (' and ' clause)*
//! clause := path '=' "'" literal "'"      (FHIRPath dialect)
//!         | path '=' literal              (query dialect, clauses may also be joined by '&')
//! path   := name ('.' name)*
//! ```
//!
//! Paths navigate nested JSON objects; arrays are never indexed, so a path that
//! runs into an array resolves to nothing. Anything that cannot be resolved or
//! parsed evaluates to `false`.

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

/// Syntax family of a criteria string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaDialect {
    /// `resourceTrigger.fhirPathCriteria`, quoted literals
    FhirPath,
    /// `resourceTrigger.queryCriteria.current`, bare literals
    Query,
}

/// Reasons a criteria string fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("clause '{0}' has no '=' operator")]
    MissingOperator(String),

    #[error("clause '{0}' has an invalid path")]
    InvalidPath(String),

    #[error("clause '{0}' must compare against a quoted string literal")]
    UnquotedLiteral(String),

    #[error("clause '{0}' has an empty literal")]
    EmptyLiteral(String),

    #[error("unterminated string literal in '{0}'")]
    UnterminatedLiteral(String),
}

/// A single `path = literal` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    pub path: Vec<String>,
    pub literal: String,
}

impl Clause {
    fn matches(&self, resource: &Value) -> bool {
        let segments = strip_type_prefix(&self.path, resource);
        resolve_segments(resource, segments)
            .and_then(scalar_text)
            .is_some_and(|actual| actual.as_ref() == self.literal.as_str())
    }
}

/// A parsed conjunction of clauses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Criteria {
    clauses: Vec<Clause>,
}

impl Criteria {
    /// Parse a criteria string. Blank input yields an always-true criteria.
    pub fn parse(expression: &str, dialect: CriteriaDialect) -> Result<Self, CriteriaError> {
        if expression.trim().is_empty() {
            return Ok(Self::default());
        }

        let clauses = split_conjunction(expression, dialect)?
            .into_iter()
            .map(|raw| parse_clause(raw, dialect))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clauses })
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// True iff every clause resolves and equals its literal.
    pub fn matches(&self, resource: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(resource))
    }
}

/// Parse and evaluate in one step; malformed criteria never match.
pub fn evaluate(expression: &str, dialect: CriteriaDialect, resource: &Value) -> bool {
    match Criteria::parse(expression, dialect) {
        Ok(criteria) => criteria.matches(resource),
        Err(e) => {
            tracing::debug!(
                criteria = expression,
                error = %e,
                "Malformed trigger criteria, treating as non-match"
            );
            false
        }
    }
}

/// Resolve a dotted path against a document.
pub fn resolve_path<'a>(resource: &'a Value, path: &str) -> Option<&'a Value> {
    let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    resolve_segments(resource, strip_type_prefix(&segments, resource))
}

/// Textual form of a scalar JSON value used for comparisons.
///
/// Objects, arrays and `null` have no scalar form.
pub fn scalar_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn resolve_segments<'a>(resource: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(resource, |current, segment| current.as_object()?.get(segment))
}

/// `Encounter.status` is evaluated as `status` against an Encounter.
fn strip_type_prefix<'p>(segments: &'p [String], resource: &Value) -> &'p [String] {
    match (segments.split_first(), resource.get("resourceType")) {
        (Some((first, rest)), Some(Value::String(rt))) if !rest.is_empty() && first == rt => rest,
        _ => segments,
    }
}

/// Split on ` and ` (and `&` for the query dialect) outside quoted literals.
/// Query literals are bare, so apostrophes there are ordinary characters.
fn split_conjunction(
    expression: &str,
    dialect: CriteriaDialect,
) -> Result<Vec<&str>, CriteriaError> {
    const AND: &str = " and ";

    let mut parts = Vec::new();
    let mut in_literal = false;
    let mut start = 0;
    let mut i = 0;
    let bytes = expression.as_bytes();

    while i < bytes.len() {
        match bytes[i] {
            b'\'' if dialect == CriteriaDialect::FhirPath => {
                in_literal = !in_literal;
                i += 1;
            }
            b'&' if !in_literal && dialect == CriteriaDialect::Query => {
                parts.push(&expression[start..i]);
                i += 1;
                start = i;
            }
            _ if !in_literal && bytes[i..].starts_with(AND.as_bytes()) => {
                parts.push(&expression[start..i]);
                i += AND.len();
                start = i;
            }
            _ => i += 1,
        }
    }

    if in_literal {
        return Err(CriteriaError::UnterminatedLiteral(expression.to_string()));
    }
    parts.push(&expression[start..]);

    Ok(parts)
}

fn parse_clause(raw: &str, dialect: CriteriaDialect) -> Result<Clause, CriteriaError> {
    let clause = raw.trim();
    let (path, literal) = clause
        .split_once('=')
        .ok_or_else(|| CriteriaError::MissingOperator(clause.to_string()))?;

    let path =
        parse_path(path.trim()).ok_or_else(|| CriteriaError::InvalidPath(clause.to_string()))?;
    let literal = literal.trim();

    let literal = match dialect {
        CriteriaDialect::FhirPath => literal
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .ok_or_else(|| CriteriaError::UnquotedLiteral(clause.to_string()))?,
        CriteriaDialect::Query => {
            if literal.is_empty() {
                return Err(CriteriaError::EmptyLiteral(clause.to_string()));
            }
            literal
        }
    };

    Ok(Clause {
        path,
        literal: literal.to_string(),
    })
}

fn parse_path(path: &str) -> Option<Vec<String>> {
    let segments: Vec<String> = path.split('.').map(str::to_string).collect();
    let valid = segments.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    valid.then_some(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encounter() -> Value {
        json!({
            "resourceType": "Encounter",
            "id": "enc-1",
            "status": "in-progress",
            "class": {"system": "http://terminology.hl7.org/CodeSystem/v3-ActCode", "code": "IMP"},
            "subject": {"reference": "Patient/p1"},
            "priority": 2,
            "partOf": null,
            "identifier": [{"value": "A-1"}]
        })
    }

    #[test]
    fn single_quoted_clause() {
        assert!(evaluate("status = 'in-progress'", CriteriaDialect::FhirPath, &encounter()));
        assert!(!evaluate("status = 'finished'", CriteriaDialect::FhirPath, &encounter()));
    }

    #[test]
    fn conjunction_requires_every_clause() {
        let doc = encounter();
        assert!(evaluate(
            "class.code = 'IMP' and status = 'in-progress'",
            CriteriaDialect::FhirPath,
            &doc
        ));
        assert!(!evaluate(
            "class.code = 'AMB' and status = 'in-progress'",
            CriteriaDialect::FhirPath,
            &doc
        ));
    }

    #[test]
    fn query_dialect() {
        let doc = encounter();
        assert!(evaluate("status=in-progress", CriteriaDialect::Query, &doc));
        assert!(evaluate("status=in-progress and class.code=IMP", CriteriaDialect::Query, &doc));
        assert!(evaluate("status=in-progress&class.code=IMP", CriteriaDialect::Query, &doc));
        assert!(!evaluate("status=finished", CriteriaDialect::Query, &doc));
    }

    #[test]
    fn query_literals_may_contain_apostrophes() {
        let doc = json!({"resourceType": "Patient", "family": "O'Brien", "active": true});
        assert!(evaluate("family=O'Brien", CriteriaDialect::Query, &doc));
        assert!(evaluate("family=O'Brien&active=true", CriteriaDialect::Query, &doc));
        assert!(!evaluate("family=O'Neil", CriteriaDialect::Query, &doc));

        // FHIRPath literals are still quoted.
        assert_eq!(
            Criteria::parse("family = 'O", CriteriaDialect::FhirPath),
            Err(CriteriaError::UnterminatedLiteral("family = 'O".to_string()))
        );
    }

    #[test]
    fn comparison_is_case_sensitive() {
        assert!(!evaluate("class.code = 'imp'", CriteriaDialect::FhirPath, &encounter()));
    }

    #[test]
    fn empty_criteria_is_true() {
        assert!(evaluate("", CriteriaDialect::FhirPath, &Value::Null));
        assert!(evaluate("   ", CriteriaDialect::Query, &encounter()));
    }

    #[test]
    fn absent_or_non_scalar_paths_do_not_match() {
        let doc = encounter();
        assert!(!evaluate("location.status = 'active'", CriteriaDialect::FhirPath, &doc));
        assert!(!evaluate("class = 'IMP'", CriteriaDialect::FhirPath, &doc));
        assert!(!evaluate("partOf = 'null'", CriteriaDialect::FhirPath, &doc));
        assert!(!evaluate("identifier.value = 'A-1'", CriteriaDialect::FhirPath, &doc));
    }

    #[test]
    fn numbers_and_booleans_compare_by_text() {
        let doc = json!({"resourceType": "Observation", "valueInteger": 2, "active": true});
        assert!(evaluate("valueInteger = '2'", CriteriaDialect::FhirPath, &doc));
        assert!(evaluate("active=true", CriteriaDialect::Query, &doc));
    }

    #[test]
    fn resource_type_prefix_is_optional() {
        assert!(evaluate("Encounter.status = 'in-progress'", CriteriaDialect::FhirPath, &encounter()));
        assert!(!evaluate("Patient.status = 'in-progress'", CriteriaDialect::FhirPath, &encounter()));
    }

    #[test]
    fn literal_may_contain_and() {
        let doc = json!({"resourceType": "Task", "description": "review and sign"});
        assert!(evaluate("description = 'review and sign'", CriteriaDialect::FhirPath, &doc));
    }

    #[test]
    fn malformed_criteria_never_match() {
        let doc = encounter();
        assert!(!evaluate("status 'in-progress'", CriteriaDialect::FhirPath, &doc));
        assert!(!evaluate("status = in-progress", CriteriaDialect::FhirPath, &doc));
        assert!(!evaluate("status = 'in-progress", CriteriaDialect::FhirPath, &doc));
        assert!(!evaluate("status=", CriteriaDialect::Query, &doc));
        assert!(!evaluate("status.where(x) = 'a'", CriteriaDialect::FhirPath, &doc));
    }

    #[test]
    fn malformed_documents_never_match() {
        for doc in [Value::Null, json!([1, 2]), json!("Encounter"), json!(42)] {
            assert!(!evaluate("status = 'in-progress'", CriteriaDialect::FhirPath, &doc));
        }
    }

    #[test]
    fn parse_reports_errors() {
        assert_eq!(
            Criteria::parse("status", CriteriaDialect::FhirPath),
            Err(CriteriaError::MissingOperator("status".to_string()))
        );
        let parsed = Criteria::parse("a.b = 'x' and c = 'y'", CriteriaDialect::FhirPath).unwrap();
        assert_eq!(parsed.clauses().len(), 2);
        assert_eq!(parsed.clauses()[0].path, vec!["a", "b"]);
        assert_eq!(parsed.clauses()[1].literal, "y");
    }

    #[test]
    fn resolve_path_navigates_objects() {
        let doc = encounter();
        assert_eq!(resolve_path(&doc, "subject.reference"), Some(&json!("Patient/p1")));
        assert_eq!(resolve_path(&doc, "Encounter.class.code"), Some(&json!("IMP")));
        assert_eq!(resolve_path(&doc, "subject..reference"), None);
        assert_eq!(resolve_path(&doc, "identifier.value"), None);
    }
}
