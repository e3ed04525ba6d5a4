use std::fmt;

use serde::Serialize;

use crate::data::dataset::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl OperationKind {
    /// Matches an aggregate keyword, case-insensitively.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" | "MEAN" | "AVERAGE" => Some(Self::Avg),
            "MIN" => Some(Self::Min),
            "MAX" => Some(Self::Max),
            _ => None,
        }
    }

    /// Key under which the protected value is reported in the envelope.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "average",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str().to_ascii_uppercase())
    }
}

/// Right-hand side of an equality filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Text(String),
}

impl Literal {
    /// Exact equality: numbers against numeric cells, text against text
    /// cells. Missing cells never match.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Number(x), Value::Number(y)) => x == y,
            (Literal::Text(s), Value::Text(t)) => s == t,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterCondition {
    pub column: String,
    pub value: Literal,
}

/// Structured form of an aggregate query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub operation: OperationKind,

    /// Lower-cased target column. `None` only for `COUNT(*)`.
    pub column: Option<String>,

    /// Conjunctive equality filters, in query order.
    pub filters: Vec<FilterCondition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_matching() {
        assert!(Literal::Number(3.0).matches(&Value::Number(3.0)));
        assert!(!Literal::Number(3.0).matches(&Value::Text("3".into())));
        assert!(Literal::Text("x".into()).matches(&Value::Text("x".into())));
        assert!(!Literal::Text("x".into()).matches(&Value::Text("X".into())));
        assert!(!Literal::Text("x".into()).matches(&Value::Null));
    }

    #[test]
    fn test_keywords() {
        let keyword = OperationKind::from_keyword;
        assert_eq!(keyword("mean"), Some(OperationKind::Avg));
        assert_eq!(keyword("Count"), Some(OperationKind::Count));
        assert_eq!(OperationKind::from_keyword("foo"), None);
        assert_eq!(OperationKind::Avg.metric_name(), "average");
        assert_eq!(OperationKind::Min.to_string(), "MIN");
    }
}
