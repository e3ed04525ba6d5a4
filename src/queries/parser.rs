//! Parser for the constrained aggregate grammar:
//!
//! ```text
//! SELECT AGG(arg) [FROM ...] [WHERE col = lit [AND col = lit]*]
//!     [GROUP BY ... | ORDER BY ... | LIMIT ...]
//! ```
//!
//! The query is parsed with `sqlparser`; everything outside the aggregate
//! call and the WHERE clause is ignored.

use log::{debug, warn};
use sqlparser::ast::{
    BinaryOperator, DuplicateTreatment, Expr, Function, FunctionArg,
    FunctionArgExpr, FunctionArguments, Ident, Query, SelectItem, SetExpr,
    Statement, UnaryOperator, Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use super::descriptor::{
    FilterCondition, Literal, OperationKind, QueryDescriptor,
};
use crate::errors::{QueryError, QueryResult};

#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    /// Reject unrecognised WHERE predicates instead of dropping them.
    pub strict_filters: bool,
}

impl QueryParser {
    pub fn new(strict_filters: bool) -> Self {
        Self { strict_filters }
    }

    pub fn parse(&self, query: &str) -> QueryResult<QueryDescriptor> {
        let statements = Parser::parse_sql(&GenericDialect {}, query)
            .map_err(|e| {
                QueryError::MalformedQuery(format!(
                    "unable to parse query ({e}): {query}"
                ))
            })?;
        let [Statement::Query(parsed)] = statements.as_slice() else {
            return Err(QueryError::MalformedQuery(format!(
                "expected a single SELECT statement: {query}"
            )));
        };
        let Some((projection, selection)) = select_parts(parsed) else {
            return Err(QueryError::MalformedQuery(format!(
                "expected a single SELECT statement: {query}"
            )));
        };

        let (operation, column) = parse_aggregate(query, projection)?;

        let mut filters = vec![];
        if let Some(selection) = selection {
            self.collect_filters(selection, &mut filters)?;
        }

        let descriptor = QueryDescriptor {
            operation,
            column,
            filters,
        };
        debug!("Parsed query {query:?} into {descriptor:?}");
        Ok(descriptor)
    }

    /// Flattens the AND tree of `expr` into equality filters.
    fn collect_filters(
        &self,
        expr: &Expr,
        filters: &mut Vec<FilterCondition>,
    ) -> QueryResult<()> {
        match expr {
            Expr::Nested(inner) => self.collect_filters(inner, filters),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.collect_filters(left, filters)?;
                self.collect_filters(right, filters)
            }
            _ => match equality_filter(expr) {
                Some(condition) => {
                    filters.push(condition);
                    Ok(())
                }
                None if self.strict_filters => {
                    Err(QueryError::MalformedQuery(format!(
                        "unsupported filter predicate '{expr}'"
                    )))
                }
                None => {
                    warn!("Dropping unsupported filter predicate '{expr}'");
                    Ok(())
                }
            },
        }
    }
}

fn select_parts(query: &Query) -> Option<(&[SelectItem], Option<&Expr>)> {
    match query.body.as_ref() {
        SetExpr::Select(select) => {
            Some((select.projection.as_slice(), select.selection.as_ref()))
        }
        _ => None,
    }
}

/// Finds the single aggregate call in the projection.
fn parse_aggregate(
    query: &str,
    projection: &[SelectItem],
) -> QueryResult<(OperationKind, Option<String>)> {
    let mut aggregate = None;
    for item in projection {
        let expr = match item {
            SelectItem::UnnamedExpr(expr)
            | SelectItem::ExprWithAlias { expr, .. } => expr,
            _ => continue,
        };
        let Expr::Function(function) = expr else {
            continue;
        };

        let name = function_name(function);
        let Some(kind) = OperationKind::from_keyword(&name) else {
            return Err(QueryError::MalformedQuery(format!(
                "unsupported operation '{}' in query: {query}",
                name.to_ascii_uppercase()
            )));
        };
        if aggregate.is_some() {
            return Err(QueryError::MalformedQuery(format!(
                "expected exactly one aggregate call: {query}"
            )));
        }
        aggregate = Some((kind, aggregate_column(kind, function)?));
    }

    aggregate.ok_or_else(|| {
        QueryError::MalformedQuery(format!(
            "unsupported operation, no aggregate found in query: {query}"
        ))
    })
}

/// Last part of a possibly qualified function name.
fn function_name(function: &Function) -> String {
    let name = function.name.to_string();
    match name.rsplit_once('.') {
        Some((_, last)) => last.to_string(),
        None => name,
    }
}

/// `None` for `COUNT(*)` and `COUNT()`, the lower-cased column otherwise.
fn aggregate_column(
    kind: OperationKind,
    function: &Function,
) -> QueryResult<Option<String>> {
    let args = match &function.args {
        FunctionArguments::None => vec![],
        FunctionArguments::List(list) => {
            if matches!(
                list.duplicate_treatment,
                Some(DuplicateTreatment::Distinct)
            ) {
                return Err(QueryError::MalformedQuery(format!(
                    "DISTINCT is not supported in {kind}"
                )));
            }
            list.args.iter().collect()
        }
        _ => {
            return Err(QueryError::MalformedQuery(format!(
                "unsupported arguments in {kind}"
            )));
        }
    };

    let arg = match args.as_slice() {
        [] => None,
        [FunctionArg::Unnamed(arg)] => Some(arg),
        _ => {
            return Err(QueryError::MalformedQuery(format!(
                "{kind} takes a single argument"
            )));
        }
    };

    match arg {
        None | Some(FunctionArgExpr::Wildcard) => {
            if kind == OperationKind::Count {
                Ok(None)
            } else {
                Err(QueryError::MalformedQuery(format!(
                    "{kind} requires a column argument"
                )))
            }
        }
        Some(FunctionArgExpr::Expr(expr)) => match column_name(expr) {
            Some(column) => Ok(Some(column)),
            None => Err(QueryError::MalformedQuery(format!(
                "unsupported aggregate argument '{expr}'"
            ))),
        },
        Some(other) => Err(QueryError::MalformedQuery(format!(
            "unsupported aggregate argument '{other}'"
        ))),
    }
}

/// `column` or `table.column`, lower-cased.
fn column_name(expr: &Expr) -> Option<String> {
    let ident = match expr {
        Expr::Identifier(ident) => ident,
        Expr::CompoundIdentifier(parts) => parts.last()?,
        _ => return None,
    };
    Some(ident.value.to_lowercase())
}

/// `column = literal`, or `None` for any other predicate form.
fn equality_filter(expr: &Expr) -> Option<FilterCondition> {
    let Expr::BinaryOp {
        left,
        op: BinaryOperator::Eq,
        right,
    } = expr
    else {
        return None;
    };
    Some(FilterCondition {
        column: column_name(left)?,
        value: literal(right)?,
    })
}

fn literal(expr: &Expr) -> Option<Literal> {
    match expr {
        Expr::Nested(inner) => literal(inner),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal(expr)? {
            Literal::Number(x) => Some(Literal::Number(-x)),
            Literal::Text(_) => None,
        },
        Expr::Value(value) => match &value.value {
            Value::Number(raw, _) => raw
                .parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(Literal::Number),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                Some(Literal::Text(s.clone()))
            }
            _ => None,
        },
        // The generic dialect reads "text" as a quoted identifier.
        Expr::Identifier(Ident {
            value,
            quote_style: Some('"'),
            ..
        }) => Some(Literal::Text(value.clone())),
        _ => None,
    }
}
