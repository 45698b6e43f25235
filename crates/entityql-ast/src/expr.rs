use smol_str::SmolStr;

use crate::stmt::Stmt;

/// A literal value carried by a `Value` node. Kept dialect-neutral; the
/// `Compiler` (spec §6.2) is responsible for turning this into a bind
/// parameter or a literal in the emitted SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
    Like,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
}

/// The expression-level node kinds named in spec §2.3: `Table`, `Column`,
/// `Reference`, `Alias`, `Value`, `ValueList`, `BinaryOp`, `Function`,
/// `Parens`, `Selection`. The tree is a plain tagged sum type — rewriters
/// dispatch on the variant and build new, owned nodes (spec §9
/// "Polymorphism over AST nodes").
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    /// A bare table reference as it appears in `FROM`/`JOIN`, before the
    /// Name-Mapping Rewriter has decided on a physical name + alias.
    Table { name: SmolStr, schema: Option<SmolStr> },
    /// An unqualified column reference, resolved against the scope stack.
    Column { name: SmolStr },
    /// A qualified reference `X.f`.
    Reference { qualifier: SmolStr, name: SmolStr },
    Alias { expr: Box<SqlExpr>, alias: SmolStr },
    Value(Value),
    ValueList(Vec<SqlExpr>),
    BinaryOp { op: BinOp, left: Box<SqlExpr>, right: Box<SqlExpr> },
    Not(Box<SqlExpr>),
    Function { name: SmolStr, args: Vec<SqlExpr> },
    Parens(Box<SqlExpr>),
    /// A single `SELECT` projection item (`expr [AS alias]`).
    Selection { expr: Box<SqlExpr>, alias: Option<SmolStr> },
    /// `SELECT *`, expanded by the Name-Mapping Rewriter when the scope has
    /// any mapped columns (spec §4.2).
    Star,
    Exists { negated: bool, subquery: Box<Stmt> },
    Subquery(Box<Stmt>),
}

impl SqlExpr {
    pub fn table(name: impl Into<SmolStr>) -> Self {
        SqlExpr::Table { name: name.into(), schema: None }
    }

    pub fn column(name: impl Into<SmolStr>) -> Self {
        SqlExpr::Column { name: name.into() }
    }

    pub fn reference(qualifier: impl Into<SmolStr>, name: impl Into<SmolStr>) -> Self {
        SqlExpr::Reference { qualifier: qualifier.into(), name: name.into() }
    }

    pub fn alias(self, alias: impl Into<SmolStr>) -> Self {
        SqlExpr::Alias { expr: Box::new(self), alias: alias.into() }
    }

    pub fn binary(op: BinOp, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn and(self, other: SqlExpr) -> Self {
        SqlExpr::binary(BinOp::And, self, other)
    }

    pub fn or(self, other: SqlExpr) -> Self {
        SqlExpr::binary(BinOp::Or, self, other)
    }

    pub fn not(self) -> Self {
        SqlExpr::Not(Box::new(self))
    }

    pub fn call(name: impl Into<SmolStr>, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Function { name: name.into(), args }
    }

    pub fn parens(self) -> Self {
        SqlExpr::Parens(Box::new(self))
    }

    pub fn val(value: Value) -> Self {
        SqlExpr::Value(value)
    }

    /// Fold a (possibly empty) list of boolean expressions with `AND`;
    /// `None` if the list is empty (the rewriter then leaves the clause out
    /// rather than emitting a vacuous `WHERE TRUE`).
    pub fn and_all(mut exprs: Vec<SqlExpr>) -> Option<SqlExpr> {
        let mut iter = exprs.drain(..);
        let first = iter.next()?;
        Some(iter.fold(first, |acc, e| acc.and(e)))
    }

    pub fn or_all(mut exprs: Vec<SqlExpr>) -> Option<SqlExpr> {
        let mut iter = exprs.drain(..);
        let first = iter.next()?;
        Some(iter.fold(first, |acc, e| acc.or(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_all_of_empty_is_none() {
        assert_eq!(SqlExpr::and_all(vec![]), None);
    }

    #[test]
    fn and_all_folds_left_to_right() {
        let exprs = vec![
            SqlExpr::val(Value::Bool(true)),
            SqlExpr::val(Value::Bool(false)),
            SqlExpr::val(Value::Int(1)),
        ];
        let folded = SqlExpr::and_all(exprs).unwrap();
        match folded {
            SqlExpr::BinaryOp { op: BinOp::And, left, right } => {
                assert_eq!(*right, SqlExpr::val(Value::Int(1)));
                match *left {
                    SqlExpr::BinaryOp { op: BinOp::And, .. } => {}
                    _ => panic!("expected nested And"),
                }
            }
            _ => panic!("expected BinaryOp"),
        }
    }
}
