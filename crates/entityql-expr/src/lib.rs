//! The Policy Expression Compiler (spec §4.3): turns a schema `Expr` bound
//! to a model into an SQL boolean fragment referencing that model's
//! columns, through its alias.

mod builtins;
mod ctx;
mod join;

pub use ctx::CompileCtx;
pub use join::relation_join_predicate;

use entityql_ast::{BinOp, SqlExpr, Stmt, Value};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::{CollectionQuantifier, Expr, PolicyOp, Schema};

use crate::join::relation_join_predicate;

pub struct ExprCompiler<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
}

impl<'a> ExprCompiler<'a> {
    pub fn new(schema: &'a Schema, dialect: &'a dyn Dialect) -> Self {
        ExprCompiler { schema, dialect }
    }

    pub fn compile(&self, expr: &Expr, ctx: &CompileCtx) -> EngineResult<SqlExpr> {
        match expr {
            Expr::BoolLit(b) => Ok(SqlExpr::val(Value::Bool(*b))),
            Expr::NumberLit(n) => Ok(SqlExpr::val(Value::Float(*n))),
            Expr::StringLit(s) => Ok(SqlExpr::val(Value::Str(s.clone()))),
            Expr::NullLit => Ok(SqlExpr::val(Value::Null)),

            Expr::Ident(name) if name == "this" => {
                Err(EngineError::internal("bare `this` has no standalone SQL representation"))
            }
            Expr::Ident(name) => self.resolve_field(ctx, name),

            Expr::Auth => self.resolve_auth_leaf(ctx, &[]),

            Expr::Member(base, member) => self.compile_member(base, member, ctx),

            Expr::Not(inner) => Ok(self.compile(inner, ctx)?.not()),
            Expr::And(l, r) => Ok(self.compile(l, ctx)?.and(self.compile(r, ctx)?)),
            Expr::Or(l, r) => Ok(self.compile(l, ctx)?.or(self.compile(r, ctx)?)),

            Expr::Eq(l, r) => self.compile_comparison(BinOp::Eq, l, r, ctx),
            Expr::Ne(l, r) => self.compile_comparison(BinOp::NotEq, l, r, ctx),
            Expr::Lt(l, r) => Ok(SqlExpr::binary(BinOp::Lt, self.compile(l, ctx)?, self.compile(r, ctx)?)),
            Expr::Le(l, r) => Ok(SqlExpr::binary(BinOp::LtEq, self.compile(l, ctx)?, self.compile(r, ctx)?)),
            Expr::Gt(l, r) => Ok(SqlExpr::binary(BinOp::Gt, self.compile(l, ctx)?, self.compile(r, ctx)?)),
            Expr::Ge(l, r) => Ok(SqlExpr::binary(BinOp::GtEq, self.compile(l, ctx)?, self.compile(r, ctx)?)),
            Expr::In(l, r) => Ok(SqlExpr::binary(BinOp::In, self.compile(l, ctx)?, self.compile(r, ctx)?)),

            Expr::List(items) => {
                let compiled = items.iter().map(|i| self.compile(i, ctx)).collect::<EngineResult<Vec<_>>>()?;
                Ok(SqlExpr::ValueList(compiled))
            }

            Expr::Call { name, receiver, args } => builtins::compile_call(self, name, receiver.as_deref(), args, ctx),

            Expr::Collection { relation, quantifier, cond } => self.compile_collection(relation, *quantifier, cond, ctx),
        }
    }

    fn resolve_field(&self, ctx: &CompileCtx, name: &str) -> EngineResult<SqlExpr> {
        let model = self.schema.model(ctx.model)?;
        let field = model
            .field(name)
            .ok_or_else(|| EngineError::validation(format!("{}: unknown field `{name}` in policy expression", ctx.model)))?;
        if field.is_relation() {
            return Err(EngineError::validation(format!(
                "{}.{name}: relation fields cannot be referenced directly in a policy expression, use a collection predicate",
                ctx.model
            )));
        }
        Ok(SqlExpr::reference(ctx.alias, field.db_column.clone()))
    }

    /// Walk a dotted path rooted at `auth()`. Missing intermediate members
    /// produce `null` (spec §4.3: "treats missing intermediate members as
    /// null"); the result is always a compile-time literal because `auth()`
    /// is supplied per-request, never read from the row.
    fn resolve_auth_leaf(&self, ctx: &CompileCtx, path: &[&str]) -> EngineResult<SqlExpr> {
        let Some(auth) = ctx.auth else {
            return Ok(SqlExpr::val(Value::Null));
        };
        let mut cur = auth;
        for segment in path {
            match cur.get(segment) {
                Some(next) => cur = next,
                None => return Ok(SqlExpr::val(Value::Null)),
            }
        }
        Ok(json_to_sql_value(cur))
    }

    fn compile_member(&self, base: &Expr, member: &smol_str::SmolStr, ctx: &CompileCtx) -> EngineResult<SqlExpr> {
        let (root, mut path) = flatten_member_chain(base);
        path.push(member.clone());
        match root {
            MemberRoot::Auth => {
                let path_refs: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
                self.resolve_auth_leaf(ctx, &path_refs)
            }
            MemberRoot::This => {
                if path.len() != 1 {
                    return Err(EngineError::validation("multi-segment `this.` paths are not supported"));
                }
                self.resolve_field(ctx, &path[0])
            }
            MemberRoot::Ident(name) => {
                Err(EngineError::validation(format!("unsupported member access rooted at `{name}`")))
            }
        }
    }

    /// `==`/`!=` get one extra rule beyond generic comparison: `auth() ==
    /// relationField` (spec §8 scenario 1, `@@allow('all', auth()==author)`)
    /// compares the relation's owning-side FK column(s) against the id
    /// value(s) pulled from the `auth()` JSON, rather than trying to treat
    /// `auth()` itself as a SQL value.
    fn compile_comparison(&self, op: BinOp, l: &Expr, r: &Expr, ctx: &CompileCtx) -> EngineResult<SqlExpr> {
        if let Some(expr) = self.try_compile_auth_relation_eq(op, l, r, ctx)? {
            return Ok(expr);
        }
        if let Some(expr) = self.try_compile_auth_relation_eq(op, r, l, ctx)? {
            return Ok(expr);
        }
        Ok(SqlExpr::binary(op, self.compile(l, ctx)?, self.compile(r, ctx)?))
    }

    fn try_compile_auth_relation_eq(&self, op: BinOp, auth_side: &Expr, field_side: &Expr, ctx: &CompileCtx) -> EngineResult<Option<SqlExpr>> {
        if !matches!(auth_side, Expr::Auth) {
            return Ok(None);
        }
        let Expr::Ident(field_name) = field_side else { return Ok(None) };
        let model = self.schema.model(ctx.model)?;
        let Some(field) = model.field(field_name) else { return Ok(None) };
        if !field.is_relation() {
            return Ok(None);
        }
        let Some(auth_model_name) = self.schema.auth_model() else {
            return Ok(Some(SqlExpr::val(Value::Bool(op == BinOp::NotEq))));
        };
        let auth_model = self.schema.model(auth_model_name)?;
        let rel = field.relation.as_ref().ok_or_else(|| EngineError::internal("relation field missing RelationInfo"))?;
        if !rel.owns_fk() {
            return Err(EngineError::query(format!(
                "{}.{field_name}: comparing auth() against a non-owning relation field is not supported",
                ctx.model
            )));
        }
        let Some(auth) = ctx.auth else {
            return Ok(Some(SqlExpr::val(Value::Bool(op == BinOp::NotEq))));
        };
        let mut eqs = Vec::new();
        for (local_col, remote_col) in rel.fields.iter().zip(rel.references.iter()) {
            let _ = auth_model.field(remote_col.as_str());
            let id_value = auth.get(remote_col.as_str()).cloned().unwrap_or(serde_json::Value::Null);
            eqs.push(SqlExpr::binary(BinOp::Eq, SqlExpr::reference(ctx.alias, local_col.clone()), json_to_sql_value(&id_value)));
        }
        let Some(combined) = SqlExpr::and_all(eqs) else {
            return Ok(Some(SqlExpr::val(Value::Bool(op == BinOp::NotEq))));
        };
        Ok(Some(if op == BinOp::Eq { combined } else { combined.not() }))
    }

    /// `rel?[cond]` / `rel![cond]` / `rel^[cond]` (spec §4.3).
    fn compile_collection(&self, relation: &str, quantifier: CollectionQuantifier, cond: &Expr, ctx: &CompileCtx) -> EngineResult<SqlExpr> {
        let model = self.schema.model(ctx.model)?;
        let field = model
            .field(relation)
            .ok_or_else(|| EngineError::validation(format!("{}: unknown relation `{relation}`", ctx.model)))?;
        if !field.is_relation() {
            return Err(EngineError::validation(format!("{}.{relation} is not a relation field", ctx.model)));
        }
        let entityql_schema::FieldType::Model(related_model_name) = &field.field_type else {
            return Err(EngineError::internal("relation field without a model type"));
        };
        let related_alias = format!("{}__{}", ctx.alias, relation);
        let join_pred = relation_join_predicate(self.schema, ctx.model, ctx.alias, relation, &related_alias)?;

        let inner_ctx = CompileCtx { model: related_model_name, alias: &related_alias, auth: ctx.auth, operation: ctx.operation };
        let inner_cond = self.compile(cond, &inner_ctx)?;

        let (where_expr, negated) = match quantifier {
            CollectionQuantifier::Some => (join_pred.and(inner_cond), false),
            CollectionQuantifier::None => (join_pred.and(inner_cond), true),
            CollectionQuantifier::Every => (join_pred.and(inner_cond.not()), true),
        };

        let related_model = self.schema.model(related_model_name)?;
        let inner_select = entityql_ast::SelectStmt {
            projection: vec![SqlExpr::val(Value::Int(1))],
            from: entityql_ast::FromSource::table(related_model.db_table.clone(), Some(related_alias.as_str().into())),
            joins: vec![],
            where_: Some(where_expr),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: entityql_ast::DistinctKind::None,
            distinct_on: vec![],
            context: entityql_ast::QueryContext::new(related_model_name.clone(), ctx.operation),
        };
        Ok(SqlExpr::Exists { negated, subquery: Box::new(Stmt::Select(inner_select)) })
    }
}

enum MemberRoot<'a> {
    Auth,
    This,
    Ident(&'a str),
}

fn flatten_member_chain(expr: &Expr) -> (MemberRoot<'_>, Vec<smol_str::SmolStr>) {
    match expr {
        Expr::Auth => (MemberRoot::Auth, Vec::new()),
        Expr::Ident(name) if name == "this" => (MemberRoot::This, Vec::new()),
        Expr::Ident(name) => (MemberRoot::Ident(name.as_str()), Vec::new()),
        Expr::Member(inner, member) => {
            let (root, mut path) = flatten_member_chain(inner);
            path.push(member.clone());
            (root, path)
        }
        _ => (MemberRoot::Ident("<expr>"), Vec::new()),
    }
}

fn json_to_sql_value(value: &serde_json::Value) -> SqlExpr {
    match value {
        serde_json::Value::Null => SqlExpr::val(Value::Null),
        serde_json::Value::Bool(b) => SqlExpr::val(Value::Bool(*b)),
        serde_json::Value::Number(n) => SqlExpr::val(Value::Float(n.as_f64().unwrap_or_default())),
        serde_json::Value::String(s) => SqlExpr::val(Value::Str(s.as_str().into())),
        other => SqlExpr::val(Value::Json(other.clone())),
    }
}

/// Compiles the boolean for a model × operation per spec §4.4: `OR(allows)
/// AND NOT OR(denies)`, constant `false` with zero allows.
pub fn compile_policy(compiler: &ExprCompiler, model: &str, op: PolicyOp, ctx: &CompileCtx) -> EngineResult<SqlExpr> {
    let model_def = compiler.schema.model(model)?;
    if !model_def.policies.has_any_allow(op) {
        return Ok(SqlExpr::val(Value::Bool(false)));
    }
    let allows: Vec<SqlExpr> =
        model_def.policies.allows_for(op).map(|r| compiler.compile(&r.expr, ctx)).collect::<EngineResult<_>>()?;
    let denies: Vec<SqlExpr> =
        model_def.policies.denies_for(op).map(|r| compiler.compile(&r.expr, ctx)).collect::<EngineResult<_>>()?;

    let allow_expr = SqlExpr::or_all(allows).unwrap_or(SqlExpr::val(Value::Bool(false)));
    match SqlExpr::or_all(denies) {
        Some(deny_expr) => Ok(allow_expr.and(deny_expr.not())),
        None => Ok(allow_expr),
    }
}
