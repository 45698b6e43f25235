use entityql_ast::{BinOp, SqlExpr, Value};
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::Expr;

use crate::{CompileCtx, ExprCompiler};

/// The built-in function set from spec §4.3, plus `check()` which is
/// special-cased (it inlines another model's policy rather than producing
/// a plain SQL function call).
pub fn compile_call(
    compiler: &ExprCompiler,
    name: &str,
    receiver: Option<&Expr>,
    args: &[Expr],
    ctx: &CompileCtx,
) -> EngineResult<SqlExpr> {
    match name {
        "check" => compile_check(compiler, args, ctx),
        "now" => Ok(compiler.dialect.current_timestamp()),
        "currentModel" => Ok(SqlExpr::val(Value::Str(ctx.model.into()))),
        "currentOperation" => Ok(SqlExpr::val(Value::Str(ctx.operation.into()))),
        "contains" => string_predicate(compiler, "%{}%", receiver, args, ctx),
        "startsWith" => string_predicate(compiler, "{}%", receiver, args, ctx),
        "endsWith" => string_predicate(compiler, "%{}", receiver, args, ctx),
        "has" => {
            let recv = compile_receiver(compiler, receiver, ctx)?;
            let arg = compiler.compile(args.first().ok_or_else(|| EngineError::validation("has() needs one argument"))?, ctx)?;
            Ok(SqlExpr::call("array_contains", vec![recv, arg]))
        }
        "hasEvery" | "hasSome" => {
            let recv = compile_receiver(compiler, receiver, ctx)?;
            let compiled_args = args.iter().map(|a| compiler.compile(a, ctx)).collect::<EngineResult<Vec<_>>>()?;
            let fn_name = if name == "hasEvery" { "array_contains_all" } else { "array_contains_any" };
            Ok(SqlExpr::call(fn_name, std::iter::once(recv).chain(compiled_args).collect()))
        }
        "isEmpty" => {
            let recv = compile_receiver(compiler, receiver, ctx)?;
            Ok(SqlExpr::binary(BinOp::Eq, compiler.dialect.build_array_length(recv)?, SqlExpr::val(Value::Int(0))))
        }
        other => Err(EngineError::query(format!("unknown policy builtin `{other}`"))),
    }
}

fn compile_receiver(compiler: &ExprCompiler, receiver: Option<&Expr>, ctx: &CompileCtx) -> EngineResult<SqlExpr> {
    let recv = receiver.ok_or_else(|| EngineError::validation("builtin call missing a receiver"))?;
    compiler.compile(recv, ctx)
}

fn string_predicate(
    compiler: &ExprCompiler,
    pattern: &str,
    receiver: Option<&Expr>,
    args: &[Expr],
    ctx: &CompileCtx,
) -> EngineResult<SqlExpr> {
    let recv = compile_receiver(compiler, receiver, ctx)?;
    let arg = args.first().ok_or_else(|| EngineError::validation("string predicate needs one argument"))?;
    let needle = match arg {
        Expr::StringLit(s) => SqlExpr::val(Value::Str(pattern.replace("{}", s).into())),
        other => {
            // Non-literal argument: build the pattern at the SQL level via
            // concatenation so the receiver's bind value still flows as a
            // parameter rather than being embedded in the pattern text.
            let compiled = compiler.compile(other, ctx)?;
            let (prefix, suffix) = split_pattern(pattern);
            let mut expr = compiled;
            if !suffix.is_empty() {
                expr = SqlExpr::binary(BinOp::Concat, expr, SqlExpr::val(Value::Str(suffix.into())));
            }
            if !prefix.is_empty() {
                expr = SqlExpr::binary(BinOp::Concat, SqlExpr::val(Value::Str(prefix.into())), expr);
            }
            expr
        }
    };
    Ok(SqlExpr::binary(BinOp::Like, recv, needle))
}

fn split_pattern(pattern: &str) -> (&str, &str) {
    match pattern.split_once("{}") {
        Some((prefix, suffix)) => (prefix, suffix),
        None => (pattern, ""),
    }
}

/// `check(rel, op)` inlines `rel.model`'s compiled policy for `op`, joined
/// on `rel`'s FK (spec §4.3 and §4.4).
fn compile_check(compiler: &ExprCompiler, args: &[Expr], ctx: &CompileCtx) -> EngineResult<SqlExpr> {
    let [Expr::Ident(relation), Expr::StringLit(op_name)] = args else {
        return Err(EngineError::validation("check(rel, 'op') expects a relation identifier and a string operation"));
    };
    let op: entityql_schema::PolicyOp = op_name
        .parse()
        .map_err(|_| EngineError::validation(format!("check(): unknown operation `{op_name}`")))?;

    let model_def = compiler.schema.model(ctx.model)?;
    let field = model_def
        .field(relation.as_str())
        .ok_or_else(|| EngineError::validation(format!("{}: unknown relation `{relation}` in check()", ctx.model)))?;
    let entityql_schema::FieldType::Model(related_model) = &field.field_type else {
        return Err(EngineError::validation(format!("{}.{relation} is not a relation field", ctx.model)));
    };

    let related_alias = format!("{}__{}", ctx.alias, relation);
    let join_pred = crate::join::relation_join_predicate(compiler.schema, ctx.model, ctx.alias, relation, &related_alias)?;
    let inner_ctx = CompileCtx { model: related_model, alias: &related_alias, auth: ctx.auth, operation: ctx.operation };
    let inlined_policy = crate::compile_policy(compiler, related_model, op, &inner_ctx)?;

    let related_def = compiler.schema.model(related_model)?;
    let inner_select = entityql_ast::SelectStmt {
        projection: vec![SqlExpr::val(Value::Int(1))],
        from: entityql_ast::FromSource::table(related_def.db_table.clone(), Some(related_alias.as_str().into())),
        joins: vec![],
        where_: Some(join_pred.and(inlined_policy)),
        group_by: vec![],
        having: None,
        order_by: vec![],
        limit: None,
        offset: None,
        distinct: entityql_ast::DistinctKind::None,
        distinct_on: vec![],
        context: entityql_ast::QueryContext::new(related_model.clone(), ctx.operation),
    };
    Ok(SqlExpr::Exists { negated: false, subquery: Box::new(entityql_ast::Stmt::Select(inner_select)) })
}
