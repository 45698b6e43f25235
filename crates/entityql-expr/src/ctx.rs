/// Binding context for one compilation pass: which model/alias the
/// expression is evaluated against, the caller-supplied `auth()` value, and
/// the operation name (`currentOperation()`).
pub struct CompileCtx<'a> {
    pub model: &'a str,
    pub alias: &'a str,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

impl<'a> CompileCtx<'a> {
    pub fn new(model: &'a str, alias: &'a str, auth: Option<&'a serde_json::Value>, operation: &'a str) -> Self {
        CompileCtx { model, alias, auth, operation }
    }
}
