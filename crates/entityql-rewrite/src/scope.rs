use smol_str::SmolStr;

/// One frame of the Name-Mapping Rewriter's scope stack (spec §4.2). Pushed
/// per `FROM`/`JOIN` item, popped once the rewriter is done descending into
/// that item's subtree. Never shared across traversals (spec §3
/// "Lifecycles").
#[derive(Debug, Clone)]
pub struct Scope {
    pub model: Option<SmolStr>,
    pub alias: SmolStr,
    /// `true` means this scope's columns are already physical — it's a
    /// subquery, or an alias over a scope that has none mapped.
    pub names_mapped: bool,
}

#[derive(Debug, Default)]
pub struct ScopeStack(Vec<Scope>);

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack(Vec::new())
    }

    pub fn push(&mut self, scope: Scope) {
        self.0.push(scope);
    }

    pub fn pop(&mut self) {
        self.0.pop();
    }

    /// Innermost-first search for the scope whose alias matches `qualifier`.
    pub fn find_by_alias(&self, qualifier: &str) -> Option<&Scope> {
        self.0.iter().rev().find(|s| s.alias == qualifier)
    }

    /// Innermost-first search for the scope whose model matches `qualifier`
    /// (used when a reference qualifies by model name rather than alias).
    pub fn find_by_model(&self, qualifier: &str) -> Option<&Scope> {
        self.0.iter().rev().find(|s| s.model.as_deref() == Some(qualifier))
    }

    pub fn innermost(&self) -> Option<&Scope> {
        self.0.last()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter_innermost_first(&self) -> impl Iterator<Item = &Scope> {
        self.0.iter().rev()
    }
}
