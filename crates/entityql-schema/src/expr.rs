use smol_str::SmolStr;

/// The schema's boolean expression language (spec §4.3): references, member
/// access, calls, collection predicates, `auth()`, `check()`. This is pure
/// data — compiling it into SQL AST fragments is `entityql-expr`'s job; this
/// crate only needs a type to hang `PolicyRule::expr` on.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    BoolLit(bool),
    NumberLit(f64),
    StringLit(SmolStr),
    NullLit,

    /// `this`, a bare field name, or the start of a member-access chain.
    Ident(SmolStr),
    /// `base.member`, built left-to-right as `.` is parsed.
    Member(Box<Expr>, SmolStr),

    /// `auth()`
    Auth,

    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),

    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),

    /// A function call from the built-in set named in spec §4.3
    /// (`contains`, `startsWith`, `endsWith`, `has`, `hasEvery`, `hasSome`,
    /// `isEmpty`, `now`, `currentModel`, `currentOperation`) plus `check`.
    Call { name: SmolStr, receiver: Option<Box<Expr>>, args: Vec<Expr> },

    /// `rel?[cond]` / `rel![cond]` / `rel^[cond]` collection predicates.
    Collection { relation: SmolStr, quantifier: CollectionQuantifier, cond: Box<Expr> },

    List(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionQuantifier {
    /// `rel?[cond]` — `EXISTS` over rows matching `cond`.
    Some,
    /// `rel![cond]` — every related row matches `cond` (possibly zero rows).
    Every,
    /// `rel^[cond]` — no related row matches `cond`.
    None,
}
