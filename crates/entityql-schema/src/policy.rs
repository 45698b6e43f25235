use smol_str::SmolStr;
use strum_macros::{Display, EnumString};

use crate::expr::Expr;

/// The CRUD operations a policy rule can bind to. `All` expands to every
/// member at policy-compile time (spec §4.4 composition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PolicyOp {
    Read,
    Create,
    Update,
    Delete,
    All,
}

impl PolicyOp {
    pub fn expand(self) -> &'static [PolicyOp] {
        match self {
            PolicyOp::All => &[PolicyOp::Read, PolicyOp::Create, PolicyOp::Update, PolicyOp::Delete],
            other => {
                // Leak a 'static single-element slice per variant; cheap and
                // avoids allocating on every policy lookup.
                match other {
                    PolicyOp::Read => &[PolicyOp::Read],
                    PolicyOp::Create => &[PolicyOp::Create],
                    PolicyOp::Update => &[PolicyOp::Update],
                    PolicyOp::Delete => &[PolicyOp::Delete],
                    PolicyOp::All => unreachable!(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Allow,
    Deny,
}

/// One `@@allow`/`@@deny` attribute application, already parsed into an
/// expression tree. Bound to the model it was declared on.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub kind: PolicyKind,
    pub ops: Vec<PolicyOp>,
    pub expr: Expr,
}

/// A field-level `@allow`/`@deny('read', …)` rule. Spec §4.4: relation
/// fields may not carry these.
#[derive(Debug, Clone)]
pub struct FieldPolicyRule {
    pub field: SmolStr,
    pub kind: PolicyKind,
    pub ops: Vec<PolicyOp>,
    pub expr: Expr,
}

/// Model-level policies, pre-partitioned by operation at schema-build time
/// (spec §3.1 "Schema accessors") so the Policy Rewriter never re-scans the
/// raw attribute list per call.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    rules: Vec<PolicyRule>,
    field_rules: Vec<FieldPolicyRule>,
}

impl PolicySet {
    pub fn new(rules: Vec<PolicyRule>, field_rules: Vec<FieldPolicyRule>) -> Self {
        Self { rules, field_rules }
    }

    pub fn rules_for(&self, op: PolicyOp) -> impl Iterator<Item = &PolicyRule> {
        self.rules.iter().filter(move |r| r.ops.contains(&op))
    }

    pub fn allows_for(&self, op: PolicyOp) -> impl Iterator<Item = &PolicyRule> {
        self.rules_for(op).filter(|r| r.kind == PolicyKind::Allow)
    }

    pub fn denies_for(&self, op: PolicyOp) -> impl Iterator<Item = &PolicyRule> {
        self.rules_for(op).filter(|r| r.kind == PolicyKind::Deny)
    }

    /// Spec §4.4: "With zero `allow` it is constant false." Used by the
    /// Policy Rewriter's static pre-create analysis.
    pub fn has_any_allow(&self, op: PolicyOp) -> bool {
        self.allows_for(op).next().is_some()
    }

    pub fn has_unconditional_deny(&self, op: PolicyOp) -> bool {
        self.denies_for(op).any(|r| matches!(r.expr, Expr::BoolLit(true)))
    }

    pub fn field_rules_for(&self, field: &str, op: PolicyOp) -> impl Iterator<Item = &FieldPolicyRule> {
        self.field_rules
            .iter()
            .filter(move |r| r.field == field && r.ops.contains(&op))
    }

    pub fn has_field_policy(&self, field: &str) -> bool {
        self.field_rules.iter().any(|r| r.field == field)
    }
}
