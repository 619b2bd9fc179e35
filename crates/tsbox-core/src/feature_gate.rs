//! AST-form whitelist/blacklist gate (component C7).
//!
//! Shape grounded on `capability.rs`'s `CapabilitySet`: a checked permission
//! set, here over language forms (feature tokens) rather than host function
//! names. Pre-computed at interpreter/call construction time into a bit-set
//! keyed by a `strum`-derived enum so gating is O(1) per node.

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// One of the feature tokens covering the minimum set of AST forms an
/// embedder can disable individually. `strum` gives us the `Display`/`FromStr`
/// round trip the security error message and the host-facing API need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum FeatureToken {
    VariableDeclarations,
    LetConst,
    FunctionDeclarations,
    FunctionExpressions,
    ArrowFunctions,
    AsyncAwait,
    Generators,
    Classes,
    ClassFields,
    PrivateFields,
    StaticBlocks,
    BinaryOperators,
    UnaryOperators,
    LogicalOperators,
    ConditionalExpression,
    UpdateExpression,
    AssignmentOperators,
    ExponentiationOperator,
    OptionalChaining,
    NullishCoalescing,
    LogicalAssignment,
    MemberExpression,
    CallExpression,
    NewExpression,
    ThisExpression,
    ObjectLiterals,
    ArrayLiterals,
    SpreadOperator,
    RestParameters,
    Destructuring,
    DefaultParameters,
    TemplateLiterals,
    IfStatement,
    SwitchStatement,
    ForStatement,
    ForInStatement,
    ForOfStatement,
    WhileStatement,
    DoWhileStatement,
    BreakStatement,
    ContinueStatement,
    ReturnStatement,
    ThrowStatement,
    TryCatchStatement,
    Modules,
}

const TOKEN_COUNT: usize = 44;

/// Whether the gate treats its configured set as the *only* allowed tokens
/// (`Whitelist`) or as the tokens to *reject* (`Blacklist`); everything else
/// defaults to the opposite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Whitelist,
    Blacklist,
}

/// A pre-computed O(1) membership check over [`FeatureToken`]. Per-call
/// configuration fully replaces constructor configuration for that call
///.
#[derive(Debug, Clone)]
pub struct FeatureGate {
    mode: GateMode,
    bits: [bool; TOKEN_COUNT],
}

impl FeatureGate {
    pub fn new(mode: GateMode, tokens: impl IntoIterator<Item = FeatureToken>) -> Self {
        let mut bits = [false; TOKEN_COUNT];
        for token in tokens {
            bits[token as usize] = true;
        }
        Self { mode, bits }
    }

    /// Permits every token — the default for a fresh interpreter with no
    /// `featureControl` configured.
    pub fn allow_all() -> Self {
        Self::new(GateMode::Blacklist, std::iter::empty())
    }

    pub fn is_allowed(&self, token: FeatureToken) -> bool {
        let configured = self.bits[token as usize];
        match self.mode {
            GateMode::Whitelist => configured,
            GateMode::Blacklist => !configured,
        }
    }

    /// Checks every token, returning the first disallowed one. Called once
    /// up front over the whole program (not per-node at eval time) so a
    /// single gate error is reported before any side effects occur.
    pub fn check(&self, token: FeatureToken) -> Result<(), FeatureToken> {
        if self.is_allowed(token) {
            Ok(())
        } else {
            Err(token)
        }
    }

    pub fn all_tokens() -> impl Iterator<Item = FeatureToken> {
        FeatureToken::iter()
    }
}

impl Default for FeatureGate {
    fn default() -> Self {
        Self::allow_all()
    }
}
