//! Errors produced while structurizing a function.

use crate::spv;
use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Where (in the input module) an [`Error`] was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorContext {
    pub func: spv::Id,
    pub block: Option<spv::Id>,
    pub opcode: Option<&'static str>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function %{}", self.func)?;
        if let Some(block) = self.block {
            write!(f, ", block %{block}")?;
        }
        if let Some(opcode) = self.opcode {
            write!(f, ", at {opcode}")?;
        }
        Ok(())
    }
}

/// Failure to structurize one function (other functions are unaffected).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The control-flow graph isn't structured (missing/duplicate merges,
    /// constructs crossing each other, exits bypassing a merge, etc.).
    #[error("malformed control flow in {cx}: {msg}")]
    MalformedControlFlow { cx: ErrorContext, msg: String },

    /// A use of a value without a (reachable, dominating) definition.
    #[error("unresolved value in {cx}: {msg}")]
    UnresolvedValue { cx: ErrorContext, msg: String },

    /// Valid SPIR-V that has no structured WGSL-like lowering.
    #[error("unsupported construct in {cx}: {msg}")]
    UnsupportedConstruct { cx: ErrorContext, msg: String },

    /// Bookkeeping invariant violation (i.e. a bug in this crate).
    #[error("internal inconsistency in {cx}: {msg}")]
    InternalInconsistency { cx: ErrorContext, msg: String },
}

impl Error {
    pub fn context(&self) -> &ErrorContext {
        match self {
            Error::MalformedControlFlow { cx, .. }
            | Error::UnresolvedValue { cx, .. }
            | Error::UnsupportedConstruct { cx, .. }
            | Error::InternalInconsistency { cx, .. } => cx,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Error::MalformedControlFlow { msg, .. }
            | Error::UnresolvedValue { msg, .. }
            | Error::UnsupportedConstruct { msg, .. }
            | Error::InternalInconsistency { msg, .. } => msg,
        }
    }
}

/// Error constructor helper, tracking the [`ErrorContext`] as the analysis
/// moves through a function (see e.g. [`Reporter::at_block`]).
#[derive(Copy, Clone)]
pub struct Reporter {
    pub func: spv::Id,
    pub block: Option<spv::Id>,
    pub opcode: Option<&'static str>,
}

impl Reporter {
    pub fn new(func: spv::Id) -> Self {
        Self { func, block: None, opcode: None }
    }

    pub fn at_block(self, block: spv::Id) -> Self {
        Self { block: Some(block), opcode: None, ..self }
    }

    pub fn at_inst(self, opcode: spv::spec::Opcode) -> Self {
        Self { opcode: Some(opcode.name()), ..self }
    }

    fn cx(self) -> ErrorContext {
        ErrorContext { func: self.func, block: self.block, opcode: self.opcode }
    }

    pub fn malformed(self, msg: impl Into<String>) -> Error {
        Error::MalformedControlFlow { cx: self.cx(), msg: msg.into() }
    }

    pub fn unresolved(self, msg: impl Into<String>) -> Error {
        Error::UnresolvedValue { cx: self.cx(), msg: msg.into() }
    }

    pub fn unsupported(self, msg: impl Into<String>) -> Error {
        Error::UnsupportedConstruct { cx: self.cx(), msg: msg.into() }
    }

    pub fn internal(self, msg: impl Into<String>) -> Error {
        Error::InternalInconsistency { cx: self.cx(), msg: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let id = |x| spv::Id::new(x).unwrap();
        let err = Reporter::new(id(100)).at_block(id(20)).malformed("oops");
        assert_eq!(err.to_string(), "malformed control flow in function %100, block %20: oops");

        let err = Reporter::new(id(7)).unsupported("fallthrough");
        assert_eq!(err.to_string(), "unsupported construct in function %7: fallthrough");
        assert_eq!(err.message(), "fallthrough");
    }
}
