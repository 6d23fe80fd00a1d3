//! Base-kernel catalog and leaf parameter storage.
//!
//! A leaf is one irreducible building block of a kernel expression. Its
//! parameters live in an [`EvalHandle`] that is materialized on first access
//! and never shared between clones.

use core::fmt;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Base kernels available to the grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BaseKind {
    /// Squared exponential: variance, lengthscale.
    #[serde(rename = "SE")]
    SquaredExp,
    /// Periodic: variance, lengthscale, period.
    #[serde(rename = "PER")]
    Periodic,
    /// Linear: variance.
    #[serde(rename = "LIN")]
    Linear,
}

impl BaseKind {
    /// Every base kind, in default catalog order.
    pub const ALL: [BaseKind; 3] = [Self::SquaredExp, Self::Linear, Self::Periodic];

    /// Number of continuous parameters.
    pub const fn arity(self) -> usize {
        match self {
            Self::SquaredExp => 2,
            Self::Periodic => 3,
            Self::Linear => 1,
        }
    }

    /// Serialized tag, used for canonical ordering and display.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::SquaredExp => "SE",
            Self::Periodic => "PER",
            Self::Linear => "LIN",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SE" => Some(Self::SquaredExp),
            "PER" => Some(Self::Periodic),
            "LIN" => Some(Self::Linear),
            _ => None,
        }
    }

    /// Initial parameter values used when a leaf has none set.
    pub fn default_params(self) -> Vec<f64> {
        vec![1.0; self.arity()]
    }
}

impl fmt::Display for BaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Combination rule of an operator node. Both rules are associative and
/// commutative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CombRule {
    #[serde(rename = "+")]
    Sum,
    #[serde(rename = "*")]
    Product,
}

impl CombRule {
    pub const ALL: [CombRule; 2] = [Self::Sum, Self::Product];

    pub const fn tag(self) -> &'static str {
        match self {
            Self::Sum => "+",
            Self::Product => "*",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "+" => Some(Self::Sum),
            "*" => Some(Self::Product),
            _ => None,
        }
    }
}

impl fmt::Display for CombRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Materialized evaluation state of a leaf.
///
/// Stands in for the external model object a scorer evaluates against.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalHandle {
    kind: BaseKind,
    values: Vec<f64>,
}

impl EvalHandle {
    fn materialize(kind: BaseKind, params: Option<&[f64]>) -> Self {
        log::trace!("Materializing {} handle", kind);
        let values = params.map_or_else(|| kind.default_params(), <[f64]>::to_vec);
        Self { kind, values }
    }

    pub fn kind(&self) -> BaseKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// A base-kernel leaf.
///
/// The handle is created lazily by [`Leaf::params`] / [`Leaf::handle`].
/// Cloning carries the current parameter values over but always yields an
/// unmaterialized handle.
#[derive(Debug)]
pub struct Leaf {
    kind: BaseKind,
    params: Option<Vec<f64>>,
    fixed: bool,
    handle: OnceCell<EvalHandle>,
}

impl Leaf {
    /// Leaf with default-initialized parameters.
    pub fn new(kind: BaseKind) -> Self {
        Self {
            kind,
            params: None,
            fixed: false,
            handle: OnceCell::new(),
        }
    }

    /// Leaf with explicit parameters; fails if the length is not the kind's arity.
    pub fn with_params(kind: BaseKind, params: Vec<f64>) -> Result<Self, KernelError> {
        check_arity(kind, &params)?;
        Ok(Self {
            params: Some(params),
            ..Self::new(kind)
        })
    }

    pub fn kind(&self) -> BaseKind {
        self.kind
    }

    pub fn arity(&self) -> usize {
        self.kind.arity()
    }

    /// Whether explicit parameters were set (otherwise defaults apply).
    pub fn has_params(&self) -> bool {
        self.params.is_some()
    }

    pub fn is_materialized(&self) -> bool {
        self.handle.get().is_some()
    }

    /// Evaluation handle, materialized on first access.
    pub fn handle(&self) -> &EvalHandle {
        self.handle
            .get_or_init(|| EvalHandle::materialize(self.kind, self.params.as_deref()))
    }

    /// Current parameter values.
    pub fn params(&self) -> &[f64] {
        self.handle().values()
    }

    pub fn set_params(&mut self, params: Vec<f64>) -> Result<(), KernelError> {
        if self.fixed {
            return Err(KernelError::ParamsFixed(self.kind));
        }
        check_arity(self.kind, &params)?;
        if let Some(handle) = self.handle.get_mut() {
            handle.values.clone_from(&params);
        }
        self.params = Some(params);
        Ok(())
    }

    /// Freeze the parameters; later `set_params` calls fail.
    pub fn fix_params(&mut self) {
        self.fixed = true;
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }
}

impl Clone for Leaf {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            params: self.params.clone(),
            fixed: self.fixed,
            handle: OnceCell::new(),
        }
    }
}

fn check_arity(kind: BaseKind, params: &[f64]) -> Result<(), KernelError> {
    if params.len() != kind.arity() {
        return Err(KernelError::ArityMismatch {
            kind,
            expected: kind.arity(),
            got: params.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_arity_checked_at_construction() {
        let err = Leaf::with_params(BaseKind::Periodic, vec![1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            KernelError::ArityMismatch {
                kind: BaseKind::Periodic,
                expected: 3,
                got: 2
            }
        );
        assert!(Leaf::with_params(BaseKind::Linear, vec![0.5]).is_ok());
    }

    #[test_log::test]
    fn test_handle_materializes_on_first_access() {
        let leaf = Leaf::new(BaseKind::SquaredExp);
        assert!(!leaf.is_materialized());
        assert!(!leaf.has_params());
        assert_eq!(leaf.params(), &[1.0, 1.0]);
        assert!(leaf.is_materialized());
        assert_eq!(leaf.handle().kind(), BaseKind::SquaredExp);
        assert!(!leaf.has_params());
    }

    #[test_log::test]
    fn test_set_params_rejects_wrong_length_without_change() {
        let mut leaf = Leaf::with_params(BaseKind::SquaredExp, vec![2.0, 3.0]).unwrap();
        assert!(leaf.set_params(vec![1.0]).is_err());
        assert_eq!(leaf.params(), &[2.0, 3.0]);
    }

    #[test_log::test]
    fn test_set_params_updates_materialized_handle() {
        let mut leaf = Leaf::new(BaseKind::Linear);
        assert_eq!(leaf.params(), &[1.0]);
        leaf.set_params(vec![4.0]).unwrap();
        assert!(leaf.has_params());
        assert_eq!(leaf.params(), &[4.0]);
        assert_eq!(leaf.handle().values(), &[4.0]);
    }

    #[test_log::test]
    fn test_clone_resets_handle_keeps_values() {
        let mut leaf = Leaf::new(BaseKind::Periodic);
        leaf.set_params(vec![1.0, 2.0, 3.0]).unwrap();
        let _ = leaf.params();
        let copy = leaf.clone();
        assert!(leaf.is_materialized());
        assert!(!copy.is_materialized());
        assert_eq!(copy.params(), &[1.0, 2.0, 3.0]);
    }

    #[test_log::test]
    fn test_fixed_params_refuse_updates() {
        let mut leaf = Leaf::new(BaseKind::Linear);
        leaf.fix_params();
        assert_eq!(
            leaf.set_params(vec![2.0]),
            Err(KernelError::ParamsFixed(BaseKind::Linear))
        );
    }

    #[test_log::test]
    fn test_tags_round_trip() {
        for kind in BaseKind::ALL {
            assert_eq!(BaseKind::from_tag(kind.tag()), Some(kind));
        }
        for rule in CombRule::ALL {
            assert_eq!(CombRule::from_tag(rule.tag()), Some(rule));
        }
    }
}
