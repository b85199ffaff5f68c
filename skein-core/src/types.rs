//! The closed type lattice used for argument-type filtering and
//! return-type intersection (§4.D). This is intentionally minimal: the
//! core does not define a concrete surface grammar or a full type
//! checker, only the lattice operations the macro/restriction pipeline
//! needs (`Top`/`Bottom` rejection, definition filtering, restriction
//! intersection).

use crate::Atom;

/// A value's static type as seen by the parser and restriction
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YieldType {
    /// The type of every value; the universal supertype.
    Top,
    /// The type of no value; the type of an expression that cannot
    /// produce a result (e.g. an unconditional early exit).
    Bottom,
    Bool,
    Integer,
    Number,
    /// A nominal type identified by atom, e.g. a declared record or
    /// enum.
    Named(Atom),
    Tuple(Vec<YieldType>),
    Function {
        params: Vec<YieldType>,
        result: Box<YieldType>,
    },
}

impl YieldType {
    pub fn is_top(&self) -> bool {
        matches!(self, YieldType::Top)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, YieldType::Bottom)
    }

    /// Whether `self` is a subtype of `other`. `Bottom` is a subtype of
    /// everything; everything is a subtype of `Top`; `Integer` is a
    /// subtype of `Number`. All other pairs require exact structural
    /// equality.
    pub fn is_subtype_of(&self, other: &YieldType) -> bool {
        if self.is_bottom() || other.is_top() {
            return true;
        }
        match (self, other) {
            (YieldType::Integer, YieldType::Number) => true,
            (YieldType::Tuple(a), YieldType::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_subtype_of(y))
            }
            (
                YieldType::Function {
                    params: ap,
                    result: ar,
                },
                YieldType::Function {
                    params: bp,
                    result: br,
                },
            ) => {
                ap.len() == bp.len()
                    && bp.iter().zip(ap).all(|(b, a)| b.is_subtype_of(a))
                    && ar.is_subtype_of(br)
            }
            _ => self == other,
        }
    }

    /// The most specific type both `self` and `other` are subtypes of.
    /// Used to intersect semantic-restriction return types (§4.D step
    /// 4) by finding a common narrowing, and falls back to `Top` when
    /// the two describe unrelated shapes.
    pub fn intersect(&self, other: &YieldType) -> YieldType {
        if self.is_subtype_of(other) {
            return self.clone();
        }
        if other.is_subtype_of(self) {
            return other.clone();
        }
        YieldType::Top
    }
}
