// This module holds the vocabulary of the memory-dependency tracker. Every node that touches
// memory names the location category it reads (its location identity) and, if it may also
// write, the categories it may invalidate (its kill set). The graph chains each new accessor
// after the most recent prior accessor whose effects overlap, and that chain is what keeps
// reads from being scheduled across writes to the same category. `Any` overlaps everything:
// stubs shared by callers with different concrete array types declare it, trading ordering
// precision for code reuse. The two traits are independent so a node can be a reader only or a
// reader and a writer.

//! Location identities, kill sets and the memory-access traits.

use std::fmt;

use super::element::ElementKind;

/// Category of memory an access may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationIdentity {
    /// Any location at all.
    Any,
    /// Contents of arrays with the given element kind.
    Array(ElementKind),
    /// A named, otherwise untyped category (e.g. off-heap buffers).
    Named(&'static str),
}

impl LocationIdentity {
    /// Location read by an operation over two arrays: precise only when both
    /// arrays have the same element kind.
    pub fn for_array_kinds(a: ElementKind, b: ElementKind) -> Self {
        if a == b {
            LocationIdentity::Array(a)
        } else {
            LocationIdentity::Any
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, LocationIdentity::Any)
    }

    /// Whether an access to `self` and one to `other` may touch the same memory.
    pub fn overlaps(&self, other: &LocationIdentity) -> bool {
        self.is_any() || other.is_any() || self == other
    }
}

impl fmt::Display for LocationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationIdentity::Any => f.write_str("ANY_LOCATION"),
            LocationIdentity::Array(kind) => write!(f, "{kind}[]"),
            LocationIdentity::Named(name) => f.write_str(name),
        }
    }
}

/// Locations an operation may invalidate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KillSet {
    #[default]
    None,
    Single(LocationIdentity),
    Multi(Vec<LocationIdentity>),
}

impl KillSet {
    pub fn is_empty(&self) -> bool {
        match self {
            KillSet::None => true,
            KillSet::Single(_) => false,
            KillSet::Multi(locations) => locations.is_empty(),
        }
    }

    pub fn identities(&self) -> &[LocationIdentity] {
        match self {
            KillSet::None => &[],
            KillSet::Single(location) => std::slice::from_ref(location),
            KillSet::Multi(locations) => locations,
        }
    }

    /// Whether a write described by this kill set may touch `location`.
    pub fn overlaps(&self, location: &LocationIdentity) -> bool {
        self.identities().iter().any(|killed| killed.overlaps(location))
    }

    /// Whether two writers may touch the same memory.
    pub fn overlaps_kill(&self, other: &KillSet) -> bool {
        other.identities().iter().any(|location| self.overlaps(location))
    }
}

impl fmt::Display for KillSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("{}");
        }
        f.write_str("{")?;
        for (i, location) in self.identities().iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{location}")?;
        }
        f.write_str("}")
    }
}

/// A node that reads memory.
pub trait MemoryAccess {
    fn location_identity(&self) -> LocationIdentity;
}

/// A node that may also write memory.
pub trait MemoryKill: MemoryAccess {
    fn kill_set(&self) -> KillSet;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_overlaps_everything() {
        let bytes = LocationIdentity::Array(ElementKind::Byte);
        let chars = LocationIdentity::Array(ElementKind::Char);
        assert!(LocationIdentity::Any.overlaps(&bytes));
        assert!(chars.overlaps(&LocationIdentity::Any));
        assert!(!bytes.overlaps(&chars));
        assert!(bytes.overlaps(&bytes));
    }

    #[test]
    fn kill_set_overlap() {
        let kill = KillSet::Single(LocationIdentity::Array(ElementKind::Byte));
        assert!(kill.overlaps(&LocationIdentity::Array(ElementKind::Byte)));
        assert!(!kill.overlaps(&LocationIdentity::Named("off-heap")));
        assert!(!KillSet::None.overlaps(&LocationIdentity::Any));
        assert!(KillSet::Single(LocationIdentity::Any).overlaps_kill(&kill));
    }

    #[test]
    fn mixed_kinds_widen_to_any() {
        assert_eq!(
            LocationIdentity::for_array_kinds(ElementKind::Byte, ElementKind::Char),
            LocationIdentity::Any
        );
        assert_eq!(
            LocationIdentity::for_array_kinds(ElementKind::Int, ElementKind::Int),
            LocationIdentity::Array(ElementKind::Int)
        );
    }
}
