use crate::types::ValueType;
use std::fmt;

/// Handle to a local variable declared in an [`crate::code::InstructionGraph`].
///
/// The handle is the variable's declaration-order identity and never changes;
/// the slot number behind it is assigned during resolution (or at declaration
/// time for parameters).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct LocalId(pub(crate) usize);

impl fmt::Debug for LocalId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("v{}", self.0))
    }
}

pub(crate) struct LocalData {
    pub(crate) name: Option<String>,
    pub(crate) ty: ValueType,

    /// Assigned slot number. `Some` from the start for fixed variables,
    /// filled in by the slot allocator otherwise (and left `None` for
    /// variables that are never live).
    pub(crate) number: Option<u16>,

    /// Fixed variables (parameters, subroutine return addresses) keep their
    /// slot; everything else is fair game for the allocator.
    pub(crate) fixed: bool,
}
