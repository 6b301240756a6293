use crate::code::InsnId;
use crate::constant::ConstantRef;
use std::fmt;

/// Handle to an exception handler registered in an
/// [`crate::code::InstructionGraph`].
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct HandlerId(pub(crate) usize);

impl fmt::Debug for HandlerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("h{}", self.0))
    }
}

pub(crate) struct HandlerData {
    /// First guarded instruction.
    pub(crate) start: InsnId,

    /// End of the guarded range, exclusive.
    pub(crate) end: InsnId,

    /// Where control lands when the handler fires (with the thrown value as
    /// the only stack entry).
    pub(crate) catch_at: InsnId,

    /// Protected exception type; `None` guards against everything.
    pub(crate) catch_type: Option<ConstantRef>,
}

/// Resolved exception-table row, produced in handler-registration order.
#[derive(Clone, Debug)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,

    /// Reference into the external constant pool, `None` for catch-all.
    pub catch_type: Option<ConstantRef>,
}
