use super::handlers::{ExceptionTableEntry, HandlerData, HandlerId};
use super::insn::{InsnData, InsnId, InsnKind};
use super::locals::{LocalData, LocalId};
use super::switches::SwitchData;
use super::{liveness, slots, stack};
use crate::constant::ConstantRef;
use crate::errors::Error;
use crate::opcode;
use crate::types::ValueType;
use std::fmt;

/// Mutable method body under construction, and the resolver that turns it
/// into bytecode.
///
/// Instructions are created through the builder methods below and appended to
/// the chain as they are made (labels are the exception: they are created
/// unplaced and only enter the chain through [`Self::place_label`]). The
/// derived outputs - [`Self::bytecode`], [`Self::max_stack`],
/// [`Self::max_locals`] and [`Self::exception_table`] - resolve the whole
/// graph on first access and come from the cache afterwards, until the next
/// structural mutation throws the cache away.
pub struct InstructionGraph {
    pub(crate) arena: Vec<InsnData>,
    pub(crate) first: Option<InsnId>,
    pub(crate) last: Option<InsnId>,

    pub(crate) locals: Vec<LocalData>,
    pub(crate) handlers: Vec<HandlerData>,

    /// Next slot number handed to a fixed variable (parameters and
    /// subroutine return addresses share the counter).
    next_fixed_slot: u16,

    /// True only while the memoized outputs below match the graph.
    resolved: bool,

    bytes: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
    exception_table: Vec<ExceptionTableEntry>,
}

impl InstructionGraph {
    pub fn new() -> InstructionGraph {
        InstructionGraph {
            arena: Vec::new(),
            first: None,
            last: None,
            locals: Vec::new(),
            handlers: Vec::new(),
            next_fixed_slot: 0,
            resolved: false,
            bytes: Vec::new(),
            max_stack: 0,
            max_locals: 0,
            exception_table: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Declarations

    /// Declare a local variable. It gets a slot from the allocator, shared
    /// with other locals whose live ranges do not overlap - or no slot at
    /// all if it is never live.
    pub fn declare_local(&mut self, name: Option<&str>, ty: ValueType) -> LocalId {
        self.resolved = false;
        let id = LocalId(self.locals.len());
        self.locals.push(LocalData {
            name: name.map(str::to_owned),
            ty,
            number: None,
            fixed: false,
        });
        id
    }

    /// Declare a parameter. Parameters own fixed, consecutive slots in
    /// declaration order (two for double-word types) and must all be
    /// declared before instructions referring to them are appended.
    pub fn declare_parameter(&mut self, name: Option<&str>, ty: ValueType) -> LocalId {
        self.resolved = false;
        let id = LocalId(self.locals.len());
        self.locals.push(LocalData {
            name: name.map(str::to_owned),
            ty,
            number: Some(self.next_fixed_slot),
            fixed: true,
        });
        self.next_fixed_slot += ty.width();
        id
    }

    /// Guard the range `[start, end)` with a handler entered at `catch_at`
    /// holding the thrown value as the only stack entry. `catch_type` of
    /// `None` catches everything.
    pub fn add_exception_handler(
        &mut self,
        start: InsnId,
        end: InsnId,
        catch_at: InsnId,
        catch_type: Option<ConstantRef>,
    ) -> HandlerId {
        self.resolved = false;
        let id = HandlerId(self.handlers.len());
        self.handlers.push(HandlerData {
            start,
            end,
            catch_at,
            catch_type,
        });
        id
    }

    // ------------------------------------------------------------------
    // Instruction creation (everything but `label` appends to the chain)

    /// Append fully-formed opcode bytes with the given stack effect.
    pub fn plain(&mut self, stack_adjust: i16, bytes: Vec<u8>) -> InsnId {
        self.push_insn(InsnKind::Plain { bytes }, stack_adjust)
    }

    /// Append a branch to `target`. Accepts the conditional branches,
    /// `goto`/`goto_w` and `jsr`/`jsr_w`; the stack effect follows from the
    /// opcode.
    pub fn branch(&mut self, op: u8, target: InsnId) -> Result<InsnId, Error> {
        if !opcode::is_branch(op) {
            return Err(Error::InvalidBranchOpcode(op));
        }
        let adjust = opcode::branch_stack_delta(op);
        Ok(self.push_insn(
            InsnKind::Branch {
                op,
                target,
                short_hop: false,
            },
            adjust,
        ))
    }

    /// Append opcode bytes whose second and third byte are a constant-pool
    /// index, patched in once the pool provider assigns one.
    pub fn constant_op(
        &mut self,
        stack_adjust: i16,
        bytes: Vec<u8>,
        constant: ConstantRef,
    ) -> InsnId {
        debug_assert!(bytes.len() >= 3, "no room to patch the pool index");
        self.push_insn(InsnKind::ConstantOp { bytes, constant }, stack_adjust)
    }

    /// Append a constant load. Single-word constants use `ldc` or `ldc_w`
    /// depending on the index; double-word constants always use `ldc2_w`.
    pub fn load_constant(&mut self, constant: ConstantRef, double_word: bool) -> InsnId {
        let adjust = if double_word { 2 } else { 1 };
        self.push_insn(
            InsnKind::LoadConstant {
                constant,
                double_word,
            },
            adjust,
        )
    }

    /// Append a load of `local` onto the stack.
    pub fn load_local(&mut self, local: LocalId) -> InsnId {
        let adjust = self.locals[local.0].ty.width() as i16;
        self.push_insn(InsnKind::LoadLocal { local }, adjust)
    }

    /// Append a store of the top of the stack into `local`. If liveness
    /// analysis finds the value is never read again, the store encodes as a
    /// pop of matching width instead.
    pub fn store_local(&mut self, local: LocalId) -> InsnId {
        let adjust = -(self.locals[local.0].ty.width() as i16);
        self.push_insn(
            InsnKind::StoreLocal {
                local,
                discard: false,
            },
            adjust,
        )
    }

    /// Append an in-place increment of an int local.
    pub fn increment(&mut self, local: LocalId, amount: i16) -> InsnId {
        self.push_insn(InsnKind::Increment { local, amount }, 0)
    }

    /// Append a `ret` through the given return-address local.
    ///
    /// Return-address locals are pinned to the next fixed slot right here;
    /// subroutines are rare enough that optimizing their address variable is
    /// not worth complicating the allocator.
    pub fn subroutine_ret(&mut self, local: LocalId) -> InsnId {
        let data = &mut self.locals[local.0];
        if !data.fixed {
            data.number = Some(self.next_fixed_slot);
            data.fixed = true;
            self.next_fixed_slot += 1;
        }
        self.push_insn(InsnKind::SubroutineRet { local }, 0)
    }

    /// Append a switch over the int on top of the stack. The dense
    /// (`tableswitch`) or sparse (`lookupswitch`) layout is picked by
    /// encoded size; a duplicate case value is rejected here, before the
    /// instruction enters the graph.
    pub fn switch(
        &mut self,
        cases: &[i32],
        targets: &[InsnId],
        default: InsnId,
    ) -> Result<InsnId, Error> {
        let data = SwitchData::new(cases, targets, default)?;
        // The switch key is popped off the stack.
        Ok(self.push_insn(InsnKind::Switch(data), -1))
    }

    /// Create an unplaced label. It does not belong to the chain until
    /// [`Self::place_label`] (or [`Self::insert_after`]) links it in, and its
    /// address cannot be resolved before then.
    pub fn label(&mut self) -> InsnId {
        self.new_insn(InsnKind::Label, 0)
    }

    /// Place a label at the current end of the chain. Placing an
    /// already-placed label moves it.
    pub fn place_label(&mut self, label: InsnId) {
        debug_assert!(
            matches!(self.arena[label.0].kind, InsnKind::Label),
            "placing a non-label instruction"
        );
        self.link_at_end(label);
    }

    // ------------------------------------------------------------------
    // Chain mutation

    /// Unlink an instruction from the chain. The handle stays valid and the
    /// instruction can be linked back in later.
    pub fn remove(&mut self, id: InsnId) {
        self.unlink(id);
    }

    /// Link `id` immediately after `anchor`, unlinking it from its current
    /// position first if necessary.
    pub fn insert_after(&mut self, anchor: InsnId, id: InsnId) {
        if self.arena[id.0].linked {
            self.unlink(id);
        }
        self.link_after(anchor, id);
    }

    /// Splice `with` into `id`'s position; `id` ends up unlinked.
    pub fn replace(&mut self, id: InsnId, with: InsnId) {
        if self.arena[with.0].linked {
            self.unlink(with);
        }
        self.resolved = false;

        let prev = self.arena[id.0].prev;
        let next = self.arena[id.0].next;
        self.arena[with.0].prev = prev;
        self.arena[with.0].next = next;
        self.arena[with.0].linked = true;

        if let Some(prev) = prev {
            self.arena[prev.0].next = Some(with);
        }
        if let Some(next) = next {
            self.arena[next.0].prev = Some(with);
        }
        if self.first == Some(id) {
            self.first = Some(with);
        }
        if self.last == Some(id) {
            self.last = Some(with);
        }

        let old = &mut self.arena[id.0];
        old.prev = None;
        old.next = None;
        old.linked = false;
        old.location = None;
        old.reached_depth = None;
    }

    pub(crate) fn new_insn(&mut self, kind: InsnKind, stack_adjust: i16) -> InsnId {
        let id = InsnId(self.arena.len());
        self.arena.push(InsnData {
            kind,
            stack_adjust,
            prev: None,
            next: None,
            linked: false,
            location: None,
            reached_depth: None,
            handlers: Vec::new(),
        });
        id
    }

    fn push_insn(&mut self, kind: InsnKind, stack_adjust: i16) -> InsnId {
        let id = self.new_insn(kind, stack_adjust);
        self.link_at_end(id);
        id
    }

    fn link_at_end(&mut self, id: InsnId) {
        self.resolved = false;
        if self.arena[id.0].linked {
            self.unlink(id);
        }

        match self.last {
            None => self.first = Some(id),
            Some(last) => {
                self.arena[last.0].next = Some(id);
                self.arena[id.0].prev = Some(last);
            }
        }
        self.last = Some(id);
        self.arena[id.0].linked = true;
    }

    pub(crate) fn link_after(&mut self, anchor: InsnId, id: InsnId) {
        debug_assert!(self.arena[anchor.0].linked, "anchor is not in the chain");
        debug_assert!(!self.arena[id.0].linked, "instruction is already linked");
        self.resolved = false;

        let next = self.arena[anchor.0].next;
        self.arena[id.0].prev = Some(anchor);
        self.arena[id.0].next = next;
        self.arena[anchor.0].next = Some(id);
        match next {
            Some(next) => self.arena[next.0].prev = Some(id),
            None => self.last = Some(id),
        }
        self.arena[id.0].linked = true;
    }

    fn unlink(&mut self, id: InsnId) {
        self.resolved = false;

        let prev = self.arena[id.0].prev;
        let next = self.arena[id.0].next;
        if let Some(prev) = prev {
            self.arena[prev.0].next = next;
        }
        if let Some(next) = next {
            self.arena[next.0].prev = prev;
        }
        if self.first == Some(id) {
            self.first = next;
        }
        if self.last == Some(id) {
            self.last = prev;
        }

        let data = &mut self.arena[id.0];
        data.prev = None;
        data.next = None;
        data.linked = false;
        // An instruction outside the chain has no address; leaving a stale
        // one behind would let branches keep targeting it.
        data.location = None;
        data.reached_depth = None;
    }

    // ------------------------------------------------------------------
    // Resolution and outputs

    /// Run the resolution pipeline unless the cached outputs are current.
    pub fn resolve(&mut self) -> Result<(), Error> {
        if self.resolved {
            return Ok(());
        }
        self.resolve_now()?;
        // Set last: branch widening relinks instructions mid-resolution,
        // which clears the flag again while the passes run.
        self.resolved = true;
        Ok(())
    }

    fn resolve_now(&mut self) -> Result<(), Error> {
        // Addresses start out as chain indexes: liveness and the stack
        // analysis use them as compact positions, and the encoding passes
        // replace them with real byte offsets afterwards.
        let mut count: u32 = 0;
        let mut at = self.first;
        while let Some(id) = at {
            let data = &mut self.arena[id.0];
            data.location = Some(count);
            data.reached_depth = None;
            data.handlers.clear();
            if let InsnKind::StoreLocal { discard, .. } = &mut data.kind {
                *discard = false;
            }
            count += 1;
            at = data.next;
        }
        log::debug!("resolving {} instructions", count);

        for local in &mut self.locals {
            if !local.fixed {
                local.number = None;
            }
        }

        // Handler endpoints must be placed before anything can be guarded.
        for handler in &self.handlers {
            for id in [handler.start, handler.end, handler.catch_at] {
                if !self.arena[id.0].linked {
                    return Err(Error::UnplacedLabel(id));
                }
            }
        }

        // Register each handler with every instruction in its guarded range.
        for index in 0..self.handlers.len() {
            let start = self.handlers[index].start;
            let end = self.handlers[index].end;
            let mut at = Some(start);
            while let Some(id) = at {
                if id == end {
                    break;
                }
                self.arena[id.0].handlers.push(HandlerId(index));
                at = self.arena[id.0].next;
            }
        }

        let live = liveness::analyze(self, count as usize)?;
        let max_locals = slots::allocate(self, &live.live)?;
        let max_stack = stack::analyze(self)?;
        let bytes = self.resolve_addresses()?;

        let max_stack = u16::try_from(max_stack).map_err(|_| Error::MaxStackOverflow(max_stack))?;
        let max_locals =
            u16::try_from(max_locals).map_err(|_| Error::MaxLocalsOverflow(max_locals))?;

        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            exception_table.push(ExceptionTableEntry {
                start_pc: code_index(self.expect_location(handler.start)?)?,
                end_pc: code_index(self.expect_location(handler.end)?)?,
                handler_pc: code_index(self.expect_location(handler.catch_at)?)?,
                catch_type: handler.catch_type.clone(),
            });
        }

        log::debug!(
            "resolved method body: {} bytes, max stack {}, max locals {}",
            bytes.len(),
            max_stack,
            max_locals
        );

        self.bytes = bytes;
        self.max_stack = max_stack;
        self.max_locals = max_locals;
        self.exception_table = exception_table;
        Ok(())
    }

    /// The resolved bytecode.
    pub fn bytecode(&mut self) -> Result<&[u8], Error> {
        self.resolve()?;
        Ok(&self.bytes)
    }

    /// Maximum operand stack depth over all reachable paths.
    pub fn max_stack(&mut self) -> Result<u16, Error> {
        self.resolve()?;
        Ok(self.max_stack)
    }

    /// Size of the locals area: fixed slots plus allocated slots.
    pub fn max_locals(&mut self) -> Result<u16, Error> {
        self.resolve()?;
        Ok(self.max_locals)
    }

    /// Resolved exception table, in handler-registration order.
    pub fn exception_table(&mut self) -> Result<&[ExceptionTableEntry], Error> {
        self.resolve()?;
        Ok(&self.exception_table)
    }

    // ------------------------------------------------------------------
    // Inspection

    /// Walk the chain front to back.
    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            graph: self,
            at: self.first,
        }
    }

    /// Resolved address of an instruction (meaningful after a successful
    /// resolution; labels only have addresses once placed).
    pub fn location(&self, id: InsnId) -> Option<u32> {
        self.arena[id.0].location
    }

    /// Stack depth on entry to an instruction, or `None` if the last
    /// resolution never reached it.
    pub fn reached_depth(&self, id: InsnId) -> Option<u32> {
        self.arena[id.0].reached_depth
    }

    /// Slot assigned to a local (after resolution). `None` for a variable
    /// that is never live.
    pub fn local_slot(&self, local: LocalId) -> Option<u16> {
        self.locals[local.0].number
    }

    pub fn local_type(&self, local: LocalId) -> ValueType {
        self.locals[local.0].ty
    }

    pub fn local_name(&self, local: LocalId) -> Option<&str> {
        self.locals[local.0].name.as_deref()
    }

    pub(crate) fn expect_location(&self, id: InsnId) -> Result<u32, Error> {
        self.arena[id.0].location.ok_or(Error::UnplacedLabel(id))
    }

    pub(crate) fn slot_of(&self, local: LocalId) -> Result<u16, Error> {
        self.locals[local.0]
            .number
            .ok_or(Error::UnresolvedLocal(local))
    }
}

impl Default for InstructionGraph {
    fn default() -> Self {
        InstructionGraph::new()
    }
}

fn code_index(address: u32) -> Result<u16, Error> {
    u16::try_from(address).map_err(|_| Error::CodeSizeOverflow(address as usize))
}

/// Iterator over the instruction chain.
pub struct Instructions<'a> {
    graph: &'a InstructionGraph,
    at: Option<InsnId>,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = InsnId;

    fn next(&mut self) -> Option<InsnId> {
        let id = self.at?;
        self.at = self.graph.arena[id.0].next;
        Some(id)
    }
}

impl fmt::Debug for InstructionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for id in self.instructions() {
            let data = &self.arena[id.0];
            // Instructions the stack analysis never reached get an asterisk.
            let reached = if data.reached_depth.is_some() { ' ' } else { '*' };
            list.entry(&format_args!(
                "{}[{}] {} ({:+})",
                reached,
                data.location.map(|loc| loc as i64).unwrap_or(-1),
                self.describe(id),
                data.stack_adjust,
            ));
        }
        list.finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn chain(graph: &InstructionGraph) -> Vec<InsnId> {
        graph.instructions().collect()
    }

    #[test]
    fn creation_appends_in_order() {
        let mut graph = InstructionGraph::new();
        let a = graph.plain(0, vec![opcode::NOP]);
        let b = graph.plain(0, vec![opcode::NOP]);
        let c = graph.plain(0, vec![opcode::RETURN]);
        assert_eq!(chain(&graph), vec![a, b, c]);
    }

    #[test]
    fn insert_after_and_remove() {
        let mut graph = InstructionGraph::new();
        let a = graph.plain(0, vec![opcode::NOP]);
        let b = graph.plain(0, vec![opcode::RETURN]);

        let label = graph.label();
        graph.insert_after(a, label);
        assert_eq!(chain(&graph), vec![a, label, b]);

        graph.remove(label);
        assert_eq!(chain(&graph), vec![a, b]);

        // Removal keeps the handle usable; place it again at the end.
        graph.place_label(label);
        assert_eq!(chain(&graph), vec![a, b, label]);
    }

    #[test]
    fn remove_head_and_tail() {
        let mut graph = InstructionGraph::new();
        let a = graph.plain(0, vec![opcode::NOP]);
        let b = graph.plain(0, vec![opcode::NOP]);
        let c = graph.plain(0, vec![opcode::RETURN]);

        graph.remove(a);
        assert_eq!(chain(&graph), vec![b, c]);
        graph.remove(c);
        assert_eq!(chain(&graph), vec![b]);
        graph.remove(b);
        assert_eq!(chain(&graph), vec![]);
        assert_eq!(graph.first, None);
        assert_eq!(graph.last, None);
    }

    #[test]
    fn replace_splices_in_place() {
        let mut graph = InstructionGraph::new();
        let a = graph.plain(0, vec![opcode::NOP]);
        let b = graph.plain(0, vec![opcode::NOP]);
        let c = graph.plain(0, vec![opcode::RETURN]);

        let swap = graph.new_insn(
            InsnKind::Plain {
                bytes: vec![opcode::SWAP],
            },
            0,
        );
        graph.replace(b, swap);
        assert_eq!(chain(&graph), vec![a, swap, c]);
        assert!(!graph.arena[b.0].linked);

        // Replacing the head updates the entry point.
        let nop = graph.new_insn(
            InsnKind::Plain {
                bytes: vec![opcode::NOP],
            },
            0,
        );
        graph.replace(a, nop);
        assert_eq!(graph.first, Some(nop));
    }

    #[test]
    fn parameters_take_consecutive_width_aware_slots() {
        let mut graph = InstructionGraph::new();
        let a = graph.declare_parameter(Some("a"), ValueType::Int);
        let b = graph.declare_parameter(Some("b"), ValueType::Long);
        let c = graph.declare_parameter(None, ValueType::Reference);

        assert_eq!(graph.local_slot(a), Some(0));
        assert_eq!(graph.local_slot(b), Some(1));
        assert_eq!(graph.local_slot(c), Some(3));
        assert_eq!(graph.local_name(a), Some("a"));
        assert_eq!(graph.local_name(c), None);
    }
}
