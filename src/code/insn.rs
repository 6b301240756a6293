//! Instruction records and their encodings
//!
//! Instruction kinds form a closed set: the resolver relies on exhaustive
//! matches to classify flow, find branch targets and produce bytes. Encoding
//! is not a pure function of the instruction - local loads and stores pick
//! short or wide forms from the assigned slot, constant operands patch in
//! their pool index, and branches may rewrite themselves (and splice a wide
//! jump into the chain) when their offset outgrows the 16-bit form.

use super::graph::InstructionGraph;
use super::locals::LocalId;
use super::switches::SwitchData;
use crate::constant::ConstantRef;
use crate::errors::Error;
use crate::opcode;
use crate::types::ValueType;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::fmt;

/// Handle to an instruction in an [`InstructionGraph`].
///
/// Handles stay valid across chain mutation; removing an instruction only
/// unlinks it.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct InsnId(pub(crate) usize);

impl fmt::Debug for InsnId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("i{}", self.0))
    }
}

pub(crate) struct InsnData {
    pub(crate) kind: InsnKind,

    /// Static effect on the operand stack depth.
    pub(crate) stack_adjust: i16,

    pub(crate) prev: Option<InsnId>,
    pub(crate) next: Option<InsnId>,
    pub(crate) linked: bool,

    /// Resolved address; starts out as the chain index during resolution and
    /// becomes a byte offset once the encoding passes run.
    pub(crate) location: Option<u32>,

    /// Stack depth on entry, recorded by the stack analysis. `None` means the
    /// instruction was never reached.
    pub(crate) reached_depth: Option<u32>,

    /// Handlers whose guarded range covers this instruction.
    pub(crate) handlers: Vec<super::handlers::HandlerId>,
}

#[derive(Clone, Debug)]
pub(crate) enum InsnKind {
    /// Fully-formed opcode bytes with nothing left to resolve.
    Plain { bytes: Vec<u8> },

    /// 16-bit-offset branch, upgraded in place when the offset outgrows it.
    /// `short_hop` marks a conditional that was negated to hop over an
    /// inserted `goto_w`; its offset is then a fixed 8 bytes.
    Branch {
        op: u8,
        target: InsnId,
        short_hop: bool,
    },

    /// Opcode bytes whose second and third byte are a constant-pool index,
    /// patched at encoding time (field accesses, invokes, `new`, ...).
    ConstantOp {
        bytes: Vec<u8>,
        constant: ConstantRef,
    },

    /// `ldc`/`ldc_w`/`ldc2_w`, picked from the index and the value width.
    LoadConstant {
        constant: ConstantRef,
        double_word: bool,
    },

    LoadLocal { local: LocalId },

    /// `discard` is set by liveness analysis when the stored value is never
    /// read again; the store then encodes as a pop of matching width.
    StoreLocal { local: LocalId, discard: bool },

    Increment { local: LocalId, amount: i16 },

    /// `ret` - returns from a subroutine through a return-address local.
    SubroutineRet { local: LocalId },

    Switch(SwitchData),

    /// Zero-width marker; only its address matters.
    Label,
}

impl InsnKind {
    /// May execution continue into the next instruction in the chain?
    pub(crate) fn flows_through(&self) -> bool {
        match self {
            InsnKind::Plain { bytes } | InsnKind::ConstantOp { bytes, .. } => {
                bytes.first().map_or(true, |op| !opcode::ends_flow(*op))
            }
            InsnKind::Branch { op, .. } => !matches!(*op, opcode::GOTO | opcode::GOTO_W),
            InsnKind::SubroutineRet { .. } | InsnKind::Switch(_) => false,
            _ => true,
        }
    }

    pub(crate) fn is_subroutine_call(&self) -> bool {
        matches!(self, InsnKind::Branch { op, .. } if opcode::is_subroutine_branch(*op))
    }

    /// Visit every explicit branch target. Switches report their case
    /// targets first and the default target last.
    pub(crate) fn for_each_target<F: FnMut(InsnId)>(&self, mut f: F) {
        match self {
            InsnKind::Branch { target, .. } => f(*target),
            InsnKind::Switch(switch) => {
                for target in &switch.targets {
                    f(*target);
                }
                f(switch.default);
            }
            _ => {}
        }
    }

    /// Local variable read and written by this instruction, if any. An
    /// increment does both; a subroutine return reads its address local.
    pub(crate) fn use_def(&self) -> (Option<LocalId>, Option<LocalId>) {
        match self {
            InsnKind::LoadLocal { local } => (Some(*local), None),
            InsnKind::StoreLocal { local, .. } => (None, Some(*local)),
            InsnKind::Increment { local, .. } => (Some(*local), Some(*local)),
            InsnKind::SubroutineRet { local } => (Some(*local), None),
            _ => (None, None),
        }
    }
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.write_u16::<BigEndian>(value)
        .expect("writing to a Vec cannot fail");
}

pub(crate) fn put_i16(buf: &mut Vec<u8>, value: i16) {
    buf.write_i16::<BigEndian>(value)
        .expect("writing to a Vec cannot fail");
}

pub(crate) fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.write_i32::<BigEndian>(value)
        .expect("writing to a Vec cannot fail");
}

fn emit_load(buf: &mut Vec<u8>, ty: ValueType, slot: u16) {
    if slot <= 3 {
        buf.push(opcode::load_short(ty, slot as u8));
    } else if slot <= 255 {
        buf.push(opcode::load_general(ty));
        buf.push(slot as u8);
    } else {
        buf.push(opcode::WIDE);
        buf.push(opcode::load_general(ty));
        put_u16(buf, slot);
    }
}

fn emit_store(buf: &mut Vec<u8>, ty: ValueType, slot: u16) {
    if slot <= 3 {
        buf.push(opcode::store_short(ty, slot as u8));
    } else if slot <= 255 {
        buf.push(opcode::store_general(ty));
        buf.push(slot as u8);
    } else {
        buf.push(opcode::WIDE);
        buf.push(opcode::store_general(ty));
        put_u16(buf, slot);
    }
}

impl InstructionGraph {
    /// Append the instruction's bytes for its current resolution state.
    ///
    /// The resolver assigns `location` before calling this. Branch
    /// instructions may rewrite themselves here (see [`Self::encode_branch`]).
    pub(crate) fn encode_insn(&mut self, id: InsnId, buf: &mut Vec<u8>) -> Result<(), Error> {
        let location = self.arena[id.0]
            .location
            .expect("address assigned before encoding");

        // Branches may mutate the chain while encoding, so copy their fields
        // out before dispatching.
        if let InsnKind::Branch {
            op,
            target,
            short_hop,
        } = &self.arena[id.0].kind
        {
            let (op, target, short_hop) = (*op, *target, *short_hop);
            return self.encode_branch(id, location, op, target, short_hop, buf);
        }

        match &self.arena[id.0].kind {
            InsnKind::Plain { bytes } => buf.extend_from_slice(bytes),

            InsnKind::ConstantOp { bytes, constant } => {
                let index = constant.index().ok_or(Error::UnresolvedConstant)?;
                let start = buf.len();
                buf.extend_from_slice(bytes);
                BigEndian::write_u16(&mut buf[start + 1..start + 3], index);
            }

            InsnKind::LoadConstant {
                constant,
                double_word,
            } => {
                let index = constant.index().ok_or(Error::UnresolvedConstant)?;
                if *double_word {
                    buf.push(opcode::LDC2_W);
                    put_u16(buf, index);
                } else if index <= 255 {
                    buf.push(opcode::LDC);
                    buf.push(index as u8);
                } else {
                    buf.push(opcode::LDC_W);
                    put_u16(buf, index);
                }
            }

            InsnKind::LoadLocal { local } => {
                let slot = self.slot_of(*local)?;
                emit_load(buf, self.locals[local.0].ty, slot);
            }

            InsnKind::StoreLocal { local, discard } => {
                if *discard {
                    // The stored value is never read again; just drop it.
                    let double = self.locals[local.0].ty.is_double_word();
                    buf.push(if double { opcode::POP2 } else { opcode::POP });
                } else {
                    let slot = self.slot_of(*local)?;
                    emit_store(buf, self.locals[local.0].ty, slot);
                }
            }

            InsnKind::Increment { local, amount } => {
                let slot = self.slot_of(*local)?;
                if (-128..=127).contains(amount) && slot <= 255 {
                    buf.push(opcode::IINC);
                    buf.push(slot as u8);
                    buf.push(*amount as u8);
                } else {
                    buf.push(opcode::WIDE);
                    buf.push(opcode::IINC);
                    put_u16(buf, slot);
                    put_i16(buf, *amount);
                }
            }

            InsnKind::SubroutineRet { local } => {
                let slot = self.slot_of(*local)?;
                if slot <= 255 {
                    buf.push(opcode::RET);
                    buf.push(slot as u8);
                } else {
                    buf.push(opcode::WIDE);
                    buf.push(opcode::RET);
                    put_u16(buf, slot);
                }
            }

            InsnKind::Switch(switch) => {
                switch.encode(location, |target| self.expect_location(target), buf)?;
            }

            InsnKind::Label => {}

            InsnKind::Branch { .. } => unreachable!("branches are dispatched above"),
        }

        Ok(())
    }

    fn encode_branch(
        &mut self,
        id: InsnId,
        location: u32,
        op: u8,
        target: InsnId,
        short_hop: bool,
        buf: &mut Vec<u8>,
    ) -> Result<(), Error> {
        if short_hop {
            // Sticky rewrite from an earlier pass: hop over the wide jump
            // spliced in right behind this instruction.
            buf.push(op);
            put_i16(buf, 8);
            return Ok(());
        }

        let offset = self.expect_location(target)? as i64 - location as i64;

        if opcode::is_wide_branch(op) {
            buf.push(op);
            put_i32(buf, offset as i32);
        } else if (i16::MIN as i64..=i16::MAX as i64).contains(&offset) {
            buf.push(op);
            put_i16(buf, offset as i16);
        } else if op == opcode::GOTO || op == opcode::JSR {
            // Upgrade to the 32-bit form for good.
            let wide = opcode::widened_form(op);
            self.arena[id.0].kind = InsnKind::Branch {
                op: wide,
                target,
                short_hop: false,
            };
            buf.push(wide);
            put_i32(buf, offset as i32);
        } else {
            // Conditional branches have no 32-bit form. Branch on the
            // negated condition over a freshly inserted wide jump:
            //
            //     if* far      =>      ifnot* +8
            //                          goto_w far
            //
            // The inserted jump changes the layout, which forces another
            // encoding pass.
            let negated = opcode::negate_condition(op);
            self.arena[id.0].kind = InsnKind::Branch {
                op: negated,
                target,
                short_hop: true,
            };
            buf.push(negated);
            put_i16(buf, 8);

            let wide_jump = self.new_insn(
                InsnKind::Branch {
                    op: opcode::GOTO_W,
                    target,
                    short_hop: false,
                },
                0,
            );
            self.link_after(id, wide_jump);
        }

        Ok(())
    }

    /// Does the instruction have everything it needs to emit final bytes?
    ///
    /// An unplaced label behind a branch or switch target is unfixable by
    /// more passes and reports as an error instead.
    pub(crate) fn insn_resolved(&self, id: InsnId) -> Result<bool, Error> {
        match &self.arena[id.0].kind {
            InsnKind::Label => Ok(self.arena[id.0].location.is_some()),
            InsnKind::Plain { .. } => Ok(true),
            InsnKind::Branch { target, .. } => self.expect_location(*target).map(|_| true),
            InsnKind::ConstantOp { constant, .. } | InsnKind::LoadConstant { constant, .. } => {
                Ok(constant.index().is_some())
            }
            InsnKind::LoadLocal { local }
            | InsnKind::Increment { local, .. }
            | InsnKind::SubroutineRet { local } => Ok(self.locals[local.0].number.is_some()),
            // A dead store encodes as a pop; a live one always has a slot.
            InsnKind::StoreLocal { .. } => Ok(true),
            InsnKind::Switch(switch) => {
                self.expect_location(switch.default)?;
                for target in &switch.targets {
                    self.expect_location(*target)?;
                }
                Ok(true)
            }
        }
    }

    /// One-line rendering of an instruction, for debug dumps.
    pub(crate) fn describe(&self, id: InsnId) -> String {
        fn leading(bytes: &[u8], fallback: &str) -> String {
            bytes
                .first()
                .and_then(|op| opcode::mnemonic(*op))
                .unwrap_or(fallback)
                .to_owned()
        }

        match &self.arena[id.0].kind {
            InsnKind::Plain { bytes } => leading(bytes, "data"),
            InsnKind::Branch { op, target, .. } => format!(
                "{} -> {:?}",
                opcode::mnemonic(*op).unwrap_or("branch"),
                target
            ),
            InsnKind::ConstantOp { bytes, constant } => {
                format!("{} {:?}", leading(bytes, "const_op"), constant)
            }
            InsnKind::LoadConstant { constant, .. } => format!("ldc {:?}", constant),
            InsnKind::LoadLocal { local } => format!("load {:?}", local),
            InsnKind::StoreLocal { local, discard } => {
                if *discard {
                    format!("store {:?} (discarded)", local)
                } else {
                    format!("store {:?}", local)
                }
            }
            InsnKind::Increment { local, amount } => format!("iinc {:?} by {}", local, amount),
            InsnKind::SubroutineRet { local } => format!("ret {:?}", local),
            InsnKind::Switch(switch) => format!(
                "{} ({} cases)",
                opcode::mnemonic(switch.opcode()).unwrap_or("switch"),
                switch.cases.len()
            ),
            InsnKind::Label => String::from("label"),
        }
    }
}
