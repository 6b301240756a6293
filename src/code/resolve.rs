//! Address assignment and byte emission
//!
//! Addresses and encodings depend on each other: a branch's size depends on
//! the distance to its target, and every size change moves the addresses of
//! everything behind it. So the resolver just keeps re-running layout passes
//! until one is clean - every instruction fully resolved and no label moved
//! since the previous pass.
//!
//! ### Termination
//!
//! The loop always reaches a fixed point because sizes only ever grow within
//! a resolution run: a branch that upgrades to its 32-bit form never shrinks
//! back, and the negated-condition rewrite for conditionals is sticky. Once
//! every rewritable branch has settled, label addresses stop moving and the
//! next pass is clean.

use super::graph::InstructionGraph;
use super::insn::InsnKind;
use crate::errors::Error;

impl InstructionGraph {
    /// Run layout passes until a fixed point and return the final bytes.
    pub(crate) fn resolve_addresses(&mut self) -> Result<Vec<u8>, Error> {
        let estimate = self.arena.len() * 2;
        let mut pass = 0u32;
        loop {
            pass += 1;
            let mut pass_again = false;
            let mut buf: Vec<u8> = Vec::with_capacity(estimate);

            let mut at = self.first;
            while let Some(id) = at {
                if !self.insn_resolved(id)? {
                    pass_again = true;
                }

                let offset = buf.len() as u32;
                if matches!(self.arena[id.0].kind, InsnKind::Label) {
                    if self.arena[id.0].location != Some(offset) {
                        // A moved label means something changed size in front
                        // of it; offsets encoded this pass may be stale.
                        if self.arena[id.0].location.is_some() {
                            pass_again = true;
                        }
                        self.arena[id.0].location = Some(offset);
                    }
                } else {
                    self.arena[id.0].location = Some(offset);
                    // Encoding may splice a wide jump in right after `id`;
                    // reading `next` afterwards makes sure it is visited (and
                    // encoded) within this same pass.
                    self.encode_insn(id, &mut buf)?;
                }

                at = self.arena[id.0].next;
            }

            log::trace!("address pass {}: {} bytes", pass, buf.len());
            if !pass_again {
                buf.shrink_to_fit();
                return Ok(buf);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::code::InstructionGraph;
    use crate::opcode;

    /// Pad a graph with `count` one-byte instructions.
    fn pad(graph: &mut InstructionGraph, count: usize) {
        for _ in 0..count {
            graph.plain(0, vec![opcode::NOP]);
        }
    }

    #[test]
    fn short_forward_branch_stays_short() {
        let mut graph = InstructionGraph::new();
        let exit = graph.label();
        graph.branch(opcode::GOTO, exit).unwrap();
        pad(&mut graph, 10);
        graph.place_label(exit);
        graph.plain(0, vec![opcode::RETURN]);

        let bytes = graph.bytecode().unwrap();
        assert_eq!(bytes[0], opcode::GOTO);
        // goto(3) + 10 nops puts the target at offset 13.
        assert_eq!(&bytes[1..3], &13i16.to_be_bytes());
        assert_eq!(bytes.len(), 14);
    }

    #[test]
    fn oversized_goto_upgrades_to_goto_w() {
        let mut graph = InstructionGraph::new();
        let exit = graph.label();
        graph.branch(opcode::GOTO, exit).unwrap();
        pad(&mut graph, 0x9000);
        graph.place_label(exit);
        graph.plain(0, vec![opcode::RETURN]);

        let bytes = graph.bytecode().unwrap();
        assert_eq!(bytes[0], opcode::GOTO_W);
        assert_eq!(&bytes[1..5], &0x9005i32.to_be_bytes());
        assert_eq!(bytes.len(), 5 + 0x9000 + 1);
    }

    #[test]
    fn label_addresses_settle_with_the_layout() {
        let mut graph = InstructionGraph::new();
        let exit = graph.label();
        graph.branch(opcode::GOTO, exit).unwrap();
        pad(&mut graph, 0x9000);
        graph.place_label(exit);
        let ret = graph.plain(0, vec![opcode::RETURN]);

        graph.resolve().unwrap();
        assert_eq!(graph.location(exit), Some(5 + 0x9000));
        assert_eq!(graph.location(ret), graph.location(exit));
    }
}
