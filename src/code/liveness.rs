//! Backward liveness dataflow over the instruction chain
//!
//! The chain is treated as a control-flow graph whose edges are fall-through
//! to the next instruction, every explicit branch target, and an edge from
//! each guarded instruction into its handlers' catch entries. For a variable
//! `v` and position `n` the classic equations apply:
//!
//! ```text,ignore,no_run
//! live_in[v][n]  = used(n, v) or (v != defined(n) and live_out[v][n])
//! live_out[v][n] = union over successors s of n of live_in[v][s]
//! ```
//!
//! Passes run backward over the chain until one changes no bit. Bits are only
//! ever set within a run, so the fixed point is guaranteed. Positions are the
//! chain indexes assigned before analysis, which keeps the bit vectors small.
//!
//! As a side product, any plain store whose position ends up without
//! `live_out` is marked to discard its value: nothing ever reads it, so the
//! store encodes as a pop of matching width.

use super::graph::InstructionGraph;
use super::insn::{InsnId, InsnKind};
use super::locals::LocalId;
use crate::errors::Error;
use crate::util::BitSet;

pub(crate) struct LiveSets {
    /// `live_in | live_out` per variable, in declaration order. `None` once a
    /// variable turns out to be never live - it gets no slot.
    pub(crate) live: Vec<Option<BitSet>>,
}

pub(crate) fn analyze(graph: &mut InstructionGraph, positions: usize) -> Result<LiveSets, Error> {
    let var_count = graph.locals.len();
    let mut live_in: Vec<BitSet> = (0..var_count).map(|_| BitSet::new(positions)).collect();
    let mut live_out: Vec<BitSet> = (0..var_count).map(|_| BitSet::new(positions)).collect();

    // Plain stores seen during the first pass, checked for dead results once
    // the fixed point is reached. The set of stores cannot change across
    // passes, so recording them once is enough.
    let mut stores: Vec<(LocalId, InsnId)> = Vec::new();

    let mut successors: Vec<usize> = Vec::new();
    let mut targets: Vec<InsnId> = Vec::new();

    let mut passes = 0;
    loop {
        let mut changed = false;
        let mut at = graph.last;
        while let Some(id) = at {
            let data = &graph.arena[id.0];
            let n = data.location.expect("positions are indexed before liveness") as usize;
            let (use_of, def_of) = data.kind.use_def();

            if passes == 0 {
                if let InsnKind::StoreLocal { local, .. } = &data.kind {
                    stores.push((*local, id));
                }
            }

            // Successor positions: fall-through, branch targets, handler
            // catch entries.
            successors.clear();
            if data.kind.flows_through() {
                if let Some(next) = data.next {
                    successors.push(graph.expect_location(next)? as usize);
                }
            }
            targets.clear();
            data.kind.for_each_target(|target| targets.push(target));
            for target in &targets {
                successors.push(graph.expect_location(*target)? as usize);
            }
            for handler in &data.handlers {
                let catch_at = graph.handlers[handler.0].catch_at;
                successors.push(graph.expect_location(catch_at)? as usize);
            }

            for v in (0..var_count).rev() {
                let local = LocalId(v);

                let set_live_in = use_of == Some(local)
                    || (def_of != Some(local) && live_out[v].get(n));
                if set_live_in {
                    changed |= live_in[v].set(n);
                }

                let mut set_live_out = false;
                for &successor in &successors {
                    if live_in[v].get(successor) {
                        set_live_out = true;
                        changed |= live_out[v].set(n);
                    }
                }

                if !set_live_in && set_live_out && def_of != Some(local) {
                    // Catch live-in up with the live-out bit that was just
                    // set; this removes most of the extra full passes the
                    // fixed point would otherwise need.
                    changed |= live_in[v].set(n);
                }
            }

            at = data.prev;
        }
        passes += 1;
        if !changed {
            break;
        }
    }
    log::trace!("liveness of {} locals converged after {} passes", var_count, passes);

    // Mark stores whose value is never read again.
    for (local, id) in stores {
        let n = graph.arena[id.0].location.expect("indexed") as usize;
        if !live_out[local.0].get(n) {
            if let InsnKind::StoreLocal { discard, .. } = &mut graph.arena[id.0].kind {
                *discard = true;
            }
        }
    }

    let live = live_in
        .into_iter()
        .zip(live_out)
        .map(|(mut live_in_v, live_out_v)| {
            live_in_v.union_with(&live_out_v);
            if live_in_v.is_all_clear() {
                None
            } else {
                Some(live_in_v)
            }
        })
        .collect();

    Ok(LiveSets { live })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::opcode;
    use crate::types::ValueType;

    fn discarded(graph: &InstructionGraph, id: InsnId) -> bool {
        matches!(
            graph.arena[id.0].kind,
            InsnKind::StoreLocal { discard: true, .. }
        )
    }

    #[test]
    fn store_without_reader_is_discarded() {
        let mut graph = InstructionGraph::new();
        let v = graph.declare_local(None, ValueType::Int);
        graph.plain(1, vec![opcode::ICONST_0]);
        let store = graph.store_local(v);
        graph.plain(0, vec![opcode::RETURN]);

        graph.resolve().unwrap();
        assert!(discarded(&graph, store));
        assert_eq!(graph.local_slot(v), None);
    }

    #[test]
    fn store_with_reader_is_kept() {
        let mut graph = InstructionGraph::new();
        let v = graph.declare_local(None, ValueType::Int);
        graph.plain(1, vec![opcode::ICONST_0]);
        let store = graph.store_local(v);
        graph.load_local(v);
        graph.plain(-1, vec![opcode::POP]);
        graph.plain(0, vec![opcode::RETURN]);

        graph.resolve().unwrap();
        assert!(!discarded(&graph, store));
        assert_eq!(graph.local_slot(v), Some(0));
    }

    #[test]
    fn liveness_crosses_backward_branches() {
        // top: load v, pop, goto top - the load keeps v live around the loop,
        // so the store before the loop must survive.
        let mut graph = InstructionGraph::new();
        let v = graph.declare_local(None, ValueType::Int);
        graph.plain(1, vec![opcode::ICONST_0]);
        let store = graph.store_local(v);
        let top = graph.label();
        graph.place_label(top);
        graph.load_local(v);
        graph.plain(-1, vec![opcode::POP]);
        graph.branch(opcode::GOTO, top).unwrap();

        graph.resolve().unwrap();
        assert!(!discarded(&graph, store));
    }

    #[test]
    fn handler_edge_keeps_a_variable_alive() {
        // The guarded body stores v and never reads it on the normal path;
        // only the catch block does. The handler edge must keep the store.
        let mut graph = InstructionGraph::new();
        let v = graph.declare_local(None, ValueType::Int);

        let start = graph.label();
        graph.place_label(start);
        graph.plain(1, vec![opcode::ICONST_1]);
        let store = graph.store_local(v);
        graph.plain(0, vec![opcode::RETURN]);
        let end = graph.label();
        graph.place_label(end);

        let catch = graph.label();
        graph.place_label(catch);
        graph.plain(-1, vec![opcode::POP]); // drop the thrown value
        graph.load_local(v);
        graph.plain(-1, vec![opcode::IRETURN]);

        graph.add_exception_handler(start, end, catch, None);

        graph.resolve().unwrap();
        assert!(!discarded(&graph, store));
        assert_eq!(graph.local_slot(v), Some(0));
    }
}
