//! Forward stack-depth analysis
//!
//! Walks the control-flow graph from the entry instruction at depth 0 and
//! from every exception handler's catch entry at depth 1 (the thrown value is
//! the only stack entry there). Each instruction records the depth it is
//! entered with; reaching it again with a different depth means the control
//! flow is ambiguous and the method body is malformed.
//!
//! Subroutines (`jsr`/`ret`) are not walked per call site: the net depth
//! change of a subroutine body is computed on first encounter and cached per
//! entry label. This assumes subroutines are well-formed and non-recursive -
//! the behaviour for anything else is undefined.
//!
//! The walk follows the fall-through chain iteratively and queues other
//! branch targets on an explicit work list, so the stack used is bounded by
//! subroutine nesting depth rather than method length.

use super::graph::InstructionGraph;
use super::insn::InsnId;
use crate::errors::Error;
use std::collections::HashMap;

/// Compute the maximum operand stack depth, recording each instruction's
/// entry depth along the way.
pub(crate) fn analyze(graph: &mut InstructionGraph) -> Result<u32, Error> {
    let mut max: i32 = 0;
    let mut subroutine_adjust: HashMap<InsnId, i32> = HashMap::new();
    let mut pending: Vec<(InsnId, i32)> = Vec::new();

    if let Some(first) = graph.first {
        walk_chain(
            graph,
            first,
            0,
            &mut max,
            &mut subroutine_adjust,
            &mut pending,
        )?;
    }
    for index in 0..graph.handlers.len() {
        // The handler entry starts with just the thrown value on the stack.
        let catch_at = graph.handlers[index].catch_at;
        pending.push((catch_at, 1));
    }
    while let Some((id, depth)) = pending.pop() {
        walk_chain(
            graph,
            id,
            depth,
            &mut max,
            &mut subroutine_adjust,
            &mut pending,
        )?;
    }

    Ok(max as u32)
}

/// Follow one fall-through chain, queueing branched-to chains on `pending`.
/// Returns the depth at the point the chain ended (an already-visited
/// instruction or one that does not flow on), which is what subroutine
/// callers cache as the subroutine's net effect.
fn walk_chain(
    graph: &mut InstructionGraph,
    start: InsnId,
    mut depth: i32,
    max: &mut i32,
    subroutine_adjust: &mut HashMap<InsnId, i32>,
    pending: &mut Vec<(InsnId, i32)>,
) -> Result<i32, Error> {
    let mut targets: Vec<InsnId> = Vec::new();

    let mut at = Some(start);
    while let Some(id) = at {
        match graph.arena[id.0].reached_depth {
            None => graph.arena[id.0].reached_depth = Some(depth as u32),
            Some(recorded) => {
                if recorded as i32 != depth {
                    return Err(Error::StackDepthMismatch {
                        at: id,
                        recorded,
                        incoming: depth as u32,
                    });
                }
                break;
            }
        }

        let mut next = None;
        if graph.arena[id.0].kind.flows_through() {
            next = graph.arena[id.0].next;
            if next.is_none() {
                return Err(Error::FlowsOffEnd);
            }
        }

        depth += graph.arena[id.0].stack_adjust as i32;
        if depth > *max {
            *max = depth;
        } else if depth < 0 {
            return Err(Error::StackUnderflow { at: id, depth });
        }

        let is_subroutine_call = graph.arena[id.0].kind.is_subroutine_call();
        targets.clear();
        graph.arena[id.0]
            .kind
            .for_each_target(|target| targets.push(target));

        for (index, target) in targets.iter().enumerate() {
            let target = *target;

            // An instruction that does not fall through continues the walk
            // at its first target instead.
            if index == 0 && next.is_none() {
                next = Some(target);
                continue;
            }

            if is_subroutine_call {
                let adjust = if let Some(&adjust) = subroutine_adjust.get(&target) {
                    adjust
                } else {
                    let end_depth =
                        walk_chain(graph, target, depth, max, subroutine_adjust, pending)?;
                    let adjust = end_depth - depth;
                    subroutine_adjust.insert(target, adjust);
                    adjust
                };
                depth += adjust;
            } else {
                pending.push((target, depth));
            }
        }

        at = next;
    }

    Ok(depth)
}
