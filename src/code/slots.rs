//! Slot assignment from live-range conflicts
//!
//! Two variables may share a slot exactly when their live ranges never
//! overlap. Fixed variables (parameters, subroutine return addresses) are
//! registered first on their pre-assigned slots; the rest are first-fit
//! allocated in declaration order, probing from slot 0 upward. Double-word
//! variables need two consecutive jointly-free slots.

use super::graph::InstructionGraph;
use crate::errors::Error;
use crate::util::BitSet;

/// Assign slot numbers to every live non-fixed local and return the size of
/// the locals area.
pub(crate) fn allocate(
    graph: &mut InstructionGraph,
    live: &[Option<BitSet>],
) -> Result<u32, Error> {
    // Slot number -> table indexes of the variables occupying it.
    let mut occupants: Vec<Vec<usize>> = Vec::new();
    let mut max_locals: u32 = 0;

    for v in 0..graph.locals.len() {
        if graph.locals[v].fixed {
            let number = graph.locals[v].number.expect("fixed variable has a slot") as usize;
            let double = graph.locals[v].ty.is_double_word();
            register(&mut occupants, number, v, double);

            // Fixed slots bound the locals area from below even when the
            // variable itself is never used.
            let top = number as u32 + if double { 1 } else { 0 };
            if top >= max_locals {
                max_locals = top + 1;
            }
        }
    }

    for v in 0..graph.locals.len() {
        let live_v = match &live[v] {
            Some(live_v) => live_v,
            // Never live: the variable needs no slot at all.
            None => continue,
        };
        if graph.locals[v].fixed {
            continue;
        }
        let double = graph.locals[v].ty.is_double_word();

        let mut slot = 0;
        loop {
            slot = find_available(&occupants, slot, live, live_v);
            if !double {
                break;
            }
            slot += 1;
            if find_available(&occupants, slot, live, live_v) == slot {
                // The pair is jointly free.
                slot -= 1;
                break;
            }
        }

        let number = u16::try_from(slot).map_err(|_| Error::MaxLocalsOverflow(slot as u32))?;
        graph.locals[v].number = Some(number);
        register(&mut occupants, slot, v, double);
    }

    Ok(max_locals.max(occupants.len() as u32))
}

/// First slot at or after `slot` whose occupants all have live ranges
/// disjoint from `live_v`. May be one past the currently occupied slots.
fn find_available(
    occupants: &[Vec<usize>],
    mut slot: usize,
    live: &[Option<BitSet>],
    live_v: &BitSet,
) -> usize {
    'scan: while slot < occupants.len() {
        for &other in &occupants[slot] {
            if let Some(live_other) = &live[other] {
                if live_v.intersects(live_other) {
                    slot += 1;
                    continue 'scan;
                }
            }
        }
        break;
    }
    slot
}

fn register(occupants: &mut Vec<Vec<usize>>, slot: usize, v: usize, double: bool) {
    bucket(occupants, slot).push(v);
    if double {
        bucket(occupants, slot + 1).push(v);
    }
}

fn bucket(occupants: &mut Vec<Vec<usize>>, slot: usize) -> &mut Vec<usize> {
    while occupants.len() <= slot {
        occupants.push(Vec::new());
    }
    &mut occupants[slot]
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::ValueType;

    fn live_at(len: usize, positions: &[usize]) -> Option<BitSet> {
        let mut bits = BitSet::new(len);
        for &position in positions {
            bits.set(position);
        }
        Some(bits)
    }

    #[test]
    fn disjoint_ranges_share_a_slot() {
        let mut graph = InstructionGraph::new();
        let a = graph.declare_local(None, ValueType::Int);
        let b = graph.declare_local(None, ValueType::Int);
        let live = vec![live_at(8, &[0, 1]), live_at(8, &[4, 5])];

        let max_locals = allocate(&mut graph, &live).unwrap();
        assert_eq!(graph.local_slot(a), Some(0));
        assert_eq!(graph.local_slot(b), Some(0));
        assert_eq!(max_locals, 1);
    }

    #[test]
    fn overlapping_ranges_get_distinct_slots() {
        let mut graph = InstructionGraph::new();
        let a = graph.declare_local(None, ValueType::Int);
        let b = graph.declare_local(None, ValueType::Int);
        let live = vec![live_at(8, &[0, 1, 2]), live_at(8, &[2, 3])];

        let max_locals = allocate(&mut graph, &live).unwrap();
        assert_eq!(graph.local_slot(a), Some(0));
        assert_eq!(graph.local_slot(b), Some(1));
        assert_eq!(max_locals, 2);
    }

    #[test]
    fn dead_variable_gets_no_slot() {
        let mut graph = InstructionGraph::new();
        let a = graph.declare_local(None, ValueType::Int);
        let live = vec![None];

        let max_locals = allocate(&mut graph, &live).unwrap();
        assert_eq!(graph.local_slot(a), None);
        assert_eq!(max_locals, 0);
    }

    #[test]
    fn double_word_needs_a_consecutive_pair() {
        let mut graph = InstructionGraph::new();
        // A fixed int parameter holds slot 0 and is live everywhere.
        let param = graph.declare_parameter(None, ValueType::Int);
        let long = graph.declare_local(None, ValueType::Long);
        let live = vec![live_at(4, &[0, 1, 2, 3]), live_at(4, &[1, 2])];

        let max_locals = allocate(&mut graph, &live).unwrap();
        assert_eq!(graph.local_slot(param), Some(0));
        assert_eq!(graph.local_slot(long), Some(1));
        assert_eq!(max_locals, 3);
    }

    #[test]
    fn double_word_pair_skips_split_availability() {
        let mut graph = InstructionGraph::new();
        // Slots 0 and 2 are pinned by conflicting parameters, leaving 1 and 3
        // free but never two in a row before slot 3.
        let p0 = graph.declare_parameter(None, ValueType::Int);
        let gap = graph.declare_local(None, ValueType::Int);
        let p2 = graph.declare_parameter(None, ValueType::Int);
        let long = graph.declare_local(None, ValueType::Long);

        // Parameter slots are 0 and 1 by declaration order, which is not the
        // layout this test needs; pin them by hand.
        let _ = (p0, p2);
        graph.locals[0].number = Some(0);
        graph.locals[2].number = Some(2);

        let everywhere = &[0usize, 1, 2, 3][..];
        let live = vec![
            live_at(4, everywhere),
            live_at(4, &[1, 2]),
            live_at(4, everywhere),
            live_at(4, everywhere),
        ];

        let max_locals = allocate(&mut graph, &live).unwrap();
        // The int local fits between the parameters...
        assert_eq!(graph.local_slot(gap), Some(1));
        // ...but the long needs two consecutive free slots, first at 3.
        assert_eq!(graph.local_slot(long), Some(3));
        assert_eq!(max_locals, 5);
    }

    #[test]
    fn fixed_double_word_raises_the_bound() {
        let mut graph = InstructionGraph::new();
        let d = graph.declare_parameter(None, ValueType::Double);
        let live = vec![None];

        let max_locals = allocate(&mut graph, &live).unwrap();
        assert_eq!(graph.local_slot(d), Some(0));
        assert_eq!(max_locals, 2);
    }
}
