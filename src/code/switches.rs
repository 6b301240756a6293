//! Switch instruction layout
//!
//! The JVM has two switch encodings: `tableswitch` (a dense jump table over
//! the whole `[low, high]` range) and `lookupswitch` (sorted (case, offset)
//! pairs). Which one is smaller depends on how densely the case values fill
//! their range, so the choice is made by comparing encoded sizes:
//!
//! ```text,ignore,no_run
//! table:  12 + 4 * (high - low + 1)
//! lookup:  8 + 8 * count
//! ```
//!
//! Ties go to the table form (it dispatches in constant time). Both forms pad
//! the opcode with 0-3 zero bytes so their first operand lands on a 4-byte
//! boundary relative to the start of the method.

use super::insn::{put_i32, InsnId};
use crate::errors::Error;
use crate::opcode;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum SwitchShape {
    Table,
    Lookup,
}

#[derive(Clone, Debug)]
pub(crate) struct SwitchData {
    /// Case values, sorted ascending, duplicate-free.
    pub(crate) cases: Vec<i32>,

    /// Branch target per case, kept in step with `cases`.
    pub(crate) targets: Vec<InsnId>,

    pub(crate) default: InsnId,
    pub(crate) shape: SwitchShape,
}

impl SwitchData {
    /// Sort the cases, reject duplicates and pick the cheaper layout.
    pub(crate) fn new(
        cases: &[i32],
        targets: &[InsnId],
        default: InsnId,
    ) -> Result<SwitchData, Error> {
        if cases.len() != targets.len() {
            return Err(Error::SwitchSizeMismatch {
                cases: cases.len(),
                targets: targets.len(),
            });
        }

        let mut pairs: Vec<(i32, InsnId)> = cases
            .iter()
            .copied()
            .zip(targets.iter().copied())
            .collect();
        pairs.sort_by_key(|&(case, _)| case);

        for window in pairs.windows(2) {
            if window[0].0 == window[1].0 {
                return Err(Error::DuplicateSwitchCase(window[0].0));
            }
        }

        let cases: Vec<i32> = pairs.iter().map(|&(case, _)| case).collect();
        let targets: Vec<InsnId> = pairs.iter().map(|&(_, target)| target).collect();
        let shape = choose_shape(&cases);

        Ok(SwitchData {
            cases,
            targets,
            default,
            shape,
        })
    }

    pub(crate) fn opcode(&self) -> u8 {
        match self.shape {
            SwitchShape::Table => opcode::TABLESWITCH,
            SwitchShape::Lookup => opcode::LOOKUPSWITCH,
        }
    }

    /// Encode the full instruction (opcode, alignment padding, offsets) at
    /// the given address. `resolve` maps a target to its address.
    pub(crate) fn encode<F>(&self, location: u32, resolve: F, buf: &mut Vec<u8>) -> Result<(), Error>
    where
        F: Fn(InsnId) -> Result<u32, Error>,
    {
        buf.push(self.opcode());
        for _ in 0..padding(location) {
            buf.push(0);
        }

        let base = location as i64;
        let default_offset = (resolve(self.default)? as i64 - base) as i32;
        put_i32(buf, default_offset);

        match self.shape {
            SwitchShape::Table => {
                let low = self.cases[0];
                let high = self.cases[self.cases.len() - 1];
                put_i32(buf, low);
                put_i32(buf, high);

                let mut index = 0;
                for value in low as i64..=high as i64 {
                    if index < self.cases.len() && value == self.cases[index] as i64 {
                        let offset = (resolve(self.targets[index])? as i64 - base) as i32;
                        put_i32(buf, offset);
                        index += 1;
                    } else {
                        // Gaps in the range dispatch to the default target.
                        put_i32(buf, default_offset);
                    }
                }
            }
            SwitchShape::Lookup => {
                put_i32(buf, self.cases.len() as i32);
                for (case, target) in self.cases.iter().zip(&self.targets) {
                    put_i32(buf, *case);
                    let offset = (resolve(*target)? as i64 - base) as i32;
                    put_i32(buf, offset);
                }
            }
        }

        Ok(())
    }
}

/// Zero bytes between the opcode and the first operand, so the operand starts
/// at a multiple of four from the method start.
pub(crate) fn padding(location: u32) -> usize {
    3 - (location as usize & 3)
}

fn choose_shape(sorted_cases: &[i32]) -> SwitchShape {
    let (low, high) = match (sorted_cases.first(), sorted_cases.last()) {
        (Some(&low), Some(&high)) => (low, high),
        // No cases at all: a zero-pair lookupswitch is the only valid form.
        _ => return SwitchShape::Lookup,
    };

    let table_size = 12 + 4 * (high as i64 - low as i64 + 1);
    let lookup_size = 8 + 8 * sorted_cases.len() as i64;
    if table_size <= lookup_size {
        SwitchShape::Table
    } else {
        SwitchShape::Lookup
    }
}
