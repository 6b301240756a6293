//! Instruction graph and the resolver that turns it into bytecode
//!
//! ### Structure
//!
//! A method body is built as a doubly-linked chain of instructions owned by
//! an [`InstructionGraph`]. The chain lives in an arena and instructions are
//! addressed by stable [`InsnId`] handles, which is what makes O(1)
//! insert/remove/replace possible without ownership cycles. Local variables
//! ([`LocalId`]) and exception handlers ([`HandlerId`]) are declared against
//! the same graph.
//!
//! ### Resolution
//!
//! Nothing is resolved while the graph is being built: branches point at
//! labels with unknown addresses, locals have no slots, constants may have no
//! pool index yet. The first read of any derived output (bytecode, max-stack,
//! max-locals, exception table) runs the whole resolution pipeline:
//!
//!   1. position indexing and handler association,
//!   2. backward liveness analysis per local (also finds dead stores),
//!   3. slot allocation from live-range conflicts,
//!   4. forward stack-depth analysis,
//!   5. the address/byte fixed point (branch widening, switch encoding).
//!
//! Any structural mutation invalidates the cached results and the next read
//! resolves again from scratch. Repeated reads without an intervening
//! mutation return bit-identical results.

mod graph;
mod handlers;
mod insn;
mod liveness;
mod locals;
mod resolve;
mod slots;
mod stack;
mod switches;

pub use graph::*;
pub use handlers::*;
pub use insn::InsnId;
pub use locals::LocalId;
