//! Assemble JVM method bodies
//!
//! This crate is the back half of a bytecode assembler: a front end builds an
//! abstract instruction sequence, declares locals and exception handlers, and
//! this crate resolves it into a bit-exact method body - bytecode, max-stack,
//! max-locals and the exception table. Resolution does the interesting work:
//! liveness analysis and slot allocation for locals, stack-depth analysis,
//! and a fixed-point layout loop that widens branches and picks switch
//! encodings.
//!
//! ### Simple example
//!
//! The body of a static `int add(int a, int b)`:
//!
//! ```
//! use jvm_asm::code::InstructionGraph;
//! use jvm_asm::{opcode, ValueType};
//!
//! # fn assemble() -> Result<(), jvm_asm::Error> {
//! let mut code = InstructionGraph::new();
//! let a = code.declare_parameter(Some("a"), ValueType::Int);
//! let b = code.declare_parameter(Some("b"), ValueType::Int);
//!
//! code.load_local(a);
//! code.load_local(b);
//! code.plain(-1, vec![opcode::IADD]);
//! code.plain(-1, vec![opcode::IRETURN]);
//!
//! assert_eq!(code.bytecode()?, &[0x1a, 0x1b, 0x60, 0xac][..]);
//! assert_eq!(code.max_stack()?, 2);
//! assert_eq!(code.max_locals()?, 2);
//! # Ok(())
//! # }
//! # assemble().unwrap();
//! ```
//!
//! Constant-pool management and class-file serialization are deliberately
//! outside this crate: instructions reference pool entries through
//! [`ConstantRef`] cells an external provider fills in, and the resolved
//! outputs are handed to whatever writes the enclosing class file.

pub mod code;
mod constant;
mod errors;
pub mod opcode;
mod types;
pub mod util;

pub use constant::ConstantRef;
pub use errors::Error;
pub use types::ValueType;
