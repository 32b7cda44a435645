//! # Kernel Symbol Resolution
//!
//! Converts raw kernel instruction pointers captured by `bpf_get_stackid()`
//! into function names using the kernel's exported symbol listing
//! (`/proc/kallsyms`).
//!
//! ## The kallsyms Format
//!
//! One symbol per line, sorted by address:
//!
//! ```text
//! ffffffff9d000000 T startup_64
//! ffffffff9d000040 T secondary_startup_64
//! ffffffffc0a01000 t ext4_fill_super	[ext4]
//! ^               ^ ^
//! 0               17 19 (name column)
//! ```
//!
//! Without `CAP_SYSLOG` (or with `kernel.kptr_restrict` set) every address
//! reads as zero. Such a table is treated as empty so frames show up as
//! `Unknown` instead of all collapsing onto the last symbol.
//!
//! ## Resolution Strategy
//!
//! A kernel address belongs to the nearest symbol at or below it. Because
//! both the symbol table and the cycle's kernel addresses are sorted, every
//! address is resolved in one forward merge over the table:
//!
//! ```text
//! table:   10 A      20 B      30 C
//! queries:    5   15      25       35
//! result:  Unknown A       B        C
//! ```
//!
//! This is O(T + Q) per cycle instead of a binary search per address, and the
//! table is only loaded when a cycle actually saw kernel frames.
//!
//! ## Module Structure
//!
//! - **`kallsyms`**: Symbol table parsing and the [`SymbolSource`] seam
//! - **`kernel`**: The linear merge ([`KernelSymbolizer`])
//!
//! User-space addresses are not symbolized here; they keep a hex placeholder
//! name in the exported profile.

pub mod kallsyms;
pub mod kernel;

pub use kallsyms::{
    load_symbol_table, InMemorySymbols, KallsymsFile, KernelSymbol, SymbolSource, SymbolTable,
    DEFAULT_KALLSYMS_PATH, UNRESOLVED_SYMBOL,
};
pub use kernel::KernelSymbolizer;
