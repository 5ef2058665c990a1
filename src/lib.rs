//! A fast, in-memory index over the DWARF debugging information embedded in
//! relocatable x86-64 ELF object files.
//!
//! Given a set of object-file paths, [`DwarfIndex`] builds a global mapping
//! from `(name, DIE tag)` pairs to the byte location of the corresponding
//! Debugging Information Entry, so named top-level type and variable
//! definitions can be looked up in O(1) on average without walking the
//! DWARF tree again.
//!
//! Construction memory-maps each file with a private, writable mapping,
//! applies `SHT_RELA` relocations to the debug sections in place (object
//! files are unlinked, so `.debug_info` contains unresolved
//! section-relative offsets), compiles every abbreviation declaration into
//! a compact skip program, and walks each compilation unit's DIE tree
//! executing those programs. Only the name and sibling attributes are ever
//! extracted; everything else is skipped at full speed.
//!
//! DWARF versions 2 through 4 are supported, in both 32-bit and 64-bit
//! DWARF format.
//!
//! # Example
//!
//! ```no_run
//! use dwarf_index::{constants, DebugSection, DwarfIndex};
//!
//! fn main() -> Result<(), dwarf_index::Error> {
//!     let index = DwarfIndex::new(["vmlinux.o", "module.o"])?;
//!
//!     let location = index.find("task_struct", constants::DW_TAG_structure_type)?;
//!     println!(
//!         "defined in {} at CU {:#x}, DIE {:#x}",
//!         location.file().path().display(),
//!         location.cu_offset(),
//!         location.die_offset(),
//!     );
//!
//!     // Collaborators decode the DIE from the raw section bytes.
//!     let info = location.file().section_data(DebugSection::Info);
//!     let die = &info[(location.cu_offset() + location.die_offset()) as usize..];
//!     # let _ = die;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod abbrev;
mod cursor;
mod elf;
mod error;
mod index;
mod unit;

pub use gimli::{constants, DwTag};

pub use crate::elf::{DebugSection, ObjectFile};
pub use crate::error::{Error, ErrorKind};
pub use crate::index::{DieLocation, DwarfIndex};
