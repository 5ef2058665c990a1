//! Compilation-unit headers in `.debug_info`.

use crate::abbrev::{self, AbbrevDecl};
use crate::cursor::Cursor;
use crate::elf::{DebugSection, ObjectFile};
use crate::error::{Error, ErrorKind};

/// A parsed compilation-unit header together with its compiled
/// abbreviation table.
///
/// The header occupies 11 bytes (32-bit DWARF format) or 23 bytes (64-bit
/// format); the unit's DIE tree begins immediately after it.
#[derive(Clone, Debug)]
pub(crate) struct CompilationUnit {
    /// Offset of the unit header within `.debug_info`.
    pub(crate) offset: usize,
    pub(crate) unit_length: u64,
    #[allow(dead_code)]
    pub(crate) version: u16,
    pub(crate) debug_abbrev_offset: u64,
    pub(crate) address_size: u8,
    pub(crate) is_64bit: bool,
    pub(crate) abbrev_decls: Vec<AbbrevDecl>,
}

impl CompilationUnit {
    /// Size of the header; the first DIE directly follows it.
    pub(crate) fn header_len(&self) -> usize {
        if self.is_64bit {
            23
        } else {
            11
        }
    }

    /// Offset just past the unit within `.debug_info`. The length prefix
    /// itself is not counted in `unit_length`.
    pub(crate) fn end_offset(&self) -> usize {
        let prefix = if self.is_64bit { 12 } else { 4 };
        self.offset + prefix + self.unit_length as usize
    }
}

/// Parses every unit header in `.debug_info` and compiles the abbreviation
/// table each one selects.
pub(crate) fn read_units(file: &ObjectFile) -> Result<Vec<CompilationUnit>, Error> {
    let info = file.section_data(DebugSection::Info);
    let abbrev = file.section_data(DebugSection::Abbrev);

    let mut units = Vec::new();
    let mut cursor = Cursor::new(info);
    while !cursor.is_empty() {
        let offset = cursor.pos();
        let initial = cursor.read_u32()?;
        let is_64bit = initial == 0xffff_ffff;
        let unit_length = if is_64bit {
            cursor.read_u64()?
        } else {
            u64::from(initial)
        };

        let version = cursor.read_u16()?;
        if !(2..=4).contains(&version) {
            return Err(
                ErrorKind::DwarfFormat(format!("unknown DWARF version {version}")).into(),
            );
        }

        let debug_abbrev_offset = if is_64bit {
            cursor.read_u64()?
        } else {
            u64::from(cursor.read_u32()?)
        };
        let address_size = cursor.read_u8()?;

        // The whole unit must lie within the section and be at least large
        // enough to hold the header just read.
        let prefix = if is_64bit { 12usize } else { 4 };
        let end = usize::try_from(unit_length)
            .ok()
            .and_then(|length| length.checked_add(prefix))
            .and_then(|length| offset.checked_add(length))
            .filter(|&end| cursor.pos() <= end && end <= info.len())
            .ok_or(ErrorKind::UnexpectedEof)?;

        let abbrev_decls =
            abbrev::read_abbrev_table(abbrev, debug_abbrev_offset, address_size, is_64bit)?;

        units.push(CompilationUnit {
            offset,
            unit_length,
            version,
            debug_abbrev_offset,
            address_size,
            is_64bit,
            abbrev_decls,
        });
        cursor.set_pos(end);
    }
    Ok(units)
}
