//! Compilation of abbreviation declarations into skip programs.
//!
//! The DIE walker never decodes attribute values; it only needs to know how
//! far to advance for each one, plus where the name and sibling attributes
//! live. Each abbreviation declaration is therefore compiled once into a
//! compact byte program: values below [`ATTRIB_MIN_CMD`] are literal byte
//! counts to skip, values at or above it are commands for variable-length
//! forms and for the attributes that get extracted. Consecutive fixed skips
//! are merged, so the interpreter takes one branch per *interesting*
//! attribute rather than one per attribute.

use gimli::constants;

use crate::cursor::Cursor;
use crate::error::{Error, ErrorKind};

pub(crate) const ATTRIB_BLOCK1: u8 = 243;
pub(crate) const ATTRIB_BLOCK2: u8 = 244;
pub(crate) const ATTRIB_BLOCK4: u8 = 245;
pub(crate) const ATTRIB_EXPRLOC: u8 = 246;
pub(crate) const ATTRIB_LEB128: u8 = 247;
pub(crate) const ATTRIB_STRING: u8 = 248;
pub(crate) const ATTRIB_SIBLING_REF1: u8 = 249;
pub(crate) const ATTRIB_SIBLING_REF2: u8 = 250;
pub(crate) const ATTRIB_SIBLING_REF4: u8 = 251;
pub(crate) const ATTRIB_SIBLING_REF8: u8 = 252;
pub(crate) const ATTRIB_SIBLING_REF_UDATA: u8 = 253;
pub(crate) const ATTRIB_NAME_STRP: u8 = 254;
pub(crate) const ATTRIB_NAME_STRING: u8 = 255;
pub(crate) const ATTRIB_MIN_CMD: u8 = ATTRIB_BLOCK1;

const AT_SIBLING: u64 = constants::DW_AT_sibling.0 as u64;
const AT_NAME: u64 = constants::DW_AT_name.0 as u64;
const AT_DECLARATION: u64 = constants::DW_AT_declaration.0 as u64;

/// A compiled abbreviation declaration.
///
/// `cmds` holds the skip program, terminated by a zero byte that is
/// followed by the filtered tag byte (zero for "do not index") and the
/// has-children byte.
#[derive(Clone, Debug)]
pub(crate) struct AbbrevDecl {
    pub(crate) cmds: Vec<u8>,
}

/// Tags worth indexing keep their value; everything else compiles to zero.
fn retained_tag(tag: u64) -> u8 {
    let tag = match u16::try_from(tag) {
        Ok(tag) => constants::DwTag(tag),
        Err(_) => return 0,
    };
    match tag {
        constants::DW_TAG_base_type
        | constants::DW_TAG_class_type
        | constants::DW_TAG_enumeration_type
        | constants::DW_TAG_structure_type
        | constants::DW_TAG_typedef
        | constants::DW_TAG_union_type
        | constants::DW_TAG_variable => tag.0 as u8,
        _ => 0,
    }
}

/// Parses the abbreviation table at `offset` in `.debug_abbrev` and
/// compiles every declaration.
///
/// Abbreviation codes must be sequential starting at one; the declarations
/// are returned in code order so `code - 1` indexes the vector.
pub(crate) fn read_abbrev_table(
    abbrev: &[u8],
    offset: u64,
    address_size: u8,
    is_64bit: bool,
) -> Result<Vec<AbbrevDecl>, Error> {
    let start = usize::try_from(offset).map_err(|_| ErrorKind::UnexpectedEof)?;
    let mut cursor = Cursor::at(abbrev, start);

    let mut decls = Vec::new();
    loop {
        let code = cursor.read_uleb128()?;
        if code == 0 {
            return Ok(decls);
        }
        if code != decls.len() as u64 + 1 {
            return Err(
                ErrorKind::Unsupported("non-sequential abbreviation table".into()).into(),
            );
        }
        decls.push(read_abbrev_decl(&mut cursor, address_size, is_64bit)?);
    }
}

fn read_abbrev_decl(
    cursor: &mut Cursor<'_>,
    address_size: u8,
    is_64bit: bool,
) -> Result<AbbrevDecl, Error> {
    let mut tag = retained_tag(cursor.read_uleb128()?);
    let children = cursor.read_u8()?;

    let mut cmds = Vec::with_capacity(8);
    loop {
        let name = cursor.read_uleb128()?;
        let form = cursor.read_uleb128()?;
        if name == 0 && form == 0 {
            break;
        }
        let form = match u16::try_from(form) {
            Ok(form) => constants::DwForm(form),
            Err(_) => {
                return Err(
                    ErrorKind::DwarfFormat(format!("unknown attribute form {form}")).into(),
                )
            }
        };

        // Attributes the walker extracts get dedicated commands instead of
        // plain skips.
        if name == AT_SIBLING {
            let cmd = match form {
                constants::DW_FORM_ref1 => Some(ATTRIB_SIBLING_REF1),
                constants::DW_FORM_ref2 => Some(ATTRIB_SIBLING_REF2),
                constants::DW_FORM_ref4 => Some(ATTRIB_SIBLING_REF4),
                constants::DW_FORM_ref8 => Some(ATTRIB_SIBLING_REF8),
                constants::DW_FORM_ref_udata => Some(ATTRIB_SIBLING_REF_UDATA),
                _ => None,
            };
            if let Some(cmd) = cmd {
                cmds.push(cmd);
                continue;
            }
        } else if name == AT_NAME && tag != 0 {
            let cmd = match form {
                constants::DW_FORM_strp => Some(ATTRIB_NAME_STRP),
                constants::DW_FORM_string => Some(ATTRIB_NAME_STRING),
                _ => None,
            };
            if let Some(cmd) = cmd {
                cmds.push(cmd);
                continue;
            }
        } else if name == AT_DECLARATION && tag != constants::DW_TAG_variable.0 as u8 {
            // A declaration attribute marks a type declaration rather than a
            // definition. In theory this could be DW_FORM_flag with a value
            // of zero, but GCC always emits DW_FORM_flag_present.
            tag = 0;
        }

        let skip = match form {
            constants::DW_FORM_addr => address_size,
            constants::DW_FORM_data1 | constants::DW_FORM_ref1 | constants::DW_FORM_flag => 1,
            constants::DW_FORM_data2 | constants::DW_FORM_ref2 => 2,
            constants::DW_FORM_data4 | constants::DW_FORM_ref4 => 4,
            constants::DW_FORM_data8 | constants::DW_FORM_ref8 | constants::DW_FORM_ref_sig8 => 8,
            constants::DW_FORM_ref_addr
            | constants::DW_FORM_sec_offset
            | constants::DW_FORM_strp => {
                if is_64bit {
                    8
                } else {
                    4
                }
            }
            constants::DW_FORM_block1 => {
                cmds.push(ATTRIB_BLOCK1);
                continue;
            }
            constants::DW_FORM_block2 => {
                cmds.push(ATTRIB_BLOCK2);
                continue;
            }
            constants::DW_FORM_block4 => {
                cmds.push(ATTRIB_BLOCK4);
                continue;
            }
            constants::DW_FORM_exprloc => {
                cmds.push(ATTRIB_EXPRLOC);
                continue;
            }
            constants::DW_FORM_sdata
            | constants::DW_FORM_udata
            | constants::DW_FORM_ref_udata => {
                cmds.push(ATTRIB_LEB128);
                continue;
            }
            constants::DW_FORM_string => {
                cmds.push(ATTRIB_STRING);
                continue;
            }
            constants::DW_FORM_flag_present => continue,
            constants::DW_FORM_indirect => {
                return Err(ErrorKind::Unsupported("DW_FORM_indirect".into()).into())
            }
            unknown => {
                return Err(ErrorKind::DwarfFormat(format!(
                    "unknown attribute form {}",
                    unknown.0
                ))
                .into())
            }
        };

        push_skip(&mut cmds, skip);
    }

    cmds.push(0);
    cmds.push(tag);
    cmds.push(children);
    Ok(AbbrevDecl { cmds })
}

/// Appends a fixed-length skip, merging it into a preceding fixed-length
/// skip as long as the sum stays below the command range.
fn push_skip(cmds: &mut Vec<u8>, skip: u8) {
    match cmds.last_mut() {
        Some(prev) if *prev < ATTRIB_MIN_CMD => {
            let sum = u16::from(*prev) + u16::from(skip);
            if sum < u16::from(ATTRIB_MIN_CMD) {
                *prev = sum as u8;
            } else {
                *prev = ATTRIB_MIN_CMD - 1;
                cmds.push((sum - u16::from(ATTRIB_MIN_CMD - 1)) as u8);
            }
        }
        _ => cmds.push(skip),
    }
}
