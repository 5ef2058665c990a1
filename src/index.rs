//! Index construction, the DIE-tree walker and lookup.

use std::fmt;
use std::path::Path;

use gimli::DwTag;

use crate::abbrev::{
    ATTRIB_BLOCK1, ATTRIB_BLOCK2, ATTRIB_BLOCK4, ATTRIB_EXPRLOC, ATTRIB_LEB128,
    ATTRIB_NAME_STRING, ATTRIB_NAME_STRP, ATTRIB_SIBLING_REF1, ATTRIB_SIBLING_REF2,
    ATTRIB_SIBLING_REF4, ATTRIB_SIBLING_REF8, ATTRIB_SIBLING_REF_UDATA, ATTRIB_STRING,
};
use crate::cursor::Cursor;
use crate::elf::{DebugSection, ObjectFile};
use crate::error::{Error, ErrorKind};
use crate::unit;

const DIE_HASH_SHIFT: u32 = 17;
const DIE_HASH_SIZE: usize = 1 << DIE_HASH_SHIFT;
const DIE_HASH_MASK: u32 = (DIE_HASH_SIZE - 1) as u32;

/// One occupied slot of the DIE hash table.
///
/// The name is stored as a section/offset/length record into the owning
/// file's mapped data rather than as a pointer, so entries stay valid for
/// exactly as long as the index itself.
#[derive(Clone, Copy, Debug)]
struct DieHashEntry {
    file: u32,
    cu: u32,
    name_section: DebugSection,
    name_offset: usize,
    name_len: usize,
    tag: u64,
    /// Offset of the DIE within `.debug_info`.
    die_offset: usize,
}

/// DJB2 over the name bytes, excluding the terminator.
fn name_hash(name: &[u8]) -> u32 {
    let mut hash = 5381u32;
    for &byte in name {
        hash = hash.wrapping_mul(33).wrapping_add(u32::from(byte));
    }
    hash
}

fn entry_name<'files>(files: &'files [ObjectFile], entry: &DieHashEntry) -> &'files [u8] {
    let section = files[entry.file as usize].section_data(entry.name_section);
    &section[entry.name_offset..entry.name_offset + entry.name_len]
}

/// A fixed-size, open-addressed table with linear probing, shared by all
/// files of the index. Write-once during construction, read-only after.
struct DieHash {
    entries: Box<[Option<DieHashEntry>]>,
}

impl DieHash {
    fn new() -> Self {
        DieHash {
            entries: vec![None; DIE_HASH_SIZE].into_boxed_slice(),
        }
    }

    fn insert(&mut self, files: &[ObjectFile], entry: DieHashEntry) -> Result<(), Error> {
        let name = entry_name(files, &entry);
        let start = name_hash(name) & DIE_HASH_MASK;
        let mut index = start;
        loop {
            match self.entries[index as usize] {
                None => {
                    self.entries[index as usize] = Some(entry);
                    return Ok(());
                }
                Some(existing) => {
                    // Duplicate definitions coalesce to the first one seen.
                    if existing.tag == entry.tag && entry_name(files, &existing) == name {
                        return Ok(());
                    }
                }
            }
            index = (index + 1) & DIE_HASH_MASK;
            if index == start {
                return Err(ErrorKind::CapacityExceeded.into());
            }
        }
    }

    fn lookup(&self, files: &[ObjectFile], name: &[u8], tag: u64) -> Option<DieHashEntry> {
        let start = name_hash(name) & DIE_HASH_MASK;
        let mut index = start;
        loop {
            let entry = self.entries[index as usize]?;
            if entry.tag == tag && entry_name(files, &entry) == name {
                return Some(entry);
            }
            index = (index + 1) & DIE_HASH_MASK;
            if index == start {
                return None;
            }
        }
    }
}

/// An index of named top-level type and variable DIEs across the DWARF
/// debugging information of a set of relocatable ELF objects.
///
/// Construction walks every DIE of every compilation unit once and records
/// the location of interesting definitions in a global hash table keyed by
/// name and tag. Afterwards the index is immutable; [`find`] may be called
/// concurrently from any number of threads.
///
/// [`find`]: DwarfIndex::find
pub struct DwarfIndex {
    files: Vec<ObjectFile>,
    table: DieHash,
    address_size: u8,
}

impl DwarfIndex {
    /// Opens, relocates and indexes every file in `paths`, in order.
    ///
    /// On error the partially built index is dropped, releasing all file
    /// mappings.
    pub fn new<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self, Error> {
        let mut index = DwarfIndex {
            files: Vec::new(),
            table: DieHash::new(),
            address_size: 0,
        };
        for path in paths {
            index.add_file(path.as_ref())?;
        }
        Ok(index)
    }

    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    fn add_file(&mut self, path: &Path) -> Result<(), Error> {
        let mut file = ObjectFile::open(path)?;
        file.cus = unit::read_units(&file)?;
        if let Some(unit) = file.cus.last() {
            self.address_size = unit.address_size;
        }

        let file_id = self.files.len() as u32;
        self.files.push(file);

        let files = &self.files;
        let table = &mut self.table;
        let file = &files[file_id as usize];
        for cu_id in 0..file.cus.len() {
            index_unit(files, table, file_id, cu_id as u32)?;
        }

        tracing::debug!(cus = file.cus.len(), "indexed object file");
        Ok(())
    }

    /// Looks up the definition of `name` with the given DIE tag.
    ///
    /// When several inputs define the same `(name, tag)` pair, the location
    /// of the first definition in input order is returned. Returns
    /// [`ErrorKind::NotFound`] when nothing matches.
    pub fn find(&self, name: &str, tag: DwTag) -> Result<DieLocation<'_>, Error> {
        let entry = self
            .table
            .lookup(&self.files, name.as_bytes(), u64::from(tag.0))
            .ok_or_else(|| Error::from(ErrorKind::NotFound(name.into())))?;
        let file = &self.files[entry.file as usize];
        let cu = &file.cus[entry.cu as usize];
        Ok(DieLocation {
            file,
            cu_offset: cu.offset as u64,
            die_offset: (entry.die_offset - cu.offset) as u64,
        })
    }

    /// The `address_size` of the most recently parsed compilation unit.
    pub fn address_size(&self) -> u8 {
        self.address_size
    }

    /// The indexed object files, in input order.
    pub fn files(&self) -> impl Iterator<Item = &ObjectFile> {
        self.files.iter()
    }
}

impl fmt::Debug for DwarfIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DwarfIndex")
            .field("files", &self.files)
            .field("address_size", &self.address_size)
            .finish()
    }
}

/// The location of an indexed DIE, sufficient for a collaborator to
/// materialize the full entry from the raw section bytes of
/// [`file`](DieLocation::file).
#[derive(Clone, Copy, Debug)]
pub struct DieLocation<'index> {
    file: &'index ObjectFile,
    cu_offset: u64,
    die_offset: u64,
}

impl<'index> DieLocation<'index> {
    /// The object file containing the DIE.
    pub fn file(&self) -> &'index ObjectFile {
        self.file
    }

    /// Offset of the compilation-unit header within `.debug_info`.
    pub fn cu_offset(&self) -> u64 {
        self.cu_offset
    }

    /// Offset of the DIE from the start of its compilation unit.
    pub fn die_offset(&self) -> u64 {
        self.die_offset
    }
}

/// Walks one compilation unit's DIE tree, executing the compiled skip
/// program of each DIE and inserting named top-level definitions into the
/// table.
fn index_unit(
    files: &[ObjectFile],
    table: &mut DieHash,
    file_id: u32,
    cu_id: u32,
) -> Result<(), Error> {
    let file = &files[file_id as usize];
    let cu = &file.cus[cu_id as usize];
    let info = file.section_data(DebugSection::Info);
    let str_len = file.section_data(DebugSection::Str).len();

    // Unit bounds were validated at header-parse time, so the first DIE
    // position is never past the unit end.
    let end = cu.end_offset();
    let first = cu.offset + cu.header_len();
    if first == end {
        // Header-only unit, no DIEs.
        return Ok(());
    }

    let mut cursor = Cursor::at(&info[..end], first);
    // The unit DIE sits at depth 0; only its direct children are indexed.
    let mut depth = 0usize;

    loop {
        let die_offset = cursor.pos();
        let code = cursor.read_uleb128()?;
        if code == 0 {
            // Null entry: the current sibling chain ends.
            if depth <= 1 {
                break;
            }
            depth -= 1;
            continue;
        }

        let decl = usize::try_from(code)
            .ok()
            .and_then(|code| cu.abbrev_decls.get(code - 1))
            .ok_or_else(|| {
                Error::from(ErrorKind::DwarfFormat(format!(
                    "unknown abbreviation code {code}"
                )))
            })?;

        let mut name: Option<(DebugSection, usize)> = None;
        let mut sibling: Option<usize> = None;

        let mut pc = 0;
        loop {
            let cmd = decl.cmds[pc];
            pc += 1;
            if cmd == 0 {
                break;
            }
            match cmd {
                ATTRIB_BLOCK1 => {
                    let length = usize::from(cursor.read_u8()?);
                    cursor.skip(length)?;
                }
                ATTRIB_BLOCK2 => {
                    let length = usize::from(cursor.read_u16()?);
                    cursor.skip(length)?;
                }
                ATTRIB_BLOCK4 => {
                    let length = cursor.read_u32()? as usize;
                    cursor.skip(length)?;
                }
                ATTRIB_EXPRLOC => {
                    let length = usize::try_from(cursor.read_uleb128()?)
                        .map_err(|_| ErrorKind::UnexpectedEof)?;
                    cursor.skip(length)?;
                }
                ATTRIB_LEB128 => cursor.skip_leb128()?,
                ATTRIB_NAME_STRING => {
                    name = Some((DebugSection::Info, cursor.pos()));
                    cursor.skip_cstr()?;
                }
                ATTRIB_STRING => cursor.skip_cstr()?,
                ATTRIB_SIBLING_REF1 | ATTRIB_SIBLING_REF2 | ATTRIB_SIBLING_REF4
                | ATTRIB_SIBLING_REF8 | ATTRIB_SIBLING_REF_UDATA => {
                    let offset = match cmd {
                        ATTRIB_SIBLING_REF1 => u64::from(cursor.read_u8()?),
                        ATTRIB_SIBLING_REF2 => u64::from(cursor.read_u16()?),
                        ATTRIB_SIBLING_REF4 => u64::from(cursor.read_u32()?),
                        ATTRIB_SIBLING_REF8 => cursor.read_u64()?,
                        _ => cursor.read_uleb128()?,
                    };
                    // Sibling offsets are relative to the unit header.
                    let target = usize::try_from(offset)
                        .ok()
                        .and_then(|offset| cu.offset.checked_add(offset))
                        .filter(|&target| target <= end)
                        .ok_or(ErrorKind::UnexpectedEof)?;
                    sibling = Some(target);
                }
                ATTRIB_NAME_STRP => {
                    let offset = if cu.is_64bit {
                        cursor.read_u64()?
                    } else {
                        u64::from(cursor.read_u32()?)
                    };
                    let offset = usize::try_from(offset)
                        .ok()
                        .filter(|&offset| offset < str_len)
                        .ok_or(ErrorKind::UnexpectedEof)?;
                    name = Some((DebugSection::Str, offset));
                }
                skip => cursor.skip(usize::from(skip))?,
            }
        }

        let tag = decl.cmds[pc];
        let children = decl.cmds[pc + 1];

        if depth == 1 && tag != 0 {
            if let Some((name_section, name_offset)) = name {
                let name_len = name_len(file, name_section, name_offset)?;
                table.insert(
                    files,
                    DieHashEntry {
                        file: file_id,
                        cu: cu_id,
                        name_section,
                        name_offset,
                        name_len,
                        tag: u64::from(tag),
                        die_offset,
                    },
                )?;
            }
        }

        if children != 0 {
            // A sibling pointer lets the walker skip the entire subtree.
            match sibling {
                Some(target) => cursor.set_pos(target),
                None => depth += 1,
            }
        } else if depth == 0 {
            break;
        }
    }

    Ok(())
}

/// Length of the NUL-terminated name at `offset` in `section`.
fn name_len(file: &ObjectFile, section: DebugSection, offset: usize) -> Result<usize, Error> {
    file.section_data(section)[offset..]
        .iter()
        .position(|&byte| byte == 0)
        .ok_or_else(|| Error::from(ErrorKind::UnexpectedEof))
}
