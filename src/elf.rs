//! Loading of relocatable ELF objects.
//!
//! An [`ObjectFile`] owns a private, writable memory map of one object
//! file. Opening it validates the ELF header, locates the symbol table and
//! the debug sections the index needs, and applies any `SHT_RELA`
//! relocations targeting those sections directly to the mapped bytes.
//! Everything downstream then reads plain, relocated section data.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use goblin::elf::header::{
    ELFCLASS32, ELFCLASS64, ELFDATA2LSB, ELFMAG, EI_CLASS, EI_DATA, EI_VERSION, EV_CURRENT,
    SELFMAG, SIZEOF_IDENT,
};
use goblin::elf::reloc::{R_X86_64_32, R_X86_64_64, R_X86_64_NONE};
use goblin::elf::section_header::{SHN_UNDEF, SHN_XINDEX, SHT_PROGBITS, SHT_RELA, SHT_SYMTAB};
use goblin::elf64::header::{Header, SIZEOF_EHDR};
use goblin::elf64::reloc::{Rela, SIZEOF_RELA};
use goblin::elf64::section_header::{SectionHeader, SIZEOF_SHDR};
use goblin::elf64::sym::{Sym, SIZEOF_SYM};
use memmap2::{MmapMut, MmapOptions};
use scroll::{Pread, Pwrite};

use crate::error::{Error, ErrorKind};
use crate::unit::CompilationUnit;

pub(crate) const NUM_DEBUG_SECTIONS: usize = 3;

const SECTION_NAMES: [&str; NUM_DEBUG_SECTIONS] = [".debug_abbrev", ".debug_info", ".debug_str"];

/// One of the DWARF sections the index reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugSection {
    /// `.debug_abbrev`, the abbreviation declarations.
    Abbrev = 0,
    /// `.debug_info`, the DIE trees of all compilation units.
    Info = 1,
    /// `.debug_str`, the string table referenced by `DW_FORM_strp`.
    Str = 2,
}

impl DebugSection {
    /// The ELF section name.
    pub fn name(self) -> &'static str {
        SECTION_NAMES[self as usize]
    }
}

/// A validated slice of the file, identified by its section header index.
///
/// The header index is kept so `SHT_RELA` sections can be matched to their
/// target via `sh_info`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Section {
    pub(crate) shdr_index: usize,
    pub(crate) offset: usize,
    pub(crate) size: usize,
}

struct Sections {
    symtab: Section,
    debug: [Section; NUM_DEBUG_SECTIONS],
    rela: [Option<Section>; NUM_DEBUG_SECTIONS],
}

/// A memory-mapped, relocated ELF object file owned by the index.
pub struct ObjectFile {
    path: PathBuf,
    data: MmapMut,
    symtab: Section,
    debug_sections: [Section; NUM_DEBUG_SECTIONS],
    rela_sections: [Option<Section>; NUM_DEBUG_SECTIONS],
    pub(crate) cus: Vec<CompilationUnit>,
}

impl ObjectFile {
    /// Opens and maps the file at `path`, locates its sections and applies
    /// relocations to the debug data.
    pub(crate) fn open(path: &Path) -> Result<Self, Error> {
        let file = File::open(path).map_err(|e| Error::new(ErrorKind::Io(path.into()), e))?;
        // Relocations are patched in place; the copy-on-write mapping keeps
        // the patched bytes local to this process.
        let data = unsafe { MmapOptions::new().map_copy(&file) }
            .map_err(|e| Error::new(ErrorKind::Io(path.into()), e))?;

        let sections = read_sections(&data)?;
        let mut object = ObjectFile {
            path: path.into(),
            data,
            symtab: sections.symtab,
            debug_sections: sections.debug,
            rela_sections: sections.rela,
            cus: Vec::new(),
        };
        object.apply_relocations()?;
        object.validate_debug_str()?;
        Ok(object)
    }

    /// The path this file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the raw, relocated bytes of a debug section.
    ///
    /// This is the view handed to collaborators that materialize
    /// compilation-unit or DIE objects from a [`DieLocation`].
    ///
    /// [`DieLocation`]: crate::DieLocation
    pub fn section_data(&self, section: DebugSection) -> &[u8] {
        self.section(self.debug_sections[section as usize])
    }

    fn section(&self, section: Section) -> &[u8] {
        &self.data[section.offset..section.offset + section.size]
    }

    fn apply_relocations(&mut self) -> Result<(), Error> {
        for kind in 0..NUM_DEBUG_SECTIONS {
            let Some(rela) = self.rela_sections[kind] else {
                continue;
            };
            let target = self.debug_sections[kind];
            let symtab = self.symtab;
            relocate_section(&mut self.data, target, rela, symtab)?;
        }
        Ok(())
    }

    /// Name lookups scan `.debug_str` forward for a NUL; the section must
    /// end with one.
    fn validate_debug_str(&self) -> Result<(), Error> {
        if self.section_data(DebugSection::Str).last() != Some(&0) {
            return Err(
                ErrorKind::DwarfFormat(".debug_str is not null terminated".into()).into(),
            );
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFile")
            .field("path", &self.path)
            .field(
                "debug_info_len",
                &self.debug_sections[DebugSection::Info as usize].size,
            )
            .field("cus", &self.cus.len())
            .finish()
    }
}

fn validate_ehdr(data: &[u8]) -> Result<Header, Error> {
    let ident = match data.get(..SIZEOF_IDENT) {
        Some(ident) if ident[..SELFMAG] == ELFMAG[..] => ident,
        _ => return Err(ErrorKind::ElfFormat("not an ELF file".into()).into()),
    };

    if ident[EI_VERSION] != EV_CURRENT {
        return Err(ErrorKind::ElfFormat(format!(
            "ELF version {} is not EV_CURRENT",
            ident[EI_VERSION]
        ))
        .into());
    }
    if ident[EI_DATA] != ELFDATA2LSB {
        return Err(ErrorKind::Unsupported("big-endian ELF".into()).into());
    }
    if ident[EI_CLASS] == ELFCLASS32 {
        return Err(ErrorKind::Unsupported("32-bit ELF".into()).into());
    }
    if ident[EI_CLASS] != ELFCLASS64 {
        return Err(
            ErrorKind::ElfFormat(format!("unknown ELF class {}", ident[EI_CLASS])).into(),
        );
    }

    if data.len() < SIZEOF_EHDR {
        return Err(ErrorKind::ElfFormat("ELF header is truncated".into()).into());
    }
    let ehdr: Header = data
        .pread_with(0, scroll::LE)
        .map_err(|e| Error::new(ErrorKind::ElfFormat("ELF header is truncated".into()), e))?;

    if ehdr.e_shnum == 0 {
        return Err(ErrorKind::ElfFormat("ELF file has no sections".into()).into());
    }
    let table_end = usize::try_from(ehdr.e_shoff)
        .ok()
        .and_then(|shoff| shoff.checked_add(usize::from(ehdr.e_shnum) * SIZEOF_SHDR));
    if table_end.map_or(true, |end| end > data.len()) {
        return Err(
            ErrorKind::ElfFormat("ELF section header table is beyond EOF".into()).into(),
        );
    }

    Ok(ehdr)
}

fn read_shdr(data: &[u8], shoff: usize, index: usize) -> Result<SectionHeader, Error> {
    Ok(data.pread_with(shoff + index * SIZEOF_SHDR, scroll::LE)?)
}

/// Bounds-checks a section header against the file and records where its
/// data lives.
fn validate_section(data: &[u8], index: usize, shdr: &SectionHeader) -> Result<Section, Error> {
    let offset = usize::try_from(shdr.sh_offset).ok();
    let size = usize::try_from(shdr.sh_size).ok();
    match (offset, size) {
        (Some(offset), Some(size))
            if offset
                .checked_add(size)
                .map_or(false, |end| end <= data.len()) =>
        {
            Ok(Section {
                shdr_index: index,
                offset,
                size,
            })
        }
        _ => Err(ErrorKind::ElfFormat("ELF section is beyond EOF".into()).into()),
    }
}

/// Compares a name in the section header string table against `name`,
/// treating it as NUL-terminated and leaving room for the terminator.
fn section_name_is(shstrtab: &[u8], sh_name: u32, name: &str) -> bool {
    let offset = sh_name as usize;
    if offset == 0 || offset >= shstrtab.len() {
        return false;
    }
    let rest = &shstrtab[offset..];
    rest.len() > name.len() && &rest[..name.len()] == name.as_bytes() && rest[name.len()] == 0
}

fn read_sections(data: &[u8]) -> Result<Sections, Error> {
    let ehdr = validate_ehdr(data)?;
    let shoff = ehdr.e_shoff as usize;
    let shnum = usize::from(ehdr.e_shnum);

    let mut shstrndx = u32::from(ehdr.e_shstrndx);
    if shstrndx == SHN_XINDEX {
        shstrndx = read_shdr(data, shoff, 0)?.sh_link;
    }
    if shstrndx == SHN_UNDEF || shstrndx as usize >= shnum {
        return Err(ErrorKind::ElfFormat(
            "invalid ELF section header string table index".into(),
        )
        .into());
    }
    let shstrtab_shdr = read_shdr(data, shoff, shstrndx as usize)?;
    let shstrtab = validate_section(data, shstrndx as usize, &shstrtab_shdr)?;
    let shstrtab = &data[shstrtab.offset..shstrtab.offset + shstrtab.size];

    let mut symtab: Option<Section> = None;
    let mut debug: [Option<Section>; NUM_DEBUG_SECTIONS] = [None; NUM_DEBUG_SECTIONS];

    for index in 0..shnum {
        let shdr = read_shdr(data, shoff, index)?;
        let slot = if shdr.sh_type == SHT_PROGBITS {
            match SECTION_NAMES
                .iter()
                .position(|name| section_name_is(shstrtab, shdr.sh_name, name))
            {
                Some(kind) => &mut debug[kind],
                None => continue,
            }
        } else if shdr.sh_type == SHT_SYMTAB {
            // The first symbol table wins.
            if symtab.is_some() {
                continue;
            }
            &mut symtab
        } else {
            continue;
        };
        *slot = Some(validate_section(data, index, &shdr)?);
    }

    let symtab = symtab.ok_or_else(|| missing_section(".symtab"))?;
    let [abbrev, info, str_] = debug;
    let debug = [
        abbrev.ok_or_else(|| missing_section(".debug_abbrev"))?,
        info.ok_or_else(|| missing_section(".debug_info"))?,
        str_.ok_or_else(|| missing_section(".debug_str"))?,
    ];

    let mut rela: [Option<Section>; NUM_DEBUG_SECTIONS] = [None; NUM_DEBUG_SECTIONS];
    for index in 0..shnum {
        let shdr = read_shdr(data, shoff, index)?;
        if shdr.sh_type != SHT_RELA {
            continue;
        }
        let Some(kind) = debug
            .iter()
            .position(|target| target.shdr_index == shdr.sh_info as usize)
        else {
            continue;
        };
        if shdr.sh_link as usize != symtab.shdr_index {
            return Err(ErrorKind::ElfFormat(
                "relocation symbol table section is not .symtab".into(),
            )
            .into());
        }
        rela[kind] = Some(validate_section(data, index, &shdr)?);
    }

    Ok(Sections {
        symtab,
        debug,
        rela,
    })
}

fn missing_section(name: &str) -> Error {
    ErrorKind::DwarfFormat(format!("missing {name}")).into()
}

/// Applies `R_X86_64_NONE`/`32`/`64` relocations from `rela` to `target`,
/// resolving symbols against `symtab`.
fn relocate_section(
    data: &mut [u8],
    target: Section,
    rela: Section,
    symtab: Section,
) -> Result<(), Error> {
    let num_relocs = rela.size / SIZEOF_RELA;
    let num_syms = symtab.size / SIZEOF_SYM;

    for index in 0..num_relocs {
        let reloc: Rela = data.pread_with(rela.offset + index * SIZEOF_RELA, scroll::LE)?;
        let r_sym = (reloc.r_info >> 32) as usize;
        let r_type = (reloc.r_info & 0xffff_ffff) as u32;

        let width = match r_type {
            R_X86_64_NONE => continue,
            R_X86_64_32 => 4,
            R_X86_64_64 => 8,
            other => {
                return Err(ErrorKind::Unsupported(format!("relocation type {other}")).into())
            }
        };

        if r_sym >= num_syms {
            return Err(ErrorKind::ElfFormat("invalid relocation symbol".into()).into());
        }
        let offset = usize::try_from(reloc.r_offset)
            .ok()
            .filter(|offset| {
                offset
                    .checked_add(width)
                    .map_or(false, |end| end <= target.size)
            })
            .ok_or_else(|| Error::from(ErrorKind::ElfFormat("invalid relocation offset".into())))?;

        let sym: Sym = data.pread_with(symtab.offset + r_sym * SIZEOF_SYM, scroll::LE)?;
        let value = sym.st_value.wrapping_add_signed(reloc.r_addend);
        if width == 4 {
            data.pwrite_with(value as u32, target.offset + offset, scroll::LE)?;
        } else {
            data.pwrite_with(value, target.offset + offset, scroll::LE)?;
        }
    }
    Ok(())
}
