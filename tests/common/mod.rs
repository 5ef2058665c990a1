//! Byte-level builders for synthetic relocatable objects.
//!
//! Tests assemble minimal ELF64 object files containing hand-written DWARF
//! sections, write them to a temporary file and feed them to the index.

#![allow(dead_code)]

use std::io::Write;

use tempfile::NamedTempFile;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_RELA: u32 = 4;

pub const R_X86_64_NONE: u32 = 0;
pub const R_X86_64_64: u32 = 1;
pub const R_X86_64_32: u32 = 10;

pub const SIZEOF_EHDR: usize = 64;
pub const SIZEOF_SHDR: usize = 64;

pub fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn push_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn uleb(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value as u8) & 0x7f;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

struct SectionSpec {
    name: String,
    sh_type: u32,
    data: Vec<u8>,
    link: u32,
    info: u32,
    entsize: u64,
}

/// Assembles a relocatable ELF64 object: header, section data, then the
/// section header table with a leading NULL entry and a trailing
/// `.shstrtab`.
pub struct ObjectBuilder {
    sections: Vec<SectionSpec>,
}

impl ObjectBuilder {
    pub fn new() -> Self {
        ObjectBuilder {
            sections: Vec::new(),
        }
    }

    /// Appends a section and returns its section header index.
    pub fn section(&mut self, name: &str, sh_type: u32, data: Vec<u8>) -> u32 {
        self.linked_section(name, sh_type, data, 0, 0, 0)
    }

    pub fn linked_section(
        &mut self,
        name: &str,
        sh_type: u32,
        data: Vec<u8>,
        link: u32,
        info: u32,
        entsize: u64,
    ) -> u32 {
        self.sections.push(SectionSpec {
            name: name.into(),
            sh_type,
            data,
            link,
            info,
            entsize,
        });
        // Index 0 is the NULL section.
        self.sections.len() as u32
    }

    pub fn build(&self) -> Vec<u8> {
        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for section in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");

        let shnum = self.sections.len() + 2;
        let shstrndx = (shnum - 1) as u16;

        let mut offsets = Vec::new();
        let mut pos = SIZEOF_EHDR;
        for section in &self.sections {
            offsets.push(pos);
            pos += section.data.len();
        }
        let shstrtab_offset = pos;
        pos += shstrtab.len();
        let shoff = pos;

        let mut out = Vec::new();
        out.extend_from_slice(&[
            0x7f, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ]);
        push_u16(&mut out, 1); // e_type = ET_REL
        push_u16(&mut out, 62); // e_machine = EM_X86_64
        push_u32(&mut out, 1); // e_version
        push_u64(&mut out, 0); // e_entry
        push_u64(&mut out, 0); // e_phoff
        push_u64(&mut out, shoff as u64);
        push_u32(&mut out, 0); // e_flags
        push_u16(&mut out, SIZEOF_EHDR as u16);
        push_u16(&mut out, 0); // e_phentsize
        push_u16(&mut out, 0); // e_phnum
        push_u16(&mut out, SIZEOF_SHDR as u16);
        push_u16(&mut out, shnum as u16);
        push_u16(&mut out, shstrndx);

        for section in &self.sections {
            out.extend_from_slice(&section.data);
        }
        out.extend_from_slice(&shstrtab);

        out.extend_from_slice(&[0u8; SIZEOF_SHDR]);
        for (index, section) in self.sections.iter().enumerate() {
            push_shdr(
                &mut out,
                name_offsets[index],
                section.sh_type,
                offsets[index] as u64,
                section.data.len() as u64,
                section.link,
                section.info,
                section.entsize,
            );
        }
        push_shdr(
            &mut out,
            shstrtab_name,
            SHT_STRTAB,
            shstrtab_offset as u64,
            shstrtab.len() as u64,
            0,
            0,
            0,
        );

        out
    }

    pub fn write(&self) -> NamedTempFile {
        write_bytes(&self.build())
    }
}

fn push_shdr(
    out: &mut Vec<u8>,
    name: u32,
    sh_type: u32,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    entsize: u64,
) {
    push_u32(out, name);
    push_u32(out, sh_type);
    push_u64(out, 0); // flags
    push_u64(out, 0); // addr
    push_u64(out, offset);
    push_u64(out, size);
    push_u32(out, link);
    push_u32(out, info);
    push_u64(out, 0); // addralign
    push_u64(out, entsize);
}

pub fn write_bytes(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// Encodes a whole abbreviation table: `(code, tag, children, attributes)`
/// per declaration, each attribute a `(name, form)` pair.
pub fn abbrev_table(decls: &[(u64, u64, u8, &[(u64, u64)])]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(code, tag, children, attrs) in decls {
        uleb(code, &mut out);
        uleb(tag, &mut out);
        out.push(children);
        for &(name, form) in attrs {
            uleb(name, &mut out);
            uleb(form, &mut out);
        }
        out.push(0);
        out.push(0);
    }
    out.push(0);
    out
}

/// A compilation unit in 32-bit DWARF format.
pub fn unit32(version: u16, abbrev_offset: u32, address_size: u8, dies: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, 7 + dies.len() as u32);
    push_u16(&mut out, version);
    push_u32(&mut out, abbrev_offset);
    out.push(address_size);
    out.extend_from_slice(dies);
    out
}

/// A compilation unit in 64-bit DWARF format.
pub fn unit64(version: u16, abbrev_offset: u64, address_size: u8, dies: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, 0xffff_ffff);
    push_u64(&mut out, 11 + dies.len() as u64);
    push_u16(&mut out, version);
    push_u64(&mut out, abbrev_offset);
    out.push(address_size);
    out.extend_from_slice(dies);
    out
}

/// One `Elf64_Sym` with the given value; everything else zero.
pub fn sym(st_value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    push_u32(&mut out, 0); // st_name
    out.push(0); // st_info
    out.push(0); // st_other
    push_u16(&mut out, 0); // st_shndx
    push_u64(&mut out, st_value);
    push_u64(&mut out, 0); // st_size
    out
}

/// One `Elf64_Rela`.
pub fn rela(r_offset: u64, r_sym: u32, r_type: u32, r_addend: i64) -> Vec<u8> {
    let mut out = Vec::new();
    push_u64(&mut out, r_offset);
    push_u64(&mut out, (u64::from(r_sym) << 32) | u64::from(r_type));
    out.extend_from_slice(&r_addend.to_le_bytes());
    out
}

/// A builder pre-populated with the four required sections. The symbol
/// table holds a single null symbol.
pub fn debug_object(abbrev: Vec<u8>, info: Vec<u8>, strs: &[u8]) -> ObjectBuilder {
    let mut builder = ObjectBuilder::new();
    builder.section(".debug_abbrev", SHT_PROGBITS, abbrev);
    builder.section(".debug_info", SHT_PROGBITS, info);
    builder.section(".debug_str", SHT_PROGBITS, strs.to_vec());
    builder.section(".symtab", SHT_SYMTAB, sym(0));
    builder
}
