//! Writes recovered symbols back into an ELF file.
//!
//! Every byte of the input is kept in place. The new `.strtab`, `.symtab` and
//! section header table are appended after the end of the file, and only
//! `e_shoff`, `e_shnum` and `e_shstrndx` change in the ELF header. Loadable
//! segments, dynamic symbols and version tables are never touched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use goblin::elf::section_header::{self as shdr, SectionHeader};
use goblin::elf::{header, sym, Elf};
use object::endian::{Endian, Endianness};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::SymbolAssignment;

/// First reserved section index; tables at or above it need extended numbering.
const SHN_LORESERVE: usize = 0xff00;

#[derive(Debug, Error)]
pub enum PatcherError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse ELF: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error("unsupported ELF layout: {0}")]
    Unsupported(&'static str),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// Summary of a symbol write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSummary {
    pub written: usize,
    /// Assignments whose address is outside every executable section.
    pub skipped: usize,
}

/// Field encoding of one ELF class and byte order.
#[derive(Debug, Clone, Copy)]
struct Encoding {
    is_64: bool,
    endian: Endianness,
}

impl Encoding {
    fn word(self) -> usize {
        if self.is_64 {
            8
        } else {
            4
        }
    }

    fn sym_size(self) -> usize {
        if self.is_64 {
            24
        } else {
            16
        }
    }

    fn u16(self, out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&self.endian.write_u16_bytes(v));
    }

    fn u32(self, out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&self.endian.write_u32_bytes(v));
    }

    /// Address-sized field. Callers check that 32-bit values fit.
    fn addr(self, out: &mut Vec<u8>, v: u64) {
        if self.is_64 {
            out.extend_from_slice(&self.endian.write_u64_bytes(v));
        } else {
            self.u32(out, v as u32);
        }
    }

    fn section_header(self, out: &mut Vec<u8>, sh: &SectionHeader) {
        self.u32(out, sh.sh_name as u32);
        self.u32(out, sh.sh_type);
        self.addr(out, sh.sh_flags);
        self.addr(out, sh.sh_addr);
        self.addr(out, sh.sh_offset);
        self.addr(out, sh.sh_size);
        self.u32(out, sh.sh_link);
        self.u32(out, sh.sh_info);
        self.addr(out, sh.sh_addralign);
        self.addr(out, sh.sh_entsize);
    }

    fn function_symbol(self, out: &mut Vec<u8>, name: u32, shndx: u16, value: u64, size: u64) {
        let info = (sym::STB_GLOBAL << 4) | sym::STT_FUNC;
        self.u32(out, name);
        if self.is_64 {
            out.extend_from_slice(&[info, sym::STV_DEFAULT]);
            self.u16(out, shndx);
            self.addr(out, value);
            self.addr(out, size);
        } else {
            self.addr(out, value);
            self.addr(out, size);
            out.extend_from_slice(&[info, sym::STV_DEFAULT]);
            self.u16(out, shndx);
        }
    }

    /// Point the file header at the new section header table.
    fn update_file_header(self, image: &mut [u8], shoff: u64, shnum: u16, shstrndx: u16) {
        let (shoff_at, shnum_at) = if self.is_64 { (0x28, 0x3c) } else { (0x20, 0x30) };
        let mut fields = Vec::with_capacity(8);
        self.addr(&mut fields, shoff);
        image[shoff_at..shoff_at + fields.len()].copy_from_slice(&fields);

        let mut counts = Vec::with_capacity(4);
        self.u16(&mut counts, shnum);
        self.u16(&mut counts, shstrndx);
        image[shnum_at..shnum_at + 4].copy_from_slice(&counts);
    }
}

fn empty_section(name: usize, sh_type: u32) -> SectionHeader {
    SectionHeader {
        sh_name: name,
        sh_type,
        sh_flags: 0,
        sh_addr: 0,
        sh_offset: 0,
        sh_size: 0,
        sh_link: 0,
        sh_info: 0,
        sh_addralign: 1,
        sh_entsize: 0,
    }
}

fn section_data<'a>(data: &'a [u8], sh: &SectionHeader) -> Result<&'a [u8], PatcherError> {
    if sh.sh_type == shdr::SHT_NOBITS {
        return Ok(&[]);
    }
    let start = usize::try_from(sh.sh_offset).ok();
    let end = sh.sh_offset.checked_add(sh.sh_size).and_then(|e| usize::try_from(e).ok());
    match (start, end) {
        (Some(start), Some(end)) if end <= data.len() => Ok(&data[start..end]),
        _ => Err(PatcherError::Unsupported("section data lies outside the file")),
    }
}

/// Append a NUL-terminated string, returning its offset.
fn push_name(table: &mut Vec<u8>, name: &[u8]) -> usize {
    let offset = table.len();
    table.extend_from_slice(name);
    table.push(0);
    offset
}

fn pad_to(out: &mut Vec<u8>, align: usize) {
    let rem = out.len() % align;
    if rem != 0 {
        out.resize(out.len() + align - rem, 0);
    }
}

fn is_exec(sh: &SectionHeader) -> bool {
    sh.sh_type == shdr::SHT_PROGBITS && sh.sh_flags & u64::from(shdr::SHF_EXECINSTR) != 0
}

/// Add one global function symbol per assignment to `data` and return the new image.
///
/// An existing `.symtab` is extended in a copy placed at the end of the file;
/// stripped inputs get a fresh `.symtab` and `.strtab`. Nothing else moves.
pub fn patch_bytes(
    data: &[u8],
    assignments: &[SymbolAssignment],
) -> Result<(Vec<u8>, PatchSummary), PatcherError> {
    if assignments.is_empty() {
        return Ok((data.to_vec(), PatchSummary { written: 0, skipped: 0 }));
    }

    let elf = Elf::parse(data)?;
    let enc = Encoding {
        is_64: elf.is_64,
        endian: if elf.little_endian { Endianness::Little } else { Endianness::Big },
    };
    let relocatable = elf.header.e_type == header::ET_REL;
    let mut sections = elf.section_headers.clone();
    if sections.len() + 3 >= SHN_LORESERVE {
        return Err(PatcherError::Unsupported("extended section numbering"));
    }

    let mut summary = PatchSummary { written: 0, skipped: 0 };
    let mut pending = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let start = assignment.address_range.start;
        let found = sections.iter().enumerate().find(|(_, sh)| {
            is_exec(sh) && start >= sh.sh_addr && start < sh.sh_addr.saturating_add(sh.sh_size)
        });
        let Some((index, sh)) = found else {
            warn!(
                address = %format!("0x{start:X}"),
                name = %assignment.recovered_name,
                "no executable section contains address; symbol skipped"
            );
            summary.skipped += 1;
            continue;
        };
        // Relocatable objects store symbol values relative to their section.
        let value = if relocatable { start - sh.sh_addr } else { start };
        pending.push((assignment, index as u16, value));
    }
    if pending.is_empty() {
        return Ok((data.to_vec(), summary));
    }

    let mut shstrndx = usize::from(elf.header.e_shstrndx);
    let mut section_names: Option<Vec<u8>> = None;
    let (symtab_index, strtab_index, mut symtab, mut strtab) =
        match sections.iter().position(|sh| sh.sh_type == shdr::SHT_SYMTAB) {
            Some(index) => {
                let link = sections[index].sh_link as usize;
                if link == 0 || link >= sections.len() {
                    return Err(PatcherError::Unsupported(".symtab has no string table"));
                }
                let symtab = section_data(data, &sections[index])?.to_vec();
                let strtab = section_data(data, &sections[link])?.to_vec();
                (index, link, symtab, strtab)
            }
            None => {
                debug!("input has no .symtab; creating one");
                let mut names = if shstrndx != 0 && shstrndx < sections.len() {
                    section_data(data, &sections[shstrndx])?.to_vec()
                } else {
                    let mut names = vec![0];
                    let name = push_name(&mut names, b".shstrtab");
                    sections.push(empty_section(name, shdr::SHT_STRTAB));
                    shstrndx = sections.len() - 1;
                    names
                };
                let strtab_name = push_name(&mut names, b".strtab");
                let symtab_name = push_name(&mut names, b".symtab");
                section_names = Some(names);

                sections.push(empty_section(strtab_name, shdr::SHT_STRTAB));
                let strtab_index = sections.len() - 1;
                let mut symtab_header = empty_section(symtab_name, shdr::SHT_SYMTAB);
                symtab_header.sh_link = strtab_index as u32;
                // Only the null symbol is local.
                symtab_header.sh_info = 1;
                symtab_header.sh_addralign = enc.word() as u64;
                symtab_header.sh_entsize = enc.sym_size() as u64;
                sections.push(symtab_header);
                (sections.len() - 1, strtab_index, vec![0; enc.sym_size()], vec![0])
            }
        };

    for (assignment, shndx, value) in &pending {
        let name = push_name(&mut strtab, assignment.recovered_name.as_bytes());
        let name = u32::try_from(name)
            .map_err(|_| PatcherError::Unsupported("string table exceeds 4 GiB"))?;
        enc.function_symbol(&mut symtab, name, *shndx, *value, assignment.address_range.len());
    }
    summary.written = pending.len();

    let mut image = data.to_vec();
    let strtab_offset = image.len() as u64;
    image.extend_from_slice(&strtab);
    sections[strtab_index].sh_offset = strtab_offset;
    sections[strtab_index].sh_size = strtab.len() as u64;

    pad_to(&mut image, enc.word());
    let symtab_offset = image.len() as u64;
    image.extend_from_slice(&symtab);
    sections[symtab_index].sh_offset = symtab_offset;
    sections[symtab_index].sh_size = symtab.len() as u64;

    if let Some(names) = &section_names {
        let offset = image.len() as u64;
        image.extend_from_slice(names);
        sections[shstrndx].sh_offset = offset;
        sections[shstrndx].sh_size = names.len() as u64;
    }

    pad_to(&mut image, enc.word());
    let shoff = image.len() as u64;
    if !enc.is_64 && u32::try_from(shoff).is_err() {
        return Err(PatcherError::Unsupported("32-bit file would exceed 4 GiB"));
    }
    for sh in &sections {
        enc.section_header(&mut image, sh);
    }
    enc.update_file_header(&mut image, shoff, sections.len() as u16, shstrndx as u16);

    Ok((image, summary))
}

/// Write `input` with `assignments` applied to `output`.
///
/// The image is staged in a temporary file in the output directory and renamed
/// into place, so a failure never leaves a partial output behind.
pub fn patch_file(
    input: &Path,
    output: &Path,
    assignments: &[SymbolAssignment],
) -> Result<PatchSummary, PatcherError> {
    let data =
        fs::read(input).map_err(|source| PatcherError::Read { path: input.to_path_buf(), source })?;
    let (image, summary) = patch_bytes(&data, assignments)?;

    let write_err =
        |source: std::io::Error| PatcherError::Write { path: output.to_path_buf(), source };
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut staged = tempfile::Builder::new()
        .prefix(".cerberus-out-")
        .tempfile_in(&dir)
        .map_err(write_err)?;
    staged.write_all(&image).map_err(write_err)?;
    staged.flush().map_err(write_err)?;
    if let Ok(meta) = fs::metadata(input) {
        fs::set_permissions(staged.path(), meta.permissions()).map_err(write_err)?;
    }
    staged.persist(output).map_err(|e| write_err(e.error))?;

    info!(
        output = %output.display(),
        symbols = summary.written,
        outcome = "success",
        "patched binary written"
    );
    Ok(summary)
}
