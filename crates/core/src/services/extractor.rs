use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use gimli::UnwindSection;
use goblin::elf::{self, Elf};
use goblin::Object;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::{Arch, Function, Instruction};
use crate::services::disasm::{DisasmError, Disassembler};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse object: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("not an ELF file or an rlib archive of ELF objects")]
    NotElf,
    #[error("unsupported ELF machine 0x{0:X}")]
    UnsupportedArch(u16),
    #[error(transparent)]
    Disasm(#[from] DisasmError),
}

/// Where function boundaries of a target binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySource {
    /// `.eh_frame` FDEs and/or `STT_FUNC` symbols.
    Metadata,
    /// Linear sweep over executable sections.
    LinearSweep,
}

/// A target binary broken into functions.
#[derive(Debug, Clone)]
pub struct TargetBinary {
    pub arch: Arch,
    pub functions: Vec<Function>,
    /// Start addresses that already carry a named function symbol.
    pub named_addresses: BTreeSet<u64>,
    pub boundary_source: BoundarySource,
}

#[derive(Debug, Clone)]
struct ExecSection {
    addr: u64,
    offset: u64,
    size: u64,
}

impl ExecSection {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.addr.saturating_add(self.size)
    }
}

fn section_range_to_file(
    addr: u64,
    size: Option<u64>,
    sec_addr: u64,
    sec_size: u64,
    sec_offset: u64,
    bytes_len: usize,
) -> Option<(usize, usize)> {
    if addr < sec_addr || addr >= sec_addr.saturating_add(sec_size) {
        return None;
    }
    let offset_in_section = addr.saturating_sub(sec_addr);
    let start = sec_offset.saturating_add(offset_in_section);
    if start as usize >= bytes_len {
        return None;
    }
    let available = sec_size.saturating_sub(offset_in_section);
    let length = size.unwrap_or(available).min(available);
    let end = start.saturating_add(length).min(bytes_len as u64);
    if end <= start {
        None
    } else {
        Some((start as usize, end as usize))
    }
}

fn elf_arch(elf: &Elf) -> Result<Arch, ExtractError> {
    Arch::from_e_machine(elf.header.e_machine)
        .ok_or(ExtractError::UnsupportedArch(elf.header.e_machine))
}

fn section_by_name<'a>(elf: &'a Elf, name: &str) -> Option<&'a elf::SectionHeader> {
    elf.section_headers.iter().find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(name))
}

fn exec_sections(elf: &Elf) -> Vec<ExecSection> {
    elf.section_headers
        .iter()
        .filter(|sh| sh.is_executable() && sh.sh_type == elf::section_header::SHT_PROGBITS)
        .map(|sh| ExecSection { addr: sh.sh_addr, offset: sh.sh_offset, size: sh.sh_size })
        .collect()
}

/// Read the architecture of an ELF file without decoding anything else.
pub fn read_arch(bytes: &[u8]) -> Result<Arch, ExtractError> {
    let elf = Elf::parse(bytes)?;
    elf_arch(&elf)
}

/// `(start, len)` of every FDE in `.eh_frame`.
fn fde_ranges(elf: &Elf, bytes: &[u8]) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    if elf.header.e_type == elf::header::ET_REL {
        // FDE addresses are unrelocated zeros in object files.
        return ranges;
    }
    let Some(sh) = section_by_name(elf, ".eh_frame") else {
        return ranges;
    };
    let start = sh.sh_offset as usize;
    let Some(data) = start.checked_add(sh.sh_size as usize).and_then(|end| bytes.get(start..end))
    else {
        return ranges;
    };

    let endian =
        if elf.little_endian { gimli::RunTimeEndian::Little } else { gimli::RunTimeEndian::Big };
    let mut eh_frame = gimli::EhFrame::new(data, endian);
    eh_frame.set_address_size(if elf.is_64 { 8 } else { 4 });

    let mut bases = gimli::BaseAddresses::default().set_eh_frame(sh.sh_addr);
    if let Some(text) = section_by_name(elf, ".text") {
        bases = bases.set_text(text.sh_addr);
    }
    if let Some(got) = section_by_name(elf, ".got") {
        bases = bases.set_got(got.sh_addr);
    }

    let mut entries = eh_frame.entries(&bases);
    loop {
        match entries.next() {
            Ok(Some(gimli::CieOrFde::Fde(partial))) => {
                match partial.parse(|section, bases, offset| section.cie_from_offset(bases, offset))
                {
                    Ok(fde) if fde.len() > 0 => ranges.push((fde.initial_address(), fde.len())),
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "skipping malformed FDE"),
                }
            }
            Ok(Some(gimli::CieOrFde::Cie(_))) => {}
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stopping .eh_frame walk");
                break;
            }
        }
    }
    ranges
}

/// Defined, sized function symbols: `(address, size, name, section index)`.
fn function_symbols(elf: &Elf) -> Vec<(u64, u64, String, usize)> {
    elf.syms
        .iter()
        .filter(|sym| {
            sym.is_function()
                && sym.st_shndx != elf::section_header::SHN_UNDEF as usize
                && sym.st_size > 0
        })
        .filter_map(|sym| {
            let name = elf.strtab.get_at(sym.st_name).unwrap_or("");
            if name.is_empty() {
                return None;
            }
            Some((sym.st_value, sym.st_size, name.to_string(), sym.st_shndx))
        })
        .collect()
}

fn is_padding(insn: &Instruction) -> bool {
    matches!(insn.mnemonic.as_str(), "nop" | "int3" | "hlt" | "ud2")
}

fn is_terminator(insn: &Instruction) -> bool {
    matches!(insn.mnemonic.as_str(), "ret" | "retn" | "retf" | "hlt" | "ud2")
}

/// Split a decoded section into functions: a function ends after a
/// terminator, and padding between functions is skipped.
fn sweep_functions(instructions: Vec<Instruction>) -> Vec<Vec<Instruction>> {
    let mut functions = Vec::new();
    let mut current: Vec<Instruction> = Vec::new();
    for insn in instructions {
        if current.is_empty() && is_padding(&insn) {
            continue;
        }
        let ends = is_terminator(&insn);
        current.push(insn);
        if ends {
            functions.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        functions.push(current);
    }
    functions
}

/// Decodes ELF artifacts into functions and drops the ones that are too small
/// to fingerprint reliably.
#[derive(Debug, Clone)]
pub struct FunctionExtractor {
    /// Minimum number of instructions a function needs to be kept.
    pub min_func_size: usize,
}

impl FunctionExtractor {
    pub fn new(min_func_size: usize) -> Self {
        Self { min_func_size }
    }

    fn keep(&self, function: &Function) -> bool {
        function.instruction_count() >= self.min_func_size
    }

    /// Decode the target binary at `path`.
    pub fn extract_target_file(&self, path: &Path) -> Result<TargetBinary, ExtractError> {
        let bytes = fs::read(path)
            .map_err(|source| ExtractError::Read { path: path.to_path_buf(), source })?;
        self.extract_target(&bytes)
    }

    /// Decode a (usually stripped) ELF binary into functions.
    ///
    /// Boundaries come from `.eh_frame` and function symbols; when neither
    /// yields anything, executable sections are swept linearly.
    pub fn extract_target(&self, bytes: &[u8]) -> Result<TargetBinary, ExtractError> {
        let elf = Elf::parse(bytes)?;
        let arch = elf_arch(&elf)?;
        let dis = Disassembler::new(arch)?;
        let sections = exec_sections(&elf);

        let symbols = function_symbols(&elf);
        let named_addresses: BTreeSet<u64> = symbols.iter().map(|(addr, ..)| *addr).collect();

        let mut boundaries: BTreeMap<u64, u64> = BTreeMap::new();
        for (start, len) in fde_ranges(&elf, bytes) {
            boundaries.entry(start).or_insert(len);
        }
        for (addr, size, ..) in &symbols {
            boundaries.entry(*addr).or_insert(*size);
        }

        let mut functions = Vec::new();
        let boundary_source = if boundaries.is_empty() {
            for sec in &sections {
                let Some((start, end)) = section_range_to_file(
                    sec.addr,
                    None,
                    sec.addr,
                    sec.size,
                    sec.offset,
                    bytes.len(),
                ) else {
                    continue;
                };
                let decoded = dis.disassemble(&bytes[start..end], sec.addr)?;
                for body in sweep_functions(decoded) {
                    let (Some(first), Some(last)) = (body.first(), body.last()) else { continue };
                    let start_address = first.address;
                    let end = last.address.saturating_add(u64::from(last.size));
                    let size = end.saturating_sub(start_address);
                    functions.push(Function {
                        start_address,
                        size,
                        name: None,
                        instructions: body,
                    });
                }
            }
            BoundarySource::LinearSweep
        } else {
            for (&start, &len) in &boundaries {
                let Some(sec) = sections.iter().find(|s| s.contains(start)) else { continue };
                let Some((from, to)) = section_range_to_file(
                    start,
                    Some(len),
                    sec.addr,
                    sec.size,
                    sec.offset,
                    bytes.len(),
                ) else {
                    continue;
                };
                let instructions = dis.disassemble(&bytes[from..to], start)?;
                functions.push(Function {
                    start_address: start,
                    size: (to - from) as u64,
                    name: None,
                    instructions,
                });
            }
            BoundarySource::Metadata
        };

        let total = functions.len();
        functions.retain(|f| self.keep(f));
        debug!(
            %arch,
            total,
            kept = functions.len(),
            source = ?boundary_source,
            "extracted target functions"
        );
        Ok(TargetBinary { arch, functions, named_addresses, boundary_source })
    }

    /// Decode a reference artifact (rlib or single ELF object) at `path`.
    pub fn extract_reference_file(
        &self,
        path: &Path,
    ) -> Result<(Arch, Vec<Function>), ExtractError> {
        let bytes = fs::read(path)
            .map_err(|source| ExtractError::Read { path: path.to_path_buf(), source })?;
        self.extract_reference(&bytes)
    }

    /// Decode every named, sized function of a reference artifact.
    ///
    /// An rlib is an ar archive; each `.o` member is decoded in archive order.
    pub fn extract_reference(&self, bytes: &[u8]) -> Result<(Arch, Vec<Function>), ExtractError> {
        match Object::parse(bytes)? {
            Object::Elf(elf) => {
                let arch = elf_arch(&elf)?;
                let functions = self.named_functions(&elf, bytes, arch)?;
                Ok((arch, functions))
            }
            Object::Archive(archive) => {
                let mut arch = None;
                let mut functions = Vec::new();
                for member in archive.members() {
                    if !member.ends_with(".o") {
                        continue;
                    }
                    let data = archive.extract(member, bytes)?;
                    let Ok(elf) = Elf::parse(data) else {
                        debug!(member, "skipping non-ELF archive member");
                        continue;
                    };
                    let member_arch = elf_arch(&elf)?;
                    arch.get_or_insert(member_arch);
                    functions.extend(self.named_functions(&elf, data, member_arch)?);
                }
                let arch = arch.ok_or(ExtractError::NotElf)?;
                Ok((arch, functions))
            }
            _ => Err(ExtractError::NotElf),
        }
    }

    fn named_functions(
        &self,
        elf: &Elf,
        bytes: &[u8],
        arch: Arch,
    ) -> Result<Vec<Function>, ExtractError> {
        let dis = Disassembler::new(arch)?;
        let mut functions = Vec::new();
        for (addr, size, name, shndx) in function_symbols(elf) {
            let Some(sh) = elf.section_headers.get(shndx) else { continue };
            if sh.sh_type != elf::section_header::SHT_PROGBITS {
                continue;
            }
            let Some((from, to)) = section_range_to_file(
                addr,
                Some(size),
                sh.sh_addr,
                sh.sh_size,
                sh.sh_offset,
                bytes.len(),
            ) else {
                continue;
            };
            let instructions = dis.disassemble(&bytes[from..to], addr)?;
            let function = Function {
                start_address: addr,
                size: (to - from) as u64,
                name: Some(name),
                instructions,
            };
            if self.keep(&function) {
                functions.push(function);
            }
        }
        Ok(functions)
    }
}
