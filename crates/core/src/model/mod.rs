//! Core data model shared by the build, fingerprint and matching stages.
//!
//! Everything here is plain data: crates declared for a session, functions
//! decoded from an ELF artifact, and the symbol assignments produced at the end.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Instruction-set architecture of an ELF artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
}

impl Arch {
    /// Map an ELF `e_machine` value to a supported architecture.
    pub fn from_e_machine(machine: u16) -> Option<Self> {
        use goblin::elf::header;
        match machine {
            header::EM_386 => Some(Arch::X86),
            header::EM_X86_64 => Some(Arch::X86_64),
            header::EM_ARM => Some(Arch::Arm),
            header::EM_AARCH64 => Some(Arch::Aarch64),
            _ => None,
        }
    }

    /// Cargo target triple to build reference crates with. `None` means the
    /// host default, which is assumed to be x86_64.
    pub fn target_triple(self) -> Option<&'static str> {
        match self {
            Arch::X86 => Some("i686-unknown-linux-gnu"),
            Arch::Arm => Some("armv7-unknown-linux-gnueabihf"),
            Arch::Aarch64 => Some("aarch64-unknown-linux-gnu"),
            Arch::X86_64 => None,
        }
    }

    pub fn is_32bit(self) -> bool {
        matches!(self, Arch::X86 | Arch::Arm)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Arch::X86 => "x86",
            Arch::X86_64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Aarch64 => "aarch64",
        };
        f.write_str(name)
    }
}

/// A crate the user believes is statically linked into the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrateSpec {
    pub name: String,
    pub version: String,
}

impl CrateSpec {
    /// Build a spec, dropping a leading `v` from the version (`v1.0.0` -> `1.0.0`).
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let version = version.into();
        let version = version.strip_prefix('v').map(str::to_string).unwrap_or(version);
        Self { name: name.into().trim().to_string(), version: version.trim().to_string() }
    }

    /// Crate name as it appears in Rust paths (`serde-json` -> `serde_json`).
    pub fn ident(&self) -> String {
        self.name.replace('-', "_")
    }

    /// Directory name used by `cargo vendor --versioned-dirs`.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

impl fmt::Display for CrateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// Insertion-ordered set of crates, unique by name.
///
/// Order matters: it is the registration order used to break ties between
/// equally good matches coming from different crates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrateSet {
    crates: Vec<CrateSpec>,
}

impl CrateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a crate, or replace the version of an existing crate in place.
    pub fn upsert(&mut self, spec: CrateSpec) {
        match self.crates.iter_mut().find(|c| c.name == spec.name) {
            Some(existing) => existing.version = spec.version,
            None => self.crates.push(spec),
        }
    }

    /// Insert only if no crate with the same name is present.
    pub fn insert_if_absent(&mut self, spec: CrateSpec) -> bool {
        if self.contains(&spec.name) {
            return false;
        }
        self.crates.push(spec);
        true
    }

    pub fn remove(&mut self, name: &str) -> Option<CrateSpec> {
        let idx = self.crates.iter().position(|c| c.name == name)?;
        Some(self.crates.remove(idx))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.crates.iter().any(|c| c.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&CrateSpec> {
        self.crates.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrateSpec> {
        self.crates.iter()
    }

    pub fn len(&self) -> usize {
        self.crates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crates.is_empty()
    }
}

impl FromIterator<CrateSpec> for CrateSet {
    fn from_iter<I: IntoIterator<Item = CrateSpec>>(iter: I) -> Self {
        let mut set = CrateSet::new();
        for spec in iter {
            set.upsert(spec);
        }
        set
    }
}

/// Operand of a decoded instruction, reduced to what fingerprinting needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register,
    Immediate(i64),
    Memory { has_base: bool, has_index: bool, pc_relative: bool, displacement: i64 },
    Other,
}

/// One decoded machine instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u64,
    pub size: u8,
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    /// Call or jump: immediate operands are code addresses.
    pub is_branch: bool,
}

impl Instruction {
    pub fn new(address: u64, size: u8, mnemonic: impl Into<String>) -> Self {
        Self {
            address,
            size,
            mnemonic: mnemonic.into(),
            operands: Vec::new(),
            is_branch: false,
        }
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    pub fn branch(mut self) -> Self {
        self.is_branch = true;
        self
    }
}

/// A contiguous function body decoded from an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub start_address: u64,
    /// Size in bytes.
    pub size: u64,
    /// Symbol name for reference functions; `None` for anonymous target code.
    pub name: Option<String>,
    pub instructions: Vec<Instruction>,
}

impl Function {
    pub fn address_range(&self) -> AddressRange {
        AddressRange { start: self.start_address, end: self.start_address + self.size }
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }
}

/// Half-open address range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}-0x{:X}", self.start, self.end)
    }
}

/// Final name recovered for a region of the target binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolAssignment {
    pub address_range: AddressRange,
    pub recovered_name: String,
    pub source_crate: String,
}
