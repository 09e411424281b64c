mod common;

use cerberus_core::model::{Arch, Operand};
use cerberus_core::services::disasm::Disassembler;
use cerberus_core::services::extractor::{
    read_arch, BoundarySource, ExtractError, FunctionExtractor,
};

use common::*;

#[test]
fn disassembler_reports_branches_and_operand_shapes() {
    let dis = Disassembler::new(Arch::X86_64).unwrap();
    let insns = dis.disassemble(&alpha(0x10, 0x20), 0x1000).unwrap();
    assert_eq!(insns.len(), 11);
    assert_eq!(insns[0].mnemonic, "push");
    assert_eq!(insns[0].operands, [Operand::Register]);

    let load = &insns[3];
    assert_eq!(load.mnemonic, "mov");
    assert!(matches!(
        load.operands[1],
        Operand::Memory { has_base: true, has_index: false, pc_relative: true, displacement: 0x10 }
    ));

    let call = &insns[6];
    assert_eq!(call.mnemonic, "call");
    assert!(call.is_branch);
    assert_eq!(insns[10].mnemonic, "ret");
    assert_eq!(insns[10].address, 0x1000 + ALPHA_LEN as u64 - 1);
}

#[test]
fn stripped_target_is_swept_linearly() {
    let target = FunctionExtractor::new(4).extract_target(&stripped_target()).unwrap();
    assert_eq!(target.arch, Arch::X86_64);
    assert_eq!(target.boundary_source, BoundarySource::LinearSweep);
    assert!(target.named_addresses.is_empty());

    let starts: Vec<u64> = target.functions.iter().map(|f| f.start_address).collect();
    assert_eq!(starts, [0, TARGET_BETA], "tiny must be dropped by the size filter");
    assert_eq!(target.functions[0].instruction_count(), 11);
    assert_eq!(target.functions[0].size, ALPHA_LEN as u64);
    assert_eq!(target.functions[1].instruction_count(), 9);
    assert_eq!(target.functions[1].size, BETA_LEN as u64);
}

#[test]
fn size_filter_counts_instructions() {
    let keep_all = FunctionExtractor::new(1).extract_target(&stripped_target()).unwrap();
    assert_eq!(keep_all.functions.len(), 3);
    assert_eq!(keep_all.functions[2].start_address, TARGET_TINY);

    let strict = FunctionExtractor::new(10).extract_target(&stripped_target()).unwrap();
    assert_eq!(strict.functions.len(), 1);
    assert_eq!(strict.functions[0].start_address, 0);
}

#[test]
fn function_symbols_define_boundaries_and_mark_named_code() {
    let target = FunctionExtractor::new(4).extract_target(&partially_named_target()).unwrap();
    assert_eq!(target.boundary_source, BoundarySource::Metadata);
    assert!(target.named_addresses.contains(&0));
    assert_eq!(target.functions.len(), 1);
    assert_eq!(target.functions[0].instruction_count(), 11);
    assert!(target.functions[0].name.is_none());
}

#[test]
fn reference_object_yields_named_functions() {
    let (arch, functions) =
        FunctionExtractor::new(4).extract_reference(&reference_object()).unwrap();
    assert_eq!(arch, Arch::X86_64);
    let names: Vec<_> = functions.iter().filter_map(|f| f.name.as_deref()).collect();
    assert_eq!(names, [ALPHA_SYMBOL, BETA_SYMBOL]);
}

#[test]
fn rlib_archive_members_are_decoded_in_order() {
    let object = reference_object();
    let rlib =
        ar_archive(&[("lib.rmeta", &b"metadata"[..]), ("foo-cgu.0.o", object.as_slice())]);
    let (arch, functions) = FunctionExtractor::new(1).extract_reference(&rlib).unwrap();
    assert_eq!(arch, Arch::X86_64);
    let names: Vec<_> = functions.iter().filter_map(|f| f.name.as_deref()).collect();
    assert_eq!(names, [ALPHA_SYMBOL, BETA_SYMBOL, TINY_SYMBOL]);
}

#[test]
fn non_elf_input_is_rejected() {
    let err =
        FunctionExtractor::new(1).extract_target(b"definitely not an ELF file").unwrap_err();
    assert!(matches!(err, ExtractError::Parse(_)), "unexpected error: {err}");
    assert!(read_arch(b"\x7fELF").is_err());
}

#[test]
fn read_arch_reports_machine() {
    assert_eq!(read_arch(&stripped_target()).unwrap(), Arch::X86_64);
}

#[test]
fn linked_executable_is_swept_at_load_addresses() {
    let target = FunctionExtractor::new(4).extract_target(&linked_executable()).unwrap();
    assert_eq!(target.boundary_source, BoundarySource::LinearSweep);
    let starts: Vec<u64> = target.functions.iter().map(|f| f.start_address).collect();
    assert_eq!(starts, [EXEC_TEXT, EXEC_TEXT + TARGET_BETA]);
}

#[test]
fn oversized_section_does_not_overflow() {
    let mut image = linked_executable();
    let shoff = u64::from_le_bytes(image[0x28..0x30].try_into().unwrap()) as usize;
    // sh_size of section 1 (.text)
    let size_at = shoff + 64 + 0x20;
    image[size_at..size_at + 8].copy_from_slice(&u64::MAX.to_le_bytes());

    let target = FunctionExtractor::new(1).extract_target(&image).unwrap();
    assert_eq!(target.functions.first().map(|f| f.start_address), Some(EXEC_TEXT));
}
