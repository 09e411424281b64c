#![allow(dead_code)]

use object::write::{Object, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

pub const ALPHA_SYMBOL: &str = "_ZN3foo5alpha17h0123456789abcdefE";
pub const BETA_SYMBOL: &str = "_ZN3foo4beta17hfedcba9876543210E";
pub const TINY_SYMBOL: &str = "_ZN3foo4tiny17h00112233445566aaE";

pub const ALPHA_LEN: usize = 28;
pub const BETA_LEN: usize = 21;

/// 11 instructions; `disp` and `rel` vary with the link address.
pub fn alpha(disp: u32, rel: u32) -> Vec<u8> {
    let mut code = vec![0x55, 0x48, 0x89, 0xe5, 0x53];
    code.extend_from_slice(&[0x48, 0x8b, 0x05]);
    code.extend_from_slice(&disp.to_le_bytes());
    code.extend_from_slice(&[0x01, 0xc8, 0x31, 0xdb]);
    code.push(0xe8);
    code.extend_from_slice(&rel.to_le_bytes());
    code.extend_from_slice(&[0x48, 0x83, 0xc4, 0x08, 0x5b, 0x5d, 0xc3]);
    code
}

/// 9 instructions.
pub fn beta() -> Vec<u8> {
    vec![
        0x55, 0x48, 0x89, 0xe5, 0xb8, 0x2a, 0x00, 0x00, 0x00, 0x0f, 0xaf, 0xc1, 0x83, 0xf8, 0x10,
        0x7e, 0x02, 0x31, 0xc0, 0x5d, 0xc3,
    ]
}

/// 2 instructions: `xor eax, eax; ret`.
pub fn tiny() -> Vec<u8> {
    vec![0x31, 0xc0, 0xc3]
}

fn elf_object(text: Vec<u8>, symbols: &[(&str, u64, u64)]) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_id = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.section_mut(text_id).set_data(text, 16);
    for (name, value, size) in symbols {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: *value,
            size: *size,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text_id),
            flags: SymbolFlags::None,
        });
    }
    obj.write().expect("write ELF fixture")
}

/// Object file of crate `foo` with three named functions.
pub fn reference_object() -> Vec<u8> {
    let mut text = alpha(0x10, 0x20);
    text.extend(beta());
    text.extend(tiny());
    elf_object(
        text,
        &[
            (ALPHA_SYMBOL, 0, ALPHA_LEN as u64),
            (BETA_SYMBOL, ALPHA_LEN as u64, BETA_LEN as u64),
            (TINY_SYMBOL, (ALPHA_LEN + BETA_LEN) as u64, 3),
        ],
    )
}

/// One named function sharing no instruction shape with alpha or beta.
pub fn unrelated_object() -> Vec<u8> {
    let mut text: Vec<u8> = [0xff, 0xc0].repeat(12);
    text.push(0xc3);
    let len = text.len() as u64;
    elf_object(text, &[("_ZN3bar7counter17h0123456789abcdefE", 0, len)])
}

/// Start of beta in [`stripped_target`].
pub const TARGET_BETA: u64 = (ALPHA_LEN + 3) as u64;
/// Start of tiny in [`stripped_target`].
pub const TARGET_TINY: u64 = TARGET_BETA + BETA_LEN as u64 + 1;

/// The same three functions relinked elsewhere, int3 padded, without symbols.
pub fn stripped_target() -> Vec<u8> {
    let mut text = alpha(0x2000, 0x400);
    text.extend([0xcc, 0xcc, 0xcc]);
    text.extend(beta());
    text.push(0xcc);
    text.extend(tiny());
    elf_object(text, &[])
}

/// Like [`stripped_target`] but alpha keeps a symbol.
pub fn partially_named_target() -> Vec<u8> {
    let mut text = alpha(0x2000, 0x400);
    text.extend([0xcc, 0xcc, 0xcc]);
    text.extend(beta());
    elf_object(text, &[("already_named", 0, ALPHA_LEN as u64)])
}

/// Minimal SysV `ar` archive, the container format of an rlib.
pub fn ar_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"!<arch>\n".to_vec();
    for (name, data) in members {
        let header = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            format!("{name}/"),
            0,
            0,
            0,
            644,
            data.len()
        );
        assert_eq!(header.len(), 60);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

/// Load address of [`linked_executable`].
pub const EXEC_BASE: u64 = 0x40_0000;
/// Address of `.text` (alpha) in [`linked_executable`].
pub const EXEC_TEXT: u64 = EXEC_BASE + 0x100;

#[allow(clippy::too_many_arguments)]
fn push_section_header(
    out: &mut Vec<u8>,
    name: u32,
    kind: u32,
    flags: u64,
    offset: usize,
    size: usize,
    link: u32,
    info: u32,
    align: u64,
    entsize: u64,
) {
    let addr = if flags & 0x2 != 0 { EXEC_BASE + offset as u64 } else { 0 };
    out.extend(name.to_le_bytes());
    out.extend(kind.to_le_bytes());
    out.extend(flags.to_le_bytes());
    out.extend(addr.to_le_bytes());
    out.extend((offset as u64).to_le_bytes());
    out.extend((size as u64).to_le_bytes());
    out.extend(link.to_le_bytes());
    out.extend(info.to_le_bytes());
    out.extend(align.to_le_bytes());
    out.extend(entsize.to_le_bytes());
}

/// Linked x86_64 `ET_EXEC` with one `PT_LOAD`, a `.dynsym`/`.dynstr` pair and
/// no `.symtab`. `.text` holds alpha, int3 padding and beta.
pub fn linked_executable() -> Vec<u8> {
    let mut text = alpha(0x2000, 0x400);
    text.extend([0xcc, 0xcc, 0xcc]);
    text.extend(beta());

    let dynstr = b"\0libc.so.6\0puts\0".to_vec();
    let mut dynsym = vec![0u8; 24];
    dynsym.extend(11u32.to_le_bytes());
    dynsym.extend([0x12, 0]);
    dynsym.extend(0u16.to_le_bytes());
    dynsym.extend([0u8; 16]);
    let shstrtab = b"\0.text\0.dynsym\0.dynstr\0.shstrtab\0".to_vec();

    let (dynstr_off, dynsym_off, text_off) = (0x80, 0x90, 0x100);
    let shstrtab_off = text_off + text.len();
    let shoff = (shstrtab_off + shstrtab.len() + 7) & !7;
    let load_size = (text_off + text.len()) as u64;

    let mut out = b"\x7fELF".to_vec();
    out.extend([2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    out.extend(2u16.to_le_bytes());
    out.extend(62u16.to_le_bytes());
    out.extend(1u32.to_le_bytes());
    out.extend(EXEC_TEXT.to_le_bytes());
    out.extend(64u64.to_le_bytes());
    out.extend((shoff as u64).to_le_bytes());
    out.extend(0u32.to_le_bytes());
    for half in [64u16, 56, 1, 64, 5, 4] {
        out.extend(half.to_le_bytes());
    }
    assert_eq!(out.len(), 64);

    out.extend(1u32.to_le_bytes());
    out.extend(5u32.to_le_bytes());
    for word in [0, EXEC_BASE, EXEC_BASE, load_size, load_size, 0x1000] {
        out.extend(word.to_le_bytes());
    }

    out.resize(dynstr_off, 0);
    out.extend(&dynstr);
    out.resize(dynsym_off, 0);
    out.extend(&dynsym);
    out.resize(text_off, 0);
    out.extend(&text);
    out.extend(&shstrtab);
    out.resize(shoff, 0);

    out.extend([0u8; 64]);
    push_section_header(&mut out, 1, 1, 0x6, text_off, text.len(), 0, 0, 16, 0);
    push_section_header(&mut out, 7, 11, 0x2, dynsym_off, dynsym.len(), 3, 1, 8, 24);
    push_section_header(&mut out, 15, 3, 0x2, dynstr_off, dynstr.len(), 0, 0, 1, 0);
    push_section_header(&mut out, 23, 3, 0, shstrtab_off, shstrtab.len(), 0, 0, 1, 0);
    out
}
