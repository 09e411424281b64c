//! Partial fingerprints ("part hashes").
//!
//! A fingerprint samples `L` instructions spread evenly over a function and
//! reduces each to a token that ignores addresses and large constants, so the
//! same code compiled at a different location still produces the same tokens.

use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::model::{Function, Instruction, Operand};

/// Immediates at or above this magnitude are treated as addresses.
pub const ADDRESS_LIKE_IMMEDIATE: u64 = 0x1000;

/// Ordered token sequence for one function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    tokens: Vec<u64>,
}

impl Fingerprint {
    pub fn from_tokens(tokens: Vec<u64>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &[u64] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of positions holding the same token. Zero for different lengths.
    pub fn match_count(&self, other: &Fingerprint) -> usize {
        if self.tokens.len() != other.tokens.len() {
            return 0;
        }
        self.tokens.iter().zip(&other.tokens).filter(|(a, b)| a == b).count()
    }

    /// Fraction of matching positions, in `[0, 1]`.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        if self.tokens.is_empty() || self.tokens.len() != other.tokens.len() {
            return 0.0;
        }
        self.match_count(other) as f64 / self.tokens.len() as f64
    }
}

/// Indices of the instructions sampled from a function of `n` instructions.
///
/// `floor(i * n / len)` for `i in 0..len`; every index when `n < len`.
pub fn sample_indices(n: usize, len: usize) -> Vec<usize> {
    if n < len {
        return (0..n).collect();
    }
    (0..len).map(|i| i * n / len).collect()
}

/// Address-independent text of one instruction.
pub fn token_text(insn: &Instruction) -> String {
    let mut text = insn.mnemonic.clone();
    for op in &insn.operands {
        text.push(' ');
        match op {
            Operand::Register => text.push('r'),
            Operand::Immediate(v) => {
                if insn.is_branch || v.unsigned_abs() >= ADDRESS_LIKE_IMMEDIATE {
                    text.push('i');
                } else {
                    let _ = write!(text, "i:{v}");
                }
            }
            Operand::Memory { has_base, has_index, .. } => {
                text.push('m');
                if *has_base {
                    text.push('b');
                }
                if *has_index {
                    text.push('i');
                }
            }
            Operand::Other => text.push('o'),
        }
    }
    text
}

/// Token of one instruction: the first 8 bytes of SHA-256 over its text.
pub fn instruction_token(insn: &Instruction) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(token_text(insn).as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

/// Computes fingerprints of a fixed target length.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintEngine {
    part_hash_len: usize,
}

impl FingerprintEngine {
    pub fn new(part_hash_len: usize) -> Self {
        Self { part_hash_len }
    }

    pub fn part_hash_len(&self) -> usize {
        self.part_hash_len
    }

    pub fn fingerprint(&self, function: &Function) -> Fingerprint {
        let tokens = sample_indices(function.instructions.len(), self.part_hash_len)
            .into_iter()
            .map(|idx| instruction_token(&function.instructions[idx]))
            .collect();
        Fingerprint { tokens }
    }
}
