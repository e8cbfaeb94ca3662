//! x86-64 opcode stubs used as patch payloads.

pub const RET: &[u8] = &[0xC3];
pub const INT3: u8 = 0xCC;

/// `mov al, 1; ret`
pub const RET_TRUE: &[u8] = &[0xB0, 0x01, 0xC3];
/// `xor eax, eax; ret`
pub const RET_FALSE: &[u8] = &[0x31, 0xC0, 0xC3];

/// Recommended multi-byte NOP encodings, indexed by `length - 1`.
pub const NOPS: [&[u8]; 9] = [
    &[0x90],
    &[0x66, 0x90],
    &[0x0F, 0x1F, 0x00],
    &[0x0F, 0x1F, 0x40, 0x00],
    &[0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    &[0x0F, 0x1F, 0x80, 0x00, 0x00, 0x00, 0x00],
    &[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
    &[0x66, 0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
];

pub const MAX_NOP_LEN: usize = NOPS.len();

/// `mov eax, imm32; ret`
pub fn return_value(value: u32) -> [u8; 6] {
    let imm = value.to_le_bytes();
    [0xB8, imm[0], imm[1], imm[2], imm[3], 0xC3]
}

/// `jmp rel8`, relative to the end of the 2-byte instruction.
pub fn jmp_short(rel: i8) -> [u8; 2] {
    [0xEB, rel as u8]
}

/// Fill exactly `count` bytes with as few NOP instructions as possible.
pub fn optimal_nops(count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    let mut remaining = count;
    while remaining > 0 {
        let len = remaining.min(MAX_NOP_LEN);
        out.extend_from_slice(NOPS[len - 1]);
        remaining -= len;
    }
    out
}

/// `payload` followed by zero bytes up to `width`. `None` if it does not fit.
pub fn zero_padded(payload: &[u8], width: usize) -> Option<Vec<u8>> {
    if payload.len() > width {
        return None;
    }
    let mut out = payload.to_vec();
    out.resize(width, 0);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nop_table_lengths() {
        for (i, nop) in NOPS.iter().enumerate() {
            assert_eq!(nop.len(), i + 1);
        }
    }

    #[test]
    fn test_return_value_encoding() {
        assert_eq!(return_value(1), [0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3]);
        assert_eq!(return_value(0xDEADBEEF), [0xB8, 0xEF, 0xBE, 0xAD, 0xDE, 0xC3]);
    }

    #[test]
    fn test_jmp_short_negative() {
        assert_eq!(jmp_short(-2), [0xEB, 0xFE]);
        assert_eq!(jmp_short(0x10), [0xEB, 0x10]);
    }

    #[test]
    fn test_optimal_nops_greedy() {
        assert!(optimal_nops(0).is_empty());
        assert_eq!(optimal_nops(3), NOPS[2]);

        let twenty = optimal_nops(20);
        assert_eq!(twenty.len(), 20);
        assert_eq!(&twenty[..9], NOPS[8]);
        assert_eq!(&twenty[9..18], NOPS[8]);
        assert_eq!(&twenty[18..], NOPS[1]);
    }

    #[test]
    fn test_zero_padded() {
        assert_eq!(zero_padded(RET, 4), Some(vec![0xC3, 0, 0, 0]));
        assert_eq!(zero_padded(&return_value(1), 5), None);
    }
}
