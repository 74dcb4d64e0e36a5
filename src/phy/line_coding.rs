// 8b/10b line coding
//
// Every byte maps to a 10-bit codeword with at most one bit of disparity
// (weight 4..=6), internal runs of at most three equal symbols and edge runs
// of at most two, so back-to-back codewords never hold a level for more than
// four bit periods. Codewords are sent LSB first.

/// Bits per codeword
pub const CODEWORD_BITS: usize = 10;

const MAX_RUN: u32 = 3;
const MAX_EDGE_RUN: u32 = 2;
const INVALID: i16 = -1;

pub static ENCODE_TABLE: [u16; 256] = build_encode_table();
static DECODE_TABLE: [i16; 1 << CODEWORD_BITS] = build_decode_table();

const fn longest_run(code: u16) -> u32 {
    let mut longest = 1;
    let mut run = 1;
    let mut i = 1;
    while i < CODEWORD_BITS {
        if (code >> i) & 1 == (code >> (i - 1)) & 1 {
            run += 1;
            if run > longest {
                longest = run;
            }
        } else {
            run = 1;
        }
        i += 1;
    }
    longest
}

const fn edge_run(code: u16, from_msb: bool) -> u32 {
    let mut run = 1;
    while run < CODEWORD_BITS as u32 {
        let (a, b) = if from_msb {
            (CODEWORD_BITS as u32 - 1, CODEWORD_BITS as u32 - 1 - run)
        } else {
            (0, run)
        };
        if (code >> a) & 1 != (code >> b) & 1 {
            break;
        }
        run += 1;
    }
    run
}

const fn is_candidate(code: u16) -> bool {
    longest_run(code) <= MAX_RUN
        && edge_run(code, false) <= MAX_EDGE_RUN
        && edge_run(code, true) <= MAX_EDGE_RUN
}

const fn build_encode_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut filled = 0;

    // Balanced codewords first, then the ones with a single bit of disparity
    let mut pass = 0;
    while pass < 2 {
        let mut code: u16 = 0;
        while code < (1 << CODEWORD_BITS) && filled < 256 {
            let weight = code.count_ones();
            let wanted = if pass == 0 {
                weight == 5
            } else {
                weight == 4 || weight == 6
            };
            if wanted && is_candidate(code) {
                table[filled] = code;
                filled += 1;
            }
            code += 1;
        }
        pass += 1;
    }

    if filled < 256 {
        panic!("not enough codewords for an 8b/10b table");
    }
    table
}

const fn build_decode_table() -> [i16; 1 << CODEWORD_BITS] {
    let encode = build_encode_table();
    let mut table = [INVALID; 1 << CODEWORD_BITS];
    let mut byte = 0;
    while byte < 256 {
        table[encode[byte] as usize] = byte as i16;
        byte += 1;
    }
    table
}

pub fn encode(byte: u8) -> u16 {
    ENCODE_TABLE[byte as usize]
}

/// `None` for codewords outside the table.
pub fn decode(code: u16) -> Option<u8> {
    match DECODE_TABLE.get(code as usize) {
        Some(&value) if value != INVALID => Some(value as u8),
        _ => None,
    }
}

/// Codeword bits of `byte` in transmission order (LSB first).
pub fn codeword_bits(byte: u8) -> impl Iterator<Item = bool> {
    let code = encode(byte);
    (0..CODEWORD_BITS).map(move |i| (code >> i) & 1 == 1)
}
