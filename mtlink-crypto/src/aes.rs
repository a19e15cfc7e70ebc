//! AES block engine (FIPS-197), table driven.
//!
//! Rounds are computed with four 256-entry lookup tables per direction that
//! fold SubBytes, ShiftRows and (Inv)MixColumns into one word lookup per
//! state byte. Decryption uses the equivalent inverse cipher: the round keys
//! are run through InvMixColumns once in [`Aes::new`], so both directions
//! share the same round loop shape.
//!
//! All tables are generated at compile time from the field arithmetic.

use std::fmt;

/// Block size in bytes.
pub const BLOCK_LEN: usize = 16;

const MAX_ROUND_KEY_WORDS: usize = 4 * (14 + 1);

/// Multiply by `x` in GF(2^8) modulo `x^8 + x^4 + x^3 + x + 1`.
const fn xtime(x: u8) -> u8 {
    (x << 1) ^ if x & 0x80 != 0 { 0x1b } else { 0 }
}

const fn gmul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        a = xtime(a);
        b >>= 1;
    }
    product
}

/// Forward S-box, built by walking the multiplicative group with generator 3
/// and applying the affine transform to each inverse.
const fn build_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    let mut p: u8 = 1;
    let mut q: u8 = 1;
    loop {
        // p *= 3
        p ^= xtime(p);
        // q /= 3
        q ^= q << 1;
        q ^= q << 2;
        q ^= q << 4;
        if q & 0x80 != 0 {
            q ^= 0x09;
        }
        let affine = q
            ^ q.rotate_left(1)
            ^ q.rotate_left(2)
            ^ q.rotate_left(3)
            ^ q.rotate_left(4);
        sbox[p as usize] = affine ^ 0x63;
        if p == 1 {
            break;
        }
    }
    sbox[0] = 0x63;
    sbox
}

const fn invert(sbox: &[u8; 256]) -> [u8; 256] {
    let mut inv = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inv[sbox[i] as usize] = i as u8;
        i += 1;
    }
    inv
}

const fn word(b0: u8, b1: u8, b2: u8, b3: u8) -> u32 {
    (b0 as u32) << 24 | (b1 as u32) << 16 | (b2 as u32) << 8 | b3 as u32
}

/// `table[0]` holds the column for the byte in row 0; `table[n]` is the same
/// column rotated right by `8 * n` bits.
const fn build_rounds(sbox: &[u8; 256], mix: [u8; 4]) -> [[u32; 256]; 4] {
    let mut t = [[0u32; 256]; 4];
    let mut i = 0;
    while i < 256 {
        let s = sbox[i];
        let w = word(gmul(s, mix[0]), gmul(s, mix[1]), gmul(s, mix[2]), gmul(s, mix[3]));
        t[0][i] = w;
        t[1][i] = w.rotate_right(8);
        t[2][i] = w.rotate_right(16);
        t[3][i] = w.rotate_right(24);
        i += 1;
    }
    t
}

const SBOX: [u8; 256] = build_sbox();
const INV_SBOX: [u8; 256] = invert(&SBOX);
const TE: [[u32; 256]; 4] = build_rounds(&SBOX, [2, 1, 1, 3]);
const TD: [[u32; 256]; 4] = build_rounds(&INV_SBOX, [14, 9, 13, 11]);

const RCON: [u8; 10] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1b, 0x36];

/// The key passed to [`Aes::new`] was not 16, 24 or 32 bytes long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyLengthError {
    /// Length that was supplied.
    pub len: usize,
}

impl fmt::Display for KeyLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid AES key length {} (expected 16, 24 or 32)", self.len)
    }
}

impl std::error::Error for KeyLengthError {}

fn sub_word(w: u32) -> u32 {
    let b = w.to_be_bytes();
    word(SBOX[b[0] as usize], SBOX[b[1] as usize], SBOX[b[2] as usize], SBOX[b[3] as usize])
}

/// InvMixColumns of one round-key word, reusing the decryption tables.
fn inv_mix_word(w: u32) -> u32 {
    let b = w.to_be_bytes();
    TD[0][SBOX[b[0] as usize] as usize]
        ^ TD[1][SBOX[b[1] as usize] as usize]
        ^ TD[2][SBOX[b[2] as usize] as usize]
        ^ TD[3][SBOX[b[3] as usize] as usize]
}

/// An expanded AES key bound to one direction.
#[derive(Clone)]
pub struct Aes {
    round_keys: [u32; MAX_ROUND_KEY_WORDS],
    rounds: usize,
    for_encryption: bool,
}

impl Aes {
    /// Expand a 128, 192 or 256-bit key into 10, 12 or 14 rounds.
    ///
    /// With `for_encryption == false` the schedule is reversed and
    /// pre-transformed for the equivalent inverse cipher.
    pub fn new(key: &[u8], for_encryption: bool) -> Result<Self, KeyLengthError> {
        let nk = match key.len() {
            16 | 24 | 32 => key.len() / 4,
            len => return Err(KeyLengthError { len }),
        };
        let rounds = nk + 6;
        let total = 4 * (rounds + 1);

        let mut w = [0u32; MAX_ROUND_KEY_WORDS];
        for (dst, chunk) in w.iter_mut().zip(key.chunks_exact(4)) {
            *dst = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        for i in nk..total {
            let mut temp = w[i - 1];
            if i % nk == 0 {
                temp = sub_word(temp.rotate_left(8)) ^ (u32::from(RCON[i / nk - 1]) << 24);
            } else if nk > 6 && i % nk == 4 {
                temp = sub_word(temp);
            }
            w[i] = w[i - nk] ^ temp;
        }

        if !for_encryption {
            let mut d = [0u32; MAX_ROUND_KEY_WORDS];
            for round in 0..=rounds {
                let src = &w[4 * (rounds - round)..4 * (rounds - round) + 4];
                for (col, &k) in src.iter().enumerate() {
                    d[4 * round + col] = if round == 0 || round == rounds { k } else { inv_mix_word(k) };
                }
            }
            w = d;
        }

        Ok(Self { round_keys: w, rounds, for_encryption })
    }

    /// Number of rounds: 10, 12 or 14.
    pub fn rounds(&self) -> usize { self.rounds }

    /// Whether this schedule encrypts (`true`) or decrypts.
    pub fn is_encryption(&self) -> bool { self.for_encryption }

    /// Encrypt or decrypt exactly one block.
    pub fn process_block(&self, input: &[u8; BLOCK_LEN]) -> [u8; BLOCK_LEN] {
        let mut block = *input;
        self.process_block_in_place(&mut block);
        block
    }

    /// Like [`Aes::process_block`] but overwrites `block`.
    pub fn process_block_in_place(&self, block: &mut [u8; BLOCK_LEN]) {
        let mut s = [0u32; 4];
        for (i, col) in s.iter_mut().enumerate() {
            *col = u32::from_be_bytes([block[4 * i], block[4 * i + 1], block[4 * i + 2], block[4 * i + 3]])
                ^ self.round_keys[i];
        }

        let out = if self.for_encryption { self.encrypt_rounds(s) } else { self.decrypt_rounds(s) };

        for (i, col) in out.iter().enumerate() {
            block[4 * i..4 * i + 4].copy_from_slice(&col.to_be_bytes());
        }
    }

    fn encrypt_rounds(&self, mut s: [u32; 4]) -> [u32; 4] {
        let rk = &self.round_keys;
        let b = |w: u32, n: u32| ((w >> n) & 0xff) as usize;

        for round in 1..self.rounds {
            let k = &rk[4 * round..4 * round + 4];
            let mut t = [0u32; 4];
            for c in 0..4 {
                t[c] = TE[0][b(s[c], 24)]
                    ^ TE[1][b(s[(c + 1) % 4], 16)]
                    ^ TE[2][b(s[(c + 2) % 4], 8)]
                    ^ TE[3][b(s[(c + 3) % 4], 0)]
                    ^ k[c];
            }
            s = t;
        }

        let k = &rk[4 * self.rounds..4 * self.rounds + 4];
        let mut out = [0u32; 4];
        for c in 0..4 {
            out[c] = word(
                SBOX[b(s[c], 24)],
                SBOX[b(s[(c + 1) % 4], 16)],
                SBOX[b(s[(c + 2) % 4], 8)],
                SBOX[b(s[(c + 3) % 4], 0)],
            ) ^ k[c];
        }
        out
    }

    fn decrypt_rounds(&self, mut s: [u32; 4]) -> [u32; 4] {
        let rk = &self.round_keys;
        let b = |w: u32, n: u32| ((w >> n) & 0xff) as usize;

        for round in 1..self.rounds {
            let k = &rk[4 * round..4 * round + 4];
            let mut t = [0u32; 4];
            for c in 0..4 {
                t[c] = TD[0][b(s[c], 24)]
                    ^ TD[1][b(s[(c + 3) % 4], 16)]
                    ^ TD[2][b(s[(c + 2) % 4], 8)]
                    ^ TD[3][b(s[(c + 1) % 4], 0)]
                    ^ k[c];
            }
            s = t;
        }

        let k = &rk[4 * self.rounds..4 * self.rounds + 4];
        let mut out = [0u32; 4];
        for c in 0..4 {
            out[c] = word(
                INV_SBOX[b(s[c], 24)],
                INV_SBOX[b(s[(c + 3) % 4], 16)],
                INV_SBOX[b(s[(c + 2) % 4], 8)],
                INV_SBOX[b(s[(c + 1) % 4], 0)],
            ) ^ k[c];
        }
        out
    }
}

impl fmt::Debug for Aes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aes")
            .field("rounds", &self.rounds)
            .field("for_encryption", &self.for_encryption)
            .finish_non_exhaustive()
    }
}
