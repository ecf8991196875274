//! `Legacy_Auth`, the DES based password hash of Firebird 2.x.
use bytes::Bytes;

use super::{AuthError, AuthPlugin, AuthStatus, Credentials};

/// Plugin name.
pub const LEGACY_AUTH: &str = "Legacy_Auth";

/// Salt used by every legacy hash.
const SALT: &[u8; 2] = b"9z";

const ROUNDS: usize = 25;

const ALPHABET: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

const IP: [u8; 64] = [
    58, 50, 42, 34, 26, 18, 10, 2, 60, 52, 44, 36, 28, 20, 12, 4,
    62, 54, 46, 38, 30, 22, 14, 6, 64, 56, 48, 40, 32, 24, 16, 8,
    57, 49, 41, 33, 25, 17, 9, 1, 59, 51, 43, 35, 27, 19, 11, 3,
    61, 53, 45, 37, 29, 21, 13, 5, 63, 55, 47, 39, 31, 23, 15, 7,
];

const FP: [u8; 64] = [
    40, 8, 48, 16, 56, 24, 64, 32, 39, 7, 47, 15, 55, 23, 63, 31,
    38, 6, 46, 14, 54, 22, 62, 30, 37, 5, 45, 13, 53, 21, 61, 29,
    36, 4, 44, 12, 52, 20, 60, 28, 35, 3, 43, 11, 51, 19, 59, 27,
    34, 2, 42, 10, 50, 18, 58, 26, 33, 1, 41, 9, 49, 17, 57, 25,
];

const E: [u8; 48] = [
    32, 1, 2, 3, 4, 5, 4, 5, 6, 7, 8, 9, 8, 9, 10, 11,
    12, 13, 12, 13, 14, 15, 16, 17, 16, 17, 18, 19, 20, 21, 20, 21,
    22, 23, 24, 25, 24, 25, 26, 27, 28, 29, 28, 29, 30, 31, 32, 1,
];

const P: [u8; 32] = [
    16, 7, 20, 21, 29, 12, 28, 17, 1, 15, 23, 26, 5, 18, 31, 10,
    2, 8, 24, 14, 32, 27, 3, 9, 19, 13, 30, 6, 22, 11, 4, 25,
];

const PC1: [u8; 56] = [
    57, 49, 41, 33, 25, 17, 9, 1, 58, 50, 42, 34, 26, 18,
    10, 2, 59, 51, 43, 35, 27, 19, 11, 3, 60, 52, 44, 36,
    63, 55, 47, 39, 31, 23, 15, 7, 62, 54, 46, 38, 30, 22,
    14, 6, 61, 53, 45, 37, 29, 21, 13, 5, 28, 20, 12, 4,
];

const PC2: [u8; 48] = [
    14, 17, 11, 24, 1, 5, 3, 28, 15, 6, 21, 10,
    23, 19, 12, 4, 26, 8, 16, 7, 27, 20, 13, 2,
    41, 52, 31, 37, 47, 55, 30, 40, 51, 45, 33, 48,
    44, 49, 39, 56, 34, 53, 46, 42, 50, 36, 29, 32,
];

const SHIFTS: [u32; 16] = [1, 1, 2, 2, 2, 2, 2, 2, 1, 2, 2, 2, 2, 2, 2, 1];

const S: [[u8; 64]; 8] = [
    [
        14, 4, 13, 1, 2, 15, 11, 8, 3, 10, 6, 12, 5, 9, 0, 7,
        0, 15, 7, 4, 14, 2, 13, 1, 10, 6, 12, 11, 9, 5, 3, 8,
        4, 1, 14, 8, 13, 6, 2, 11, 15, 12, 9, 7, 3, 10, 5, 0,
        15, 12, 8, 2, 4, 9, 1, 7, 5, 11, 3, 14, 10, 0, 6, 13,
    ],
    [
        15, 1, 8, 14, 6, 11, 3, 4, 9, 7, 2, 13, 12, 0, 5, 10,
        3, 13, 4, 7, 15, 2, 8, 14, 12, 0, 1, 10, 6, 9, 11, 5,
        0, 14, 7, 11, 10, 4, 13, 1, 5, 8, 12, 6, 9, 3, 2, 15,
        13, 8, 10, 1, 3, 15, 4, 2, 11, 6, 7, 12, 0, 5, 14, 9,
    ],
    [
        10, 0, 9, 14, 6, 3, 15, 5, 1, 13, 12, 7, 11, 4, 2, 8,
        13, 7, 0, 9, 3, 4, 6, 10, 2, 8, 5, 14, 12, 11, 15, 1,
        13, 6, 4, 9, 8, 15, 3, 0, 11, 1, 2, 12, 5, 10, 14, 7,
        1, 10, 13, 0, 6, 9, 8, 7, 4, 15, 14, 3, 11, 5, 2, 12,
    ],
    [
        7, 13, 14, 3, 0, 6, 9, 10, 1, 2, 8, 5, 11, 12, 4, 15,
        13, 8, 11, 5, 6, 15, 0, 3, 4, 7, 2, 12, 1, 10, 14, 9,
        10, 6, 9, 0, 12, 11, 7, 13, 15, 1, 3, 14, 5, 2, 8, 4,
        3, 15, 0, 6, 10, 1, 13, 8, 9, 4, 5, 11, 12, 7, 2, 14,
    ],
    [
        2, 12, 4, 1, 7, 10, 11, 6, 8, 5, 3, 15, 13, 0, 14, 9,
        14, 11, 2, 12, 4, 7, 13, 1, 5, 0, 15, 10, 3, 9, 8, 6,
        4, 2, 1, 11, 10, 13, 7, 8, 15, 9, 12, 5, 6, 3, 0, 14,
        11, 8, 12, 7, 1, 14, 2, 13, 6, 15, 0, 9, 10, 4, 5, 3,
    ],
    [
        12, 1, 10, 15, 9, 2, 6, 8, 0, 13, 3, 4, 14, 7, 5, 11,
        10, 15, 4, 2, 7, 12, 9, 5, 6, 1, 13, 14, 0, 11, 3, 8,
        9, 14, 15, 5, 2, 8, 12, 3, 7, 0, 4, 10, 1, 13, 11, 6,
        4, 3, 2, 12, 9, 5, 15, 10, 11, 14, 1, 7, 6, 0, 8, 13,
    ],
    [
        4, 11, 2, 14, 15, 0, 8, 13, 3, 12, 9, 7, 5, 10, 6, 1,
        13, 0, 11, 7, 4, 9, 1, 10, 14, 3, 5, 12, 2, 15, 8, 6,
        1, 4, 11, 13, 12, 3, 7, 14, 10, 15, 6, 8, 0, 5, 9, 2,
        6, 11, 13, 8, 1, 4, 10, 7, 9, 5, 0, 15, 14, 2, 3, 12,
    ],
    [
        13, 2, 8, 4, 6, 15, 11, 1, 10, 9, 3, 14, 5, 0, 12, 7,
        1, 15, 13, 8, 10, 3, 7, 4, 12, 5, 6, 11, 0, 14, 9, 2,
        7, 11, 4, 1, 9, 12, 14, 2, 0, 6, 10, 13, 15, 3, 5, 8,
        2, 1, 14, 7, 4, 10, 8, 13, 15, 12, 9, 0, 3, 5, 6, 11,
    ],
];

/// Pick bits of `input`, one-based from the most significant of `width` bits.
fn permute(input: u64, table: &[u8], width: u32) -> u64 {
    table
        .iter()
        .fold(0, |out, &pos| (out << 1) | ((input >> (width - u32::from(pos))) & 1))
}

fn subkeys(key: u64) -> [u64; 16] {
    const MASK: u64 = 0x0FFF_FFFF;

    let cd = permute(key, &PC1, 64);
    let (mut c, mut d) = (cd >> 28, cd & MASK);
    let mut keys = [0; 16];
    for (key, shift) in keys.iter_mut().zip(SHIFTS) {
        c = ((c << shift) | (c >> (28 - shift))) & MASK;
        d = ((d << shift) | (d >> (28 - shift))) & MASK;
        *key = permute((c << 28) | d, &PC2, 56);
    }
    keys
}

fn feistel(r: u64, key: u64, salt: u32) -> u64 {
    let mut e = permute(r, &E, 32);

    // each salt bit swaps expansion outputs i and i + 24
    for i in 0..12 {
        if salt >> i & 1 == 1 {
            let (a, b) = (47 - i, 23 - i);
            if (e >> a & 1) != (e >> b & 1) {
                e ^= (1 << a) | (1 << b);
            }
        }
    }

    let x = e ^ key;
    let mut out = 0;
    for (i, sbox) in S.iter().enumerate() {
        let six = (x >> (42 - 6 * i)) & 0x3F;
        let row = ((six >> 4) & 2) | (six & 1);
        let col = (six >> 1) & 0xF;
        out = (out << 4) | u64::from(sbox[(row * 16 + col) as usize]);
    }
    permute(out, &P, 32)
}

fn alphabet_index(c: u8) -> u32 {
    ALPHABET.iter().position(|&a| a == c).unwrap_or(0) as u32
}

/// Traditional `crypt(3)`, returns the 11 characters after the salt.
pub fn crypt(password: &[u8], salt: &[u8; 2]) -> [u8; 11] {
    let key = (0..8).fold(0u64, |key, i| {
        let c = password.get(i).copied().unwrap_or(0);
        (key << 8) | u64::from(c << 1)
    });
    let keys = subkeys(key);
    let salt = alphabet_index(salt[0]) | alphabet_index(salt[1]) << 6;

    let mut block = 0u64;
    for _ in 0..ROUNDS {
        let b = permute(block, &IP, 64);
        let (mut l, mut r) = (b >> 32, b & 0xFFFF_FFFF);
        for &k in &keys {
            (l, r) = (r, l ^ feistel(r, k, salt));
        }
        block = permute((r << 32) | l, &FP, 64);
    }

    // 64 bits padded to 66, six bits per character
    let wide = u128::from(block) << 2;
    let mut out = [0u8; 11];
    for (i, c) in out.iter_mut().enumerate() {
        *c = ALPHABET[((wide >> (60 - 6 * i)) & 0x3F) as usize];
    }
    out
}

/// Firebird legacy password hash.
pub fn legacy_hash(password: &str) -> [u8; 11] {
    crypt(password.as_bytes(), SALT)
}

/// `Legacy_Auth` plugin, sends the legacy hash as client data.
#[derive(Debug, Default)]
pub struct LegacyAuth {
    client_data: Option<Bytes>,
    server_data: Option<Bytes>,
}

impl AuthPlugin for LegacyAuth {
    fn name(&self) -> &'static str {
        LEGACY_AUTH
    }

    fn authenticate(&mut self, credentials: &Credentials) -> Result<AuthStatus, AuthError> {
        if self.client_data.is_some() {
            return Ok(AuthStatus::AuthSuccess);
        }
        let Some(password) = credentials.password() else {
            return Ok(AuthStatus::AuthContinue);
        };
        self.client_data = Some(Bytes::copy_from_slice(&legacy_hash(password)));
        Ok(AuthStatus::AuthSuccess)
    }

    fn client_data(&self) -> Option<&[u8]> {
        self.client_data.as_deref()
    }

    fn set_server_data(&mut self, data: Bytes) {
        self.server_data = Some(data);
    }

    fn has_server_data(&self) -> bool {
        self.server_data.as_ref().is_some_and(|d| !d.is_empty())
    }

    fn session_key(&self) -> Option<&[u8]> {
        None
    }
}
