//! CRC-32 and SHA-256 checksums for cache verification.
//!
//! The CRC-32 (IEEE 802.3, reflected polynomial `0xEDB88320`) uses a
//! slice-by-16 table algorithm: sixteen 256-entry tables are built at compile
//! time so that sixteen input bytes are folded into the running CRC per loop
//! iteration. SHA-256 is used for whole-file identity of manifest files.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Reflected CRC-32 polynomial.
const POLYNOMIAL: u32 = 0xEDB8_8320;

/// Number of bytes consumed per slice-by-16 iteration.
const SLICE: usize = 16;

static TABLES: [[u32; 256]; SLICE] = build_tables();

const fn build_tables() -> [[u32; 256]; SLICE] {
    let mut tables = [[0u32; 256]; SLICE];

    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        tables[0][i] = crc;
        i += 1;
    }

    let mut i = 0;
    while i < 256 {
        let mut slice = 1;
        while slice < SLICE {
            let prev = tables[slice - 1][i];
            tables[slice][i] = (prev >> 8) ^ tables[0][(prev & 0xFF) as usize];
            slice += 1;
        }
        i += 1;
    }

    tables
}

#[inline]
fn word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn update_crc(mut crc: u32, mut data: &[u8]) -> u32 {
    let t = &TABLES;

    while data.len() >= SLICE {
        let one = word(&data[0..4]) ^ crc;
        let two = word(&data[4..8]);
        let three = word(&data[8..12]);
        let four = word(&data[12..16]);

        crc = t[15][(one & 0xFF) as usize]
            ^ t[14][((one >> 8) & 0xFF) as usize]
            ^ t[13][((one >> 16) & 0xFF) as usize]
            ^ t[12][(one >> 24) as usize]
            ^ t[11][(two & 0xFF) as usize]
            ^ t[10][((two >> 8) & 0xFF) as usize]
            ^ t[9][((two >> 16) & 0xFF) as usize]
            ^ t[8][(two >> 24) as usize]
            ^ t[7][(three & 0xFF) as usize]
            ^ t[6][((three >> 8) & 0xFF) as usize]
            ^ t[5][((three >> 16) & 0xFF) as usize]
            ^ t[4][(three >> 24) as usize]
            ^ t[3][(four & 0xFF) as usize]
            ^ t[2][((four >> 8) & 0xFF) as usize]
            ^ t[1][((four >> 16) & 0xFF) as usize]
            ^ t[0][(four >> 24) as usize];

        data = &data[SLICE..];
    }

    for &byte in data {
        crc = (crc >> 8) ^ t[0][((crc ^ byte as u32) & 0xFF) as usize];
    }

    crc
}

/// Incremental CRC-32 hasher.
#[derive(Debug, Clone)]
pub struct Crc32 {
    state: u32,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Create a hasher with the standard initial value.
    pub fn new() -> Self {
        Self { state: !0 }
    }

    /// Fold more bytes into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.state = update_crc(self.state, data);
    }

    /// The CRC of all bytes seen so far.
    pub fn finalize(&self) -> u32 {
        !self.state
    }
}

/// CRC-32 of a byte slice.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC-32 of a file, streamed in 64KB blocks.
pub fn file_crc32(path: &Path) -> io::Result<u32> {
    let mut file = File::open(path)?;
    let mut hasher = Crc32::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Render a CRC the way manifests and info files store it.
pub fn format_crc(crc: u32) -> String {
    format!("{:08x}", crc)
}

/// Compare a stored CRC string against a computed value.
///
/// The stored string is parsed as hexadecimal, so case and surrounding
/// whitespace are irrelevant. Unparseable strings never match.
pub fn crc_matches(expected: &str, actual: u32) -> bool {
    u32::from_str_radix(expected.trim(), 16)
        .map(|value| value == actual)
        .unwrap_or(false)
}

/// Lowercase hex SHA-256 of a byte buffer.
pub fn bytes_sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Lowercase hex SHA-256 of a file.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
