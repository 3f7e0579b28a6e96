//! Error classifier
//!
//! The instrument reports problems through a non-zero status byte (`STB?`); the actual
//! code is then read with `ERROR?`. Codes 1, 2, 3 and 8 come from motion/command
//! handling, 6, 7 and 9 from accessory and label handling. 4 and 5 are undocumented.

/// One documented error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEntry {
    pub code: u32,
    pub description: &'static str,
}

/// Description returned for codes the table does not cover.
pub const UNKNOWN_ERROR: &str = "n/a";

/// Indexed by code.
pub static ERROR_TABLE: [ErrorEntry; 10] = [
    ErrorEntry { code: 0, description: "System error" },
    ErrorEntry { code: 1, description: "Command not understood" },
    ErrorEntry { code: 2, description: "Bad parameter used in Command" },
    ErrorEntry { code: 3, description: "Destination position for wavelength motion not allowed." },
    ErrorEntry { code: 4, description: UNKNOWN_ERROR },
    ErrorEntry { code: 5, description: UNKNOWN_ERROR },
    ErrorEntry { code: 6, description: "Accessory not present (usually filter wheel)" },
    ErrorEntry { code: 7, description: "Accessory already in specified pos" },
    ErrorEntry { code: 8, description: "Could not home wavelength drive" },
    ErrorEntry { code: 9, description: "Label too long" },
];

/// Never fails: unknown codes map to `"n/a"`.
pub fn classify(code: u32) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|index| ERROR_TABLE.get(index))
        .map_or(UNKNOWN_ERROR, |entry| entry.description)
}
