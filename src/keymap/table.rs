//! Scancode <-> character table for the active console layout

use std::collections::HashMap;

use thiserror::Error;

use crate::common::constants::keymap::{K_HOLE, KT_LATIN, KT_LETTER, TABLE_END, TABLE_START};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("table start marker 'plain_map' not found")]
    MissingStart,
    #[error("table is not terminated by '}};'")]
    MissingEnd,
    #[error("invalid table entry '{token}' on line {line}")]
    InvalidToken { token: String, line: usize },
    #[error("table has {found} entries, expected {expected}")]
    WrongLength { found: usize, expected: usize },
}

/// Immutable keysym table plus its derived reverse index
#[derive(Debug, Clone)]
pub struct KeymapTable {
    syms: Box<[u16]>,
    reverse: HashMap<char, u16>,
}

impl KeymapTable {
    /// Build the table from raw keysyms indexed by scancode
    pub fn from_syms(syms: Vec<u16>) -> Self {
        let mut reverse = HashMap::new();
        for (scancode, &sym) in syms.iter().enumerate() {
            if let Some(ch) = sym_to_char(sym) {
                // Lowest scancode wins when a character appears twice (e.g. keypad digits)
                reverse.entry(ch).or_insert(scancode as u16);
            }
        }
        Self {
            syms: syms.into_boxed_slice(),
            reverse,
        }
    }

    /// Parse `loadkeys --mktable` output, requiring exactly `expected` entries
    pub fn parse(output: &str, expected: usize) -> Result<Self, TableError> {
        let mut lines = output.lines().enumerate();

        lines
            .by_ref()
            .find(|(_, line)| line.contains(TABLE_START) && line.contains('{'))
            .ok_or(TableError::MissingStart)?;

        let mut syms = Vec::with_capacity(expected);
        let mut terminated = false;

        for (index, line) in lines {
            let (body, closing) = match line.find(TABLE_END) {
                Some(pos) => (&line[..pos], true),
                None => (line, false),
            };

            for token in body
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
            {
                let sym = parse_integer(token).ok_or_else(|| TableError::InvalidToken {
                    token: token.to_string(),
                    line: index + 1,
                })?;
                syms.push(sym);
            }

            if closing {
                terminated = true;
                break;
            }
        }

        if !terminated {
            return Err(TableError::MissingEnd);
        }
        if syms.len() != expected {
            return Err(TableError::WrongLength {
                found: syms.len(),
                expected,
            });
        }

        Ok(Self::from_syms(syms))
    }

    pub fn len(&self) -> usize {
        self.syms.len()
    }

    /// Raw keysym for a scancode
    pub fn sym(&self, scancode: u16) -> Option<u16> {
        self.syms.get(usize::from(scancode)).copied()
    }

    /// Character produced by a scancode in the unshifted layer
    pub fn char_for(&self, scancode: u16) -> Option<char> {
        self.sym(scancode).and_then(sym_to_char)
    }

    /// Scancode producing a character in the unshifted layer
    pub fn scancode_for(&self, ch: char) -> Option<u16> {
        self.reverse.get(&ch).copied()
    }

    /// Number of distinct typeable characters
    pub fn char_count(&self) -> usize {
        self.reverse.len()
    }
}

/// Printable Latin-1 character carried by a keysym, if any
fn sym_to_char(sym: u16) -> Option<char> {
    if sym == 0 || sym == K_HOLE {
        return None;
    }
    let [kind, value] = sym.to_be_bytes();
    if kind != KT_LATIN && kind != KT_LETTER {
        return None;
    }
    if value < 0x20 || value == 0x7f {
        return None;
    }
    Some(char::from(value))
}

fn parse_integer(token: &str) -> Option<u16> {
    match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}
