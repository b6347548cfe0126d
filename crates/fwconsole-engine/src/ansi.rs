//! Decoding and cleaning of raw shell bytes.
//!
//! Device output is full of terminal artefacts: colour codes, cursor moves,
//! carriage returns and backspace erasures. Callers want plain lines.

/// Longest escape sequence held back waiting for its final byte.
const MAX_CARRY: usize = 64;

/// Incremental UTF-8 decoder that never splits a code point or an escape
/// sequence across two outputs.
#[derive(Debug, Default)]
pub struct TextDecoder {
    carry: Vec<u8>,
}

impl TextDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, holding back an incomplete trailing sequence.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        if bytes.is_empty() && self.carry.is_empty() {
            return String::new();
        }
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = &input[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // Safe: `valid_up_to` marks a verified UTF-8 prefix.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(n) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[n..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }

        if let Some(start) = incomplete_escape_start(&out) {
            if out.len() - start <= MAX_CARRY {
                let mut held = out.split_off(start).into_bytes();
                held.append(&mut self.carry);
                self.carry = held;
            }
        }
        out
    }
}

/// Byte offset of a trailing escape sequence that has not terminated yet.
fn incomplete_escape_start(text: &str) -> Option<usize> {
    let start = text.rfind('\x1b')?;
    let tail = &text[start + 1..];
    let mut chars = tail.chars();
    match chars.next() {
        None => Some(start),
        Some('[') => {
            let terminated = chars.any(|c| ('\x40'..='\x7e').contains(&c));
            (!terminated).then_some(start)
        }
        Some(']') => {
            let terminated = tail.contains('\x07') || tail.contains("\x1b\\");
            (!terminated).then_some(start)
        }
        Some(_) => None,
    }
}

/// Strip escape sequences and control characters, apply backspaces and drop
/// carriage returns. Newlines and tabs are kept.
#[must_use]
pub fn clean(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => match chars.next() {
                // CSI: parameters and intermediates, then one final byte
                Some('[') => {
                    while let Some(&p) = chars.peek() {
                        chars.next();
                        if ('\x40'..='\x7e').contains(&p) {
                            break;
                        }
                    }
                }
                // OSC: until BEL or ST
                Some(']') => {
                    while let Some(p) = chars.next() {
                        if p == '\x07' {
                            break;
                        }
                        if p == '\x1b' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                // Charset designation takes one more byte
                Some('(' | ')') => {
                    chars.next();
                }
                _ => {}
            },
            '\u{8}' => {
                if out.chars().last().is_some_and(|last| last != '\n') {
                    out.pop();
                }
            }
            '\n' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}
