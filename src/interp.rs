//! Streaming substitution of identity placeholders in served HTML.
//!
//! The scanner is greedy on `$`: it swallows bytes while they can still
//! become one of the three placeholders, emits the swallowed prefix
//! unchanged on a mismatch, and carries a partial match across chunk
//! boundaries. Output can optionally be framed for chunked transfer.

use std::borrow::Cow;

use thiserror::Error;

const VARS: [&str; 3] = ["$lwsgs_user", "$lwsgs_auth", "$lwsgs_email"];

/// Space that must stay free for the chunk length line and trailing CRLF.
pub const CHUNK_FRAMING_RESERVE: usize = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InterpolateError {
    #[error(
        "Interpolated chunk of {produced} bytes does not fit in {max_len} with framing reserve"
    )]
    Overflow { produced: usize, max_len: usize },
}

/// Values spliced into a page for one caller.
#[derive(Debug, Clone, Default)]
pub struct PageVars {
    pub user: String,
    pub auth: u32,
    pub email: String,
}

impl PageVars {
    fn value_of(&self, var: usize) -> Cow<'_, str> {
        match var {
            0 => Cow::Borrowed(self.user.as_str()),
            1 => Cow::Owned(self.auth.to_string()),
            _ => Cow::Borrowed(self.email.as_str()),
        }
    }
}

enum Scan {
    Full(usize, usize),
    Partial,
    Miss,
}

fn scan_var(rest: &[u8]) -> Scan {
    for (idx, var) in VARS.iter().enumerate() {
        let literal = var.as_bytes();
        if rest.len() >= literal.len() {
            if &rest[..literal.len()] == literal {
                return Scan::Full(idx, literal.len());
            }
        } else if literal.starts_with(rest) {
            return Scan::Partial;
        }
    }
    Scan::Miss
}

#[derive(Debug, Default)]
pub struct Interpolator {
    swallow: Vec<u8>,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substitute placeholders in `chunk`, appending to `out`. A suffix
    /// that could still become a placeholder is held back until the next
    /// call (or [`Interpolator::finish`]).
    pub fn substitute(
        &mut self,
        vars: &PageVars,
        chunk: &[u8],
        out: &mut Vec<u8>,
    ) {
        let mut pending = std::mem::take(&mut self.swallow);
        pending.extend_from_slice(chunk);

        let mut i = 0;
        while i < pending.len() {
            if pending[i] != b'$' {
                out.push(pending[i]);
                i += 1;
                continue;
            }
            match scan_var(&pending[i..]) {
                Scan::Full(var, len) => {
                    out.extend_from_slice(vars.value_of(var).as_bytes());
                    i += len;
                }
                Scan::Partial => {
                    self.swallow = pending[i..].to_vec();
                    return;
                }
                Scan::Miss => {
                    // emit the `$` and rescan from the next byte
                    out.push(pending[i]);
                    i += 1;
                }
            }
        }
    }

    /// Flush a held-back partial match unchanged at end of stream.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        out.append(&mut self.swallow);
    }

    /// Substitute one response chunk and frame it for chunked transfer:
    /// `{len:X}\r\n…\r\n`, plus the `0\r\n\r\n` trailer when `last` is
    /// set. Fails when the result cannot fit in `max_len` with the
    /// framing reserve.
    pub fn process_chunk(
        &mut self,
        vars: &PageVars,
        chunk: &[u8],
        max_len: usize,
        last: bool,
    ) -> Result<Vec<u8>, InterpolateError> {
        let mut body = Vec::with_capacity(chunk.len() + 16);
        self.substitute(vars, chunk, &mut body);
        if last {
            self.finish(&mut body);
        }
        if body.len() + CHUNK_FRAMING_RESERVE >= max_len {
            return Err(InterpolateError::Overflow {
                produced: body.len(),
                max_len,
            });
        }

        let mut framed = format!("{:X}\r\n", body.len()).into_bytes();
        framed.append(&mut body);
        framed.extend_from_slice(b"\r\n");
        if last {
            framed.extend_from_slice(b"0\r\n\r\n");
        }
        Ok(framed)
    }
}
