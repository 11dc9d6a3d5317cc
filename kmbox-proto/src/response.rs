//! Response formatting.
//!
//! Every accepted command is echoed with its original terminator. Setters
//! then print the prompt; getters print the value, a fixed `\r\n`, and the
//! prompt:
//!
//! ```text
//! km.left(1)\r\n>>>                (setter)
//! km.right()\r\n0\r\n>>>           (getter)
//! km.catch_xy(200)\n(2, 0)\r\n>>>  (getter, LF input)
//! ```

use crate::fmt::{write_i32, MAX_I32_LEN};
use crate::types::Terminator;

/// Shell prompt emitted after every accepted command.
pub const PROMPT: &[u8] = b">>> ";

/// Terminator used after a getter value, independent of the input terminator.
pub const VALUE_TERMINATOR: &[u8] = b"\r\n";

/// Largest possible response: echoed line plus CRLF plus `(i32, i32)\r\n>>> `.
pub const MAX_RESPONSE_SIZE: usize = crate::parser::MAX_LINE_LENGTH + 2 + 2 * MAX_I32_LEN + 10;

/// Value carried by a getter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Value {
    /// `1` or `0`.
    Flag(bool),
    /// `(x, y)`.
    Pair(i32, i32),
}

/// Error type for formatting operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FormatError {
    /// The output buffer is too small to hold the response.
    BufferTooSmall,
}

impl core::fmt::Display for FormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BufferTooSmall => write!(f, "buffer too small"),
        }
    }
}

/// Cursor over an output buffer with bounds-checked writes.
pub struct ResponseWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ResponseWriter<'a> {
    #[inline]
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Append raw bytes.
    pub fn write(&mut self, bytes: &[u8]) -> Result<&mut Self, FormatError> {
        let end = self.pos + bytes.len();
        if end > self.buf.len() {
            return Err(FormatError::BufferTooSmall);
        }
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
        Ok(self)
    }

    /// Echo the command line with the terminator it arrived with.
    pub fn echo(&mut self, line: &[u8], terminator: Terminator) -> Result<&mut Self, FormatError> {
        self.write(line)?.write(terminator.as_bytes())
    }

    /// Write a getter value followed by `\r\n`.
    pub fn value(&mut self, value: Value) -> Result<&mut Self, FormatError> {
        match value {
            Value::Flag(flag) => {
                self.write(if flag { b"1" } else { b"0" })?;
            }
            Value::Pair(x, y) => {
                let mut num = [0u8; MAX_I32_LEN];
                self.write(b"(")?;
                let len = write_i32(&mut num, x);
                self.write(&num[..len])?.write(b", ")?;
                let len = write_i32(&mut num, y);
                self.write(&num[..len])?.write(b")")?;
            }
        }
        self.write(VALUE_TERMINATOR)
    }

    /// Write the prompt.
    pub fn prompt(&mut self) -> Result<&mut Self, FormatError> {
        self.write(PROMPT)
    }

    /// Number of bytes written so far.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pos
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos == 0
    }
}

/// Format the full response to an accepted command.
///
/// `value` is `Some` for getters. Returns the number of bytes written.
pub fn format_response(
    buf: &mut [u8],
    line: &[u8],
    terminator: Terminator,
    value: Option<Value>,
) -> Result<usize, FormatError> {
    let mut w = ResponseWriter::new(buf);
    w.echo(line, terminator)?;
    if let Some(value) = value {
        w.value(value)?;
    }
    w.prompt()?;
    Ok(w.len())
}

/// Format a button-stream notification: `km.` + raw mask byte + `\r\n>>> `.
pub fn format_button_event(buf: &mut [u8], mask: u8) -> Result<usize, FormatError> {
    let mut w = ResponseWriter::new(buf);
    w.write(b"km.")?
        .write(&[mask])?
        .write(VALUE_TERMINATOR)?
        .prompt()?;
    Ok(w.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setter_echo_keeps_terminator() {
        let mut buf = [0u8; MAX_RESPONSE_SIZE];
        for (term, expected) in [
            (Terminator::CrLf, &b"km.left(1)\r\n>>> "[..]),
            (Terminator::Lf, &b"km.left(1)\n>>> "[..]),
            (Terminator::Cr, &b"km.left(1)\r>>> "[..]),
        ] {
            let len = format_response(&mut buf, b"km.left(1)", term, None).unwrap();
            assert_eq!(&buf[..len], expected);
        }
    }

    #[test]
    fn test_getter_value_always_crlf() {
        let mut buf = [0u8; MAX_RESPONSE_SIZE];
        let len =
            format_response(&mut buf, b"km.right()", Terminator::Lf, Some(Value::Flag(false)))
                .unwrap();
        assert_eq!(&buf[..len], b"km.right()\n0\r\n>>> ");
    }

    #[test]
    fn test_pair_value() {
        let mut buf = [0u8; MAX_RESPONSE_SIZE];
        let len = format_response(
            &mut buf,
            b"km.catch_xy(200)",
            Terminator::CrLf,
            Some(Value::Pair(2, -7)),
        )
        .unwrap();
        assert_eq!(&buf[..len], b"km.catch_xy(200)\r\n(2, -7)\r\n>>> ");
    }

    #[test]
    fn test_button_event() {
        let mut buf = [0u8; 16];
        let len = format_button_event(&mut buf, 0x05).unwrap();
        assert_eq!(&buf[..len], b"km.\x05\r\n>>> ");
    }

    #[test]
    fn test_buffer_too_small() {
        let mut buf = [0u8; 4];
        assert_eq!(
            format_response(&mut buf, b"km.left(1)", Terminator::Lf, None),
            Err(FormatError::BufferTooSmall)
        );
    }

    #[test]
    fn test_max_response_fits() {
        let line = [b'x'; crate::parser::MAX_LINE_LENGTH - 1];
        let mut buf = [0u8; MAX_RESPONSE_SIZE];
        assert!(format_response(
            &mut buf,
            &line,
            Terminator::CrLf,
            Some(Value::Pair(i32::MIN, i32::MIN))
        )
        .is_ok());
    }
}
