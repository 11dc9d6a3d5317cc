//! Command-line parser for the KMBox dialect.
//!
//! A line is one command without its terminator:
//!
//! ```text
//! km.<button>(0|1)     km.<button>()
//! km.click(N)          km.move(x, y)      m(x, y)
//! km.wheel(w)          km.catch_xy(D)
//! km.lock_mx(0|1)      km.lock_my()       km.lock_<short>(0|1)
//! km.buttons(0|1)      km.buttons()
//! ```
//!
//! Names are case-sensitive. Whitespace is tolerated before an argument;
//! a getter is parentheses containing nothing but whitespace.

use crate::types::{Axis, Button};

/// Maximum line length accepted by the shell, including the terminator slot.
pub const MAX_LINE_LENGTH: usize = 64;

/// Upper bound of a `km.catch_xy` window in milliseconds.
pub const MAX_CATCH_WINDOW_MS: u32 = 1000;

const PREFIX: &[u8] = b"km.";
const MOVE_ALIAS: &[u8] = b"m";
const LOCK_PREFIX: &[u8] = b"lock_";

/// A parsed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[must_use]
pub enum Command {
    /// `km.<button>(0|1)`: force press or timed release.
    SetButton { button: Button, pressed: bool },
    /// `km.<button>()`
    GetButton(Button),
    /// `km.click(N)`
    Click(Button),
    /// `km.move(x, y)` or `m(x, y)`
    Move { x: i16, y: i16 },
    /// `km.wheel(w)`
    Wheel(i16),
    /// `km.lock_mx()` / `km.lock_my()`
    GetAxisLock(Axis),
    /// `km.lock_mx(0|1)` / `km.lock_my(0|1)`
    SetAxisLock { axis: Axis, locked: bool },
    /// `km.lock_<short>()`
    GetButtonLock(Button),
    /// `km.lock_<short>(0|1)`
    SetButtonLock { button: Button, locked: bool },
    /// `km.buttons()`
    GetButtonStream,
    /// `km.buttons(0|1)`
    SetButtonStream(bool),
    /// `km.catch_xy(D)`, window in milliseconds (clamped by the executor).
    CatchXy(u32),
}

impl Command {
    /// Whether the command answers with a value line.
    #[inline]
    #[must_use]
    pub const fn is_getter(&self) -> bool {
        matches!(
            self,
            Command::GetButton(_)
                | Command::GetAxisLock(_)
                | Command::GetButtonLock(_)
                | Command::GetButtonStream
                | Command::CatchXy(_)
        )
    }
}

/// Why a line was rejected.
///
/// The shell never reports these on the link; they exist for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// Empty line.
    Empty,
    /// Not a `km.` command or the `m(...)` alias.
    UnknownCommand,
    /// Missing or misplaced parentheses, trailing bytes.
    Syntax,
    /// Argument is not a number of the expected shape.
    InvalidArgument,
    /// Argument is numeric but outside the accepted range.
    OutOfRange,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty line"),
            Self::UnknownCommand => write!(f, "unknown command"),
            Self::Syntax => write!(f, "syntax error"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfRange => write!(f, "argument out of range"),
        }
    }
}

/// Parse one command line (terminator already removed).
///
/// # Example
///
/// ```
/// use kmbox_proto::{parse_command, Button, Command};
///
/// assert_eq!(
///     parse_command(b"km.left(1)"),
///     Ok(Command::SetButton { button: Button::Left, pressed: true })
/// );
/// assert_eq!(parse_command(b"m(5, -3)"), Ok(Command::Move { x: 5, y: -3 }));
/// ```
pub fn parse_command(line: &[u8]) -> Result<Command, ParseError> {
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let (name, args) = split_call(line)?;

    if let Some(name) = name.strip_prefix(PREFIX) {
        return parse_km(name, args);
    }
    if name == MOVE_ALIAS {
        return parse_move(args);
    }
    Err(ParseError::UnknownCommand)
}

/// Split `name(args)` into its parts. Nothing may follow the closing paren.
fn split_call(line: &[u8]) -> Result<(&[u8], &[u8]), ParseError> {
    let open = line
        .iter()
        .position(|&b| b == b'(')
        .ok_or(ParseError::Syntax)?;
    let close = line
        .iter()
        .rposition(|&b| b == b')')
        .ok_or(ParseError::Syntax)?;

    if close != line.len() - 1 || close < open {
        return Err(ParseError::Syntax);
    }

    let args = &line[open + 1..close];
    if args.contains(&b'(') || args.contains(&b')') {
        return Err(ParseError::Syntax);
    }
    Ok((&line[..open], args))
}

fn parse_km(name: &[u8], args: &[u8]) -> Result<Command, ParseError> {
    if let Some(button) = Button::from_name(name) {
        return Ok(if is_getter(args) {
            Command::GetButton(button)
        } else {
            Command::SetButton {
                button,
                pressed: parse_flag(args)?,
            }
        });
    }

    match name {
        b"click" => {
            let index = parse_u32(args)?;
            let button = u8::try_from(index)
                .ok()
                .and_then(Button::from_index)
                .ok_or(ParseError::OutOfRange)?;
            Ok(Command::Click(button))
        }
        b"move" => parse_move(args),
        b"wheel" => Ok(Command::Wheel(parse_i16(args)?)),
        b"buttons" => Ok(if is_getter(args) {
            Command::GetButtonStream
        } else {
            Command::SetButtonStream(parse_flag(args)?)
        }),
        b"catch_xy" => Ok(Command::CatchXy(parse_u32(args)?)),
        _ => match name.strip_prefix(LOCK_PREFIX) {
            Some(target) => parse_lock(target, args),
            None => Err(ParseError::UnknownCommand),
        },
    }
}

fn parse_lock(target: &[u8], args: &[u8]) -> Result<Command, ParseError> {
    let axis = match target {
        b"mx" => Some(Axis::X),
        b"my" => Some(Axis::Y),
        _ => None,
    };

    if let Some(axis) = axis {
        return Ok(if is_getter(args) {
            Command::GetAxisLock(axis)
        } else {
            Command::SetAxisLock {
                axis,
                locked: parse_flag(args)?,
            }
        });
    }

    let button = Button::from_short_name(target).ok_or(ParseError::UnknownCommand)?;
    Ok(if is_getter(args) {
        Command::GetButtonLock(button)
    } else {
        Command::SetButtonLock {
            button,
            locked: parse_flag(args)?,
        }
    })
}

/// `x, y` with both values required.
fn parse_move(args: &[u8]) -> Result<Command, ParseError> {
    let mut parts = args.split(|&b| b == b',');
    let x = parts.next().ok_or(ParseError::InvalidArgument)?;
    let y = parts.next().ok_or(ParseError::InvalidArgument)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidArgument);
    }
    Ok(Command::Move {
        x: parse_i16(x)?,
        y: parse_i16(y)?,
    })
}

/// Getter form: parentheses holding only whitespace.
#[inline]
fn is_getter(args: &[u8]) -> bool {
    args.iter().all(|&b| b == b' ' || b == b'\t')
}

/// `0` or `1`, nothing else.
#[inline]
fn parse_flag(s: &[u8]) -> Result<bool, ParseError> {
    match trim_leading_whitespace(s) {
        b"0" => Ok(false),
        b"1" => Ok(true),
        s if !s.is_empty() && s.iter().all(u8::is_ascii_digit) => Err(ParseError::OutOfRange),
        _ => Err(ParseError::InvalidArgument),
    }
}

/// Parse a decimal string as i16 (with optional leading whitespace and sign).
fn parse_i16(s: &[u8]) -> Result<i16, ParseError> {
    let s = trim_leading_whitespace(s);
    let (negative, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let magnitude = i64::try_from(parse_digits(digits)?).map_err(|_| ParseError::OutOfRange)?;
    let value = if negative { -magnitude } else { magnitude };

    i16::try_from(value).map_err(|_| ParseError::OutOfRange)
}

/// Parse an unsigned decimal (with optional leading whitespace).
fn parse_u32(s: &[u8]) -> Result<u32, ParseError> {
    let magnitude = parse_digits(trim_leading_whitespace(s))?;
    u32::try_from(magnitude).map_err(|_| ParseError::OutOfRange)
}

fn parse_digits(s: &[u8]) -> Result<u64, ParseError> {
    if s.is_empty() {
        return Err(ParseError::InvalidArgument);
    }

    let mut value: u64 = 0;
    for &b in s {
        if !b.is_ascii_digit() {
            return Err(ParseError::InvalidArgument);
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(u64::from(b - b'0')))
            .ok_or(ParseError::OutOfRange)?;
    }
    Ok(value)
}

/// Trim leading ASCII whitespace (spaces and tabs).
#[inline]
fn trim_leading_whitespace(s: &[u8]) -> &[u8] {
    let start = s
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(s.len());
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_setters() {
        for button in Button::ALL {
            let mut line = [0u8; 16];
            let name = button.name();
            line[..3].copy_from_slice(b"km.");
            line[3..3 + name.len()].copy_from_slice(name);
            line[3 + name.len()..3 + name.len() + 3].copy_from_slice(b"(1)");
            let cmd = parse_command(&line[..name.len() + 6]).unwrap();
            assert_eq!(
                cmd,
                Command::SetButton {
                    button,
                    pressed: true
                }
            );
        }
        assert_eq!(
            parse_command(b"km.side2(0)"),
            Ok(Command::SetButton {
                button: Button::Side2,
                pressed: false
            })
        );
    }

    #[test]
    fn test_button_getter_requires_whitespace_only() {
        assert_eq!(parse_command(b"km.right()"), Ok(Command::GetButton(Button::Right)));
        assert_eq!(parse_command(b"km.right(  )"), Ok(Command::GetButton(Button::Right)));
        assert_eq!(parse_command(b"km.right(x)"), Err(ParseError::InvalidArgument));
    }

    #[test]
    fn test_button_flag_range() {
        assert_eq!(parse_command(b"km.left(2)"), Err(ParseError::OutOfRange));
        assert_eq!(parse_command(b"km.left(-1)"), Err(ParseError::InvalidArgument));
        assert_eq!(parse_command(b"km.left(10)"), Err(ParseError::OutOfRange));
    }

    #[test]
    fn test_case_sensitive() {
        assert_eq!(parse_command(b"KM.left(1)"), Err(ParseError::UnknownCommand));
        assert_eq!(parse_command(b"km.LEFT(1)"), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn test_click_index() {
        assert_eq!(parse_command(b"km.click(0)"), Ok(Command::Click(Button::Left)));
        assert_eq!(parse_command(b"km.click(4)"), Ok(Command::Click(Button::Side2)));
        assert_eq!(parse_command(b"km.click(5)"), Err(ParseError::OutOfRange));
        assert_eq!(parse_command(b"km.click()"), Err(ParseError::InvalidArgument));
    }

    #[test]
    fn test_move_forms() {
        assert_eq!(
            parse_command(b"km.move(50, -25)"),
            Ok(Command::Move { x: 50, y: -25 })
        );
        assert_eq!(parse_command(b"m(1,2)"), Ok(Command::Move { x: 1, y: 2 }));
        assert_eq!(parse_command(b"m(+7,\t-8)"), Ok(Command::Move { x: 7, y: -8 }));
    }

    #[test]
    fn test_move_requires_both_values() {
        assert_eq!(parse_command(b"km.move(5)"), Err(ParseError::InvalidArgument));
        assert_eq!(parse_command(b"km.move(5,)"), Err(ParseError::InvalidArgument));
        assert_eq!(parse_command(b"km.move(1,2,3)"), Err(ParseError::InvalidArgument));
        assert_eq!(parse_command(b"km.move(5 ,6)"), Err(ParseError::InvalidArgument));
    }

    #[test]
    fn test_move_range() {
        assert_eq!(
            parse_command(b"m(-32768,32767)"),
            Ok(Command::Move { x: i16::MIN, y: i16::MAX })
        );
        assert_eq!(parse_command(b"m(32768,0)"), Err(ParseError::OutOfRange));
    }

    #[test]
    fn test_wheel() {
        assert_eq!(parse_command(b"km.wheel(-3)"), Ok(Command::Wheel(-3)));
        assert_eq!(parse_command(b"km.wheel()"), Err(ParseError::InvalidArgument));
    }

    #[test]
    fn test_axis_locks() {
        assert_eq!(parse_command(b"km.lock_mx()"), Ok(Command::GetAxisLock(Axis::X)));
        assert_eq!(
            parse_command(b"km.lock_my(1)"),
            Ok(Command::SetAxisLock {
                axis: Axis::Y,
                locked: true
            })
        );
    }

    #[test]
    fn test_button_locks() {
        assert_eq!(
            parse_command(b"km.lock_ms1(1)"),
            Ok(Command::SetButtonLock {
                button: Button::Side1,
                locked: true
            })
        );
        assert_eq!(
            parse_command(b"km.lock_mm()"),
            Ok(Command::GetButtonLock(Button::Middle))
        );
        assert_eq!(parse_command(b"km.lock_mq(1)"), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn test_button_stream() {
        assert_eq!(parse_command(b"km.buttons()"), Ok(Command::GetButtonStream));
        assert_eq!(parse_command(b"km.buttons(1)"), Ok(Command::SetButtonStream(true)));
    }

    #[test]
    fn test_catch_xy() {
        assert_eq!(parse_command(b"km.catch_xy(200)"), Ok(Command::CatchXy(200)));
        assert_eq!(parse_command(b"km.catch_xy(5000)"), Ok(Command::CatchXy(5000)));
        assert_eq!(parse_command(b"km.catch_xy(-1)"), Err(ParseError::InvalidArgument));
        assert_eq!(parse_command(b"km.catch_xy()"), Err(ParseError::InvalidArgument));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse_command(b""), Err(ParseError::Empty));
        assert_eq!(parse_command(b"km.left"), Err(ParseError::Syntax));
        assert_eq!(parse_command(b"km.left(1"), Err(ParseError::Syntax));
        assert_eq!(parse_command(b"km.left(1) "), Err(ParseError::Syntax));
        assert_eq!(parse_command(b"km.left((1))"), Err(ParseError::Syntax));
        assert_eq!(parse_command(b"hello"), Err(ParseError::Syntax));
        assert_eq!(parse_command(b"km.jump(1)"), Err(ParseError::UnknownCommand));
    }

    #[test]
    fn test_getter_classification() {
        assert!(Command::GetButtonStream.is_getter());
        assert!(Command::CatchXy(10).is_getter());
        assert!(!Command::Move { x: 0, y: 0 }.is_getter());
    }
}
