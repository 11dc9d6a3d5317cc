//! KMBox serial command dialect: types, parsing, and response formatting.
//!
//! This crate provides everything needed to work with the text protocol
//! spoken on the command link:
//!
//! - **Types**: [`Button`], [`Axis`], [`Terminator`]
//! - **Parsing**: [`parse_command()`] turns one line into a [`Command`]
//! - **Responses**: [`format_response()`] and [`format_button_event()`]
//!   build the exact bytes written back on the link
//!
//! # Protocol Format
//!
//! Lines end with CR, LF, or CRLF. An accepted command is echoed with the
//! same terminator, followed by the prompt `>>> `. Getters insert their
//! value and a fixed `\r\n` between echo and prompt. Anything that fails to
//! parse is dropped without output.
//!
//! ```
//! use kmbox_proto::{format_response, parse_command, Terminator, Value};
//!
//! let cmd = parse_command(b"km.lock_mx()").unwrap();
//! assert!(cmd.is_getter());
//!
//! let mut buf = [0u8; kmbox_proto::MAX_RESPONSE_SIZE];
//! let len = format_response(&mut buf, b"km.lock_mx()", Terminator::CrLf, Some(Value::Flag(true)))
//!     .unwrap();
//! assert_eq!(&buf[..len], b"km.lock_mx()\r\n1\r\n>>> ");
//! ```
//!
//! # Features
//!
//! - **`std`**: Enable standard library support (for host testing)
//! - **`defmt`**: Enable defmt formatting (for embedded logging)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod fmt;
pub mod parser;
pub mod response;
pub mod types;

pub use parser::{parse_command, Command, ParseError, MAX_CATCH_WINDOW_MS, MAX_LINE_LENGTH};
pub use response::{
    format_button_event, format_response, FormatError, ResponseWriter, Value, MAX_RESPONSE_SIZE,
    PROMPT,
};
pub use types::{Axis, Button, Terminator};
