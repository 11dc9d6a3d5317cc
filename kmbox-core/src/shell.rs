//! Command shell: line assembly, dispatch, and response generation.
//!
//! Bytes are fed one at a time. Lines end in CR, LF, or CRLF; a bare CR is
//! held for one byte of lookahead (or until [`CommandShell::poll`] sees the
//! link idle for [`CR_LOOKAHEAD_MS`]) so the echo reproduces the caller's
//! terminator exactly. Accepted commands run against the
//! [`VirtualMouse`] before the response is produced. Anything that fails to
//! parse is dropped without output.

use heapless::Vec;
use kmbox_proto::{
    format_response, parse_command, Command, Terminator, Value, MAX_LINE_LENGTH,
    MAX_RESPONSE_SIZE,
};

use crate::config::CR_LOOKAHEAD_MS;
use crate::mouse::VirtualMouse;

/// Bytes written back on the link for one accepted line.
pub type Response = Vec<u8, MAX_RESPONSE_SIZE>;

/// Longest accepted line, excluding the terminator.
const LINE_CAPACITY: usize = MAX_LINE_LENGTH - 1;

/// Shell counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ShellStats {
    /// Lines executed and answered.
    pub accepted: u32,
    /// Non-empty lines that failed to parse.
    pub dropped: u32,
    /// Lines discarded for exceeding the line buffer.
    pub overflows: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineState {
    /// Collecting bytes.
    Collecting,
    /// A CR arrived; the next byte decides between CR and CRLF.
    PendingCr { since_ms: u32 },
    /// The line overflowed; discard until the next terminator.
    Discarding,
}

pub struct CommandShell {
    line: Vec<u8, LINE_CAPACITY>,
    state: LineState,
    last_terminator: Terminator,
    stats: ShellStats,
}

impl CommandShell {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            line: Vec::new(),
            state: LineState::Collecting,
            last_terminator: Terminator::Lf,
            stats: ShellStats {
                accepted: 0,
                dropped: 0,
                overflows: 0,
            },
        }
    }

    /// Feed one received byte.
    ///
    /// Returns the response for a line completed by this byte, if the line
    /// was accepted.
    pub fn feed(&mut self, byte: u8, now_ms: u32, mouse: &mut VirtualMouse) -> Option<Response> {
        match self.state {
            LineState::PendingCr { .. } => {
                if byte == b'\n' {
                    return self.complete(Terminator::CrLf, now_ms, mouse);
                }
                // The CR stood alone; finish that line and start over with
                // this byte.
                let response = self.complete(Terminator::Cr, now_ms, mouse);
                self.accept_byte(byte, now_ms);
                response
            }
            LineState::Discarding => {
                if matches!(byte, b'\r' | b'\n') {
                    self.reset();
                }
                None
            }
            LineState::Collecting => match byte {
                b'\n' => self.complete(Terminator::Lf, now_ms, mouse),
                _ => {
                    self.accept_byte(byte, now_ms);
                    None
                }
            },
        }
    }

    /// Feed a run of bytes, handing every response to `emit`.
    pub fn feed_slice(
        &mut self,
        bytes: &[u8],
        now_ms: u32,
        mouse: &mut VirtualMouse,
        mut emit: impl FnMut(&[u8]),
    ) {
        for &b in bytes {
            if let Some(response) = self.feed(b, now_ms, mouse) {
                emit(&response);
            }
        }
    }

    /// Complete a CR-terminated line once the link has been idle long
    /// enough that no LF can follow.
    pub fn poll(&mut self, now_ms: u32, mouse: &mut VirtualMouse) -> Option<Response> {
        match self.state {
            LineState::PendingCr { since_ms }
                if now_ms.wrapping_sub(since_ms) >= CR_LOOKAHEAD_MS =>
            {
                self.complete(Terminator::Cr, now_ms, mouse)
            }
            _ => None,
        }
    }

    /// Terminator of the most recently completed line.
    #[must_use]
    pub fn last_terminator(&self) -> Terminator {
        self.last_terminator
    }

    #[must_use]
    pub fn stats(&self) -> ShellStats {
        self.stats
    }

    /// Bytes of the line being assembled.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.line
    }

    /// Discard any partial line.
    pub fn reset(&mut self) {
        self.line.clear();
        self.state = LineState::Collecting;
    }

    fn accept_byte(&mut self, byte: u8, now_ms: u32) {
        if byte == b'\r' {
            self.state = LineState::PendingCr { since_ms: now_ms };
            return;
        }
        if self.line.push(byte).is_err() {
            warn!("command line overflow, discarding");
            self.stats.overflows += 1;
            self.line.clear();
            self.state = LineState::Discarding;
        }
    }

    fn complete(
        &mut self,
        terminator: Terminator,
        now_ms: u32,
        mouse: &mut VirtualMouse,
    ) -> Option<Response> {
        self.last_terminator = terminator;
        self.state = LineState::Collecting;

        let response = match parse_command(&self.line) {
            Ok(command) => {
                let value = execute(command, mouse, now_ms);
                self.stats.accepted += 1;
                render(&self.line, terminator, value)
            }
            Err(e) => {
                if !self.line.is_empty() {
                    debug!("dropped command: {:?}", e);
                    self.stats.dropped += 1;
                }
                None
            }
        };
        self.line.clear();
        response
    }
}

impl Default for CommandShell {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one command against the mouse state; getters yield their value.
pub fn execute(command: Command, mouse: &mut VirtualMouse, now_ms: u32) -> Option<Value> {
    match command {
        Command::SetButton { button, pressed } => {
            mouse.force_button(button, pressed, now_ms);
            None
        }
        Command::GetButton(button) => Some(Value::Flag(mouse.is_pressed(button))),
        Command::Click(button) => {
            mouse.click(button, now_ms);
            None
        }
        Command::Move { x, y } => {
            mouse.add_movement(x, y, now_ms);
            None
        }
        Command::Wheel(w) => {
            mouse.add_wheel(w);
            None
        }
        Command::GetAxisLock(axis) => Some(Value::Flag(mouse.axis_locked(axis))),
        Command::SetAxisLock { axis, locked } => {
            mouse.set_axis_lock(axis, locked);
            None
        }
        Command::GetButtonLock(button) => Some(Value::Flag(mouse.button_locked(button))),
        Command::SetButtonLock { button, locked } => {
            mouse.set_button_lock(button, locked);
            None
        }
        Command::GetButtonStream => Some(Value::Flag(mouse.button_stream_enabled())),
        Command::SetButtonStream(enabled) => {
            mouse.set_button_stream(enabled);
            None
        }
        Command::CatchXy(duration) => {
            let (x, y) = mouse.catch_xy(duration, now_ms);
            Some(Value::Pair(x, y))
        }
    }
}

fn render(line: &[u8], terminator: Terminator, value: Option<Value>) -> Option<Response> {
    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    let len = format_response(&mut buf, line, terminator, value).ok()?;
    Response::from_slice(&buf[..len]).ok()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use kmbox_proto::Button;
    use std::vec::Vec as StdVec;

    fn run(shell: &mut CommandShell, mouse: &mut VirtualMouse, input: &[u8]) -> StdVec<u8> {
        let mut out = StdVec::new();
        shell.feed_slice(input, 0, mouse, |r| out.extend_from_slice(r));
        out
    }

    #[test]
    fn test_setter_echo_preserves_terminator() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        assert_eq!(run(&mut shell, &mut mouse, b"km.left(1)\r\n"), b"km.left(1)\r\n>>> ");
        assert_eq!(shell.last_terminator(), Terminator::CrLf);
        assert_eq!(run(&mut shell, &mut mouse, b"km.left(0)\n"), b"km.left(0)\n>>> ");
        assert_eq!(shell.last_terminator(), Terminator::Lf);
    }

    #[test]
    fn test_bare_cr_completes_on_next_byte() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        assert!(run(&mut shell, &mut mouse, b"km.right(1)\r").is_empty());
        assert_eq!(
            run(&mut shell, &mut mouse, b"k"),
            b"km.right(1)\r>>> "
        );
        assert_eq!(shell.pending(), b"k");
    }

    #[test]
    fn test_bare_cr_completes_when_idle() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        for &b in b"km.middle(1)\r" {
            assert!(shell.feed(b, 100, &mut mouse).is_none());
        }
        assert!(shell.poll(101, &mut mouse).is_none());
        let response = shell.poll(100 + CR_LOOKAHEAD_MS, &mut mouse).unwrap();
        assert_eq!(&response[..], b"km.middle(1)\r>>> ");
        assert!(mouse.button_state(Button::Middle).is_forced);
    }

    #[test]
    fn test_getter_uses_fixed_value_terminator() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        assert_eq!(run(&mut shell, &mut mouse, b"km.right()\n"), b"km.right()\n0\r\n>>> ");
        run(&mut shell, &mut mouse, b"km.right(1)\n");
        assert_eq!(run(&mut shell, &mut mouse, b"km.right()\n"), b"km.right()\n1\r\n>>> ");
    }

    #[test]
    fn test_malformed_dropped_silently() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        assert!(run(&mut shell, &mut mouse, b"km.left(2)\n").is_empty());
        assert!(run(&mut shell, &mut mouse, b"km.move(1)\n").is_empty());
        assert!(run(&mut shell, &mut mouse, b"hello\r\n").is_empty());
        assert!(run(&mut shell, &mut mouse, b"\n\r\n").is_empty());
        assert_eq!(shell.stats().dropped, 3);
        assert_eq!(shell.stats().accepted, 0);
    }

    #[test]
    fn test_overflow_discards_until_terminator() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        let long = [b'a'; MAX_LINE_LENGTH + 4];
        assert!(run(&mut shell, &mut mouse, &long).is_empty());
        assert!(run(&mut shell, &mut mouse, b"km.left(1)\n").is_empty());
        assert_eq!(shell.stats().overflows, 1);

        assert_eq!(run(&mut shell, &mut mouse, b"km.left(1)\n"), b"km.left(1)\n>>> ");
    }

    #[test]
    fn test_longest_line_accepted() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        // 63 bytes: "km.move(" + padding spaces + "1,2)"
        let mut line = StdVec::new();
        line.extend_from_slice(b"km.move(");
        line.extend(core::iter::repeat(b' ').take(LINE_CAPACITY - 12));
        line.extend_from_slice(b"1,2)");
        assert_eq!(line.len(), LINE_CAPACITY);
        line.push(b'\n');

        let out = run(&mut shell, &mut mouse, &line);
        assert!(out.ends_with(b">>> "));
        assert_eq!(mouse.pending_movement(), (1, 2));
    }

    #[test]
    fn test_catch_xy_pair() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        mouse.add_movement(3, 0, 100);
        mouse.add_movement(2, 0, 600);
        let mut out = StdVec::new();
        shell.feed_slice(b"km.catch_xy(200)\r\n", 700, &mut mouse, |r| out.extend_from_slice(r));
        assert_eq!(out, b"km.catch_xy(200)\r\n(2, 0)\r\n>>> ");
    }

    #[test]
    fn test_move_alias_and_wheel() {
        let mut shell = CommandShell::new();
        let mut mouse = VirtualMouse::new();

        assert_eq!(run(&mut shell, &mut mouse, b"m(5, -3)\n"), b"m(5, -3)\n>>> ");
        run(&mut shell, &mut mouse, b"km.wheel(-2)\n");
        let r = mouse.report();
        assert_eq!((r.x, r.y, r.wheel), (5, -3, -2));
    }
}
