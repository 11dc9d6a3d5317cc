//! Core command types: Button, Axis, Terminator.

/// One of the five logical mouse buttons.
///
/// The discriminant is the button's index and bit position in the outgoing
/// report's button byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Button {
    Left = 0,
    Right = 1,
    Middle = 2,
    Side1 = 3,
    Side2 = 4,
}

impl Button {
    /// Number of logical buttons.
    pub const COUNT: usize = 5;

    /// All buttons in bit order.
    pub const ALL: [Button; Self::COUNT] = [
        Button::Left,
        Button::Right,
        Button::Middle,
        Button::Side1,
        Button::Side2,
    ];

    /// Mask covering every logical button bit.
    pub const MASK_ALL: u8 = 0x1F;

    /// Look up a button by index (`0..=4`).
    #[inline]
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Button::Left),
            1 => Some(Button::Right),
            2 => Some(Button::Middle),
            3 => Some(Button::Side1),
            4 => Some(Button::Side2),
            _ => None,
        }
    }

    /// Index in `0..=4`.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Bit mask in the report's button byte.
    #[inline]
    #[must_use]
    pub const fn mask(self) -> u8 {
        1 << (self as u8)
    }

    /// Command name, as in `km.<name>(1)`.
    #[must_use]
    pub const fn name(self) -> &'static [u8] {
        match self {
            Button::Left => b"left",
            Button::Right => b"right",
            Button::Middle => b"middle",
            Button::Side1 => b"side1",
            Button::Side2 => b"side2",
        }
    }

    /// Lock short name, as in `km.lock_<short>(1)`.
    #[must_use]
    pub const fn short_name(self) -> &'static [u8] {
        match self {
            Button::Left => b"ml",
            Button::Right => b"mr",
            Button::Middle => b"mm",
            Button::Side1 => b"ms1",
            Button::Side2 => b"ms2",
        }
    }

    /// Find the button whose command name equals `name`.
    #[must_use]
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    /// Find the button whose lock short name equals `short`.
    #[must_use]
    pub fn from_short_name(short: &[u8]) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.short_name() == short)
    }
}

/// Movement axis that can be locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
}

/// Line terminator of a completed command line.
///
/// Remembered so the echo can reproduce the caller's choice byte for byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Terminator {
    Cr,
    #[default]
    Lf,
    CrLf,
}

impl Terminator {
    /// Raw terminator bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Terminator::Cr => b"\r",
            Terminator::Lf => b"\n",
            Terminator::CrLf => b"\r\n",
        }
    }

    /// Length in bytes (1 or 2).
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Terminator::CrLf => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_bits_are_stable() {
        assert_eq!(Button::Left.mask(), 0x01);
        assert_eq!(Button::Right.mask(), 0x02);
        assert_eq!(Button::Middle.mask(), 0x04);
        assert_eq!(Button::Side1.mask(), 0x08);
        assert_eq!(Button::Side2.mask(), 0x10);
        let all = Button::ALL.iter().fold(0u8, |acc, b| acc | b.mask());
        assert_eq!(all, Button::MASK_ALL);
    }

    #[test]
    fn test_button_name_lookup() {
        assert_eq!(Button::from_name(b"side1"), Some(Button::Side1));
        assert_eq!(Button::from_name(b"Left"), None);
        assert_eq!(Button::from_short_name(b"ms2"), Some(Button::Side2));
        assert_eq!(Button::from_short_name(b"mx"), None);
    }

    #[test]
    fn test_button_from_index_bounds() {
        assert_eq!(Button::from_index(2), Some(Button::Middle));
        assert_eq!(Button::from_index(5), None);
    }

    #[test]
    fn test_terminator_bytes() {
        assert_eq!(Terminator::CrLf.as_bytes(), b"\r\n");
        assert_eq!(Terminator::Cr.len(), 1);
    }
}
