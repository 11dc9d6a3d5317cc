//! HID report descriptors: the default composite layout, a short-item
//! walker for upstream descriptors, and the runtime splice.

use heapless::Vec;

use crate::config::MAX_REPORT_DESCRIPTOR_LEN;

/// Report IDs on the downstream composite.
pub const KEYBOARD_REPORT_ID: u8 = 1;
pub const MOUSE_REPORT_ID: u8 = 2;
pub const CONSUMER_REPORT_ID: u8 = 3;

/// Input bits of the canonical mouse report (buttons, X, Y, wheel, pan).
pub const CANONICAL_MOUSE_INPUT_BITS: u32 = 40;

/// Runtime report descriptor storage.
pub type ReportDescriptor = Vec<u8, MAX_REPORT_DESCRIPTOR_LEN>;

/// Boot-style keyboard, report ID 1. Present but never driven.
pub const KEYBOARD_SEGMENT: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, KEYBOARD_REPORT_ID, // Report ID (1)
    //
    //   - Modifiers -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    //
    //   - Reserved byte -
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant)
    //
    //   - LED output -
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (Num Lock)
    0x29, 0x05, //   Usage Maximum (Kana)
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant)
    //
    //   - Key array -
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0xFF, //   Usage Maximum (255)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];

/// Five-button mouse with wheel and AC pan, report ID 2.
pub const MOUSE_SEGMENT: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, MOUSE_REPORT_ID, // Report ID (2)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    //
    //     - Buttons (5 bits + 3 padding) -
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (Button 1)
    0x29, 0x05, //     Usage Maximum (Button 5)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x05, //     Report Count (5)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute)
    0x95, 0x01, //     Report Count (1)
    0x75, 0x03, //     Report Size (3)
    0x81, 0x01, //     Input (Constant)
    //
    //     - X, Y, wheel -
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x03, //     Report Count (3)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    //
    //     - Horizontal pan -
    0x05, 0x0C, //     Usage Page (Consumer)
    0x0A, 0x38, 0x02, //     Usage (AC Pan)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x01, //     Report Count (1)
    0x81, 0x06, //     Input (Data, Variable, Relative)
    0xC0, //   End Collection
    0xC0, // End Collection
];

/// Single 16-bit consumer usage, report ID 3.
pub const CONSUMER_SEGMENT: &[u8] = &[
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, CONSUMER_REPORT_ID, // Report ID (3)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x03, //   Logical Maximum (1023)
    0x19, 0x00, //   Usage Minimum (0)
    0x2A, 0xFF, 0x03, //   Usage Maximum (1023)
    0x75, 0x10, //   Report Size (16)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];

/// Item prefixes that matter to the walker.
const ITEM_INPUT: u8 = 0x80;
const ITEM_COLLECTION: u8 = 0xA0;
const ITEM_END_COLLECTION: u8 = 0xC0;
const ITEM_USAGE_PAGE: u8 = 0x04;
const ITEM_REPORT_SIZE: u8 = 0x74;
const ITEM_REPORT_ID: u8 = 0x84;
const ITEM_REPORT_COUNT: u8 = 0x94;
const ITEM_USAGE: u8 = 0x08;
const LONG_ITEM: u8 = 0xFE;

const USAGE_PAGE_GENERIC_DESKTOP: u32 = 0x01;
const USAGE_MOUSE: u32 = 0x02;
const USAGE_KEYBOARD: u32 = 0x06;
const COLLECTION_APPLICATION: u32 = 0x01;

/// What the walker learned about an upstream descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescriptorInfo {
    pub has_mouse: bool,
    pub has_keyboard: bool,
    /// Report ID of the mouse collection, if the device uses IDs.
    pub mouse_report_id: Option<u8>,
    /// Report ID of the keyboard collection, if the device uses IDs.
    pub keyboard_report_id: Option<u8>,
    /// Total input bits declared inside the mouse collection.
    pub mouse_input_bits: u32,
    /// Byte range `(start, end)` of the top-level mouse collection,
    /// including the usage items that precede it.
    pub mouse_segment: Option<(usize, usize)>,
}

impl DescriptorInfo {
    /// The mouse collection matches the canonical 5-byte input layout.
    #[must_use]
    pub fn mouse_is_canonical(&self) -> bool {
        self.mouse_segment.is_some() && self.mouse_input_bits == CANONICAL_MOUSE_INPUT_BITS
    }
}

/// One short item.
#[derive(Debug, Clone, Copy)]
struct Item<'a> {
    offset: usize,
    /// Prefix with the size bits cleared.
    kind: u8,
    data: &'a [u8],
}

impl Item<'_> {
    fn value(&self) -> u32 {
        self.data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
    }

    fn end(&self) -> usize {
        self.offset + 1 + self.data.len()
    }
}

/// Iterate short items; long items are skipped, truncation ends the walk.
fn items(bytes: &[u8]) -> impl Iterator<Item = Item<'_>> + '_ {
    let mut cursor = 0;
    core::iter::from_fn(move || loop {
        let offset = cursor;
        let prefix = *bytes.get(offset)?;
        if prefix == LONG_ITEM {
            let len = usize::from(*bytes.get(offset + 1)?);
            cursor = offset + 3 + len;
            continue;
        }
        let len = match prefix & 0x03 {
            3 => 4,
            n => usize::from(n),
        };
        let data = bytes.get(offset + 1..offset + 1 + len)?;
        cursor = offset + 1 + len;
        return Some(Item {
            offset,
            kind: prefix & 0xFC,
            data,
        });
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Application {
    Mouse,
    Keyboard,
    Other,
}

/// Walk a report descriptor and describe its mouse and keyboard
/// application collections.
#[must_use]
pub fn inspect(bytes: &[u8]) -> DescriptorInfo {
    let mut info = DescriptorInfo::default();

    let mut usage_page = 0u32;
    let mut usage = 0u32;
    let mut report_size = 0u32;
    let mut report_count = 0u32;
    let mut depth = 0usize;
    let mut segment_start = 0usize;
    let mut current = Application::Other;

    for item in items(bytes) {
        match item.kind {
            ITEM_USAGE_PAGE => usage_page = item.value(),
            ITEM_USAGE => {
                // Four-byte usages carry their own page.
                usage = if item.data.len() == 4 {
                    item.value() & 0xFFFF
                } else {
                    item.value()
                };
            }
            ITEM_REPORT_SIZE => report_size = item.value(),
            ITEM_REPORT_COUNT => report_count = item.value(),
            ITEM_REPORT_ID => {
                let id = item.value() as u8;
                match current {
                    Application::Mouse => info.mouse_report_id = Some(id),
                    Application::Keyboard => info.keyboard_report_id = Some(id),
                    Application::Other => {}
                }
            }
            ITEM_COLLECTION => {
                if depth == 0 && item.value() == COLLECTION_APPLICATION {
                    current = match (usage_page, usage) {
                        (USAGE_PAGE_GENERIC_DESKTOP, USAGE_MOUSE) if !info.has_mouse => {
                            info.has_mouse = true;
                            Application::Mouse
                        }
                        (USAGE_PAGE_GENERIC_DESKTOP, USAGE_KEYBOARD) => {
                            info.has_keyboard = true;
                            Application::Keyboard
                        }
                        _ => Application::Other,
                    };
                }
                depth += 1;
            }
            ITEM_END_COLLECTION => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if current == Application::Mouse {
                        info.mouse_segment = Some((segment_start, item.end()));
                    }
                    current = Application::Other;
                    segment_start = item.end();
                }
            }
            ITEM_INPUT if current == Application::Mouse => {
                info.mouse_input_bits += report_size * report_count;
            }
            _ => {}
        }
    }

    info
}

/// The fixed keyboard + mouse + consumer descriptor.
#[must_use]
pub fn default_descriptor() -> ReportDescriptor {
    let mut out = ReportDescriptor::new();
    // The three segments fit well within capacity.
    let _ = out.extend_from_slice(KEYBOARD_SEGMENT);
    let _ = out.extend_from_slice(MOUSE_SEGMENT);
    let _ = out.extend_from_slice(CONSUMER_SEGMENT);
    out
}

/// Splice the upstream mouse collection between the local keyboard and
/// consumer segments, renumbering it to report ID 2.
///
/// Returns `None` unless the upstream mouse uses the canonical input
/// layout, since the downstream reports are always emitted in that shape.
#[must_use]
pub fn splice(upstream: &[u8], info: &DescriptorInfo) -> Option<ReportDescriptor> {
    if !info.mouse_is_canonical() {
        return None;
    }
    let (start, end) = info.mouse_segment?;
    let segment = upstream.get(start..end)?;

    let mut out = ReportDescriptor::new();
    out.extend_from_slice(KEYBOARD_SEGMENT).ok()?;

    let mut id_written = false;
    for item in items(segment) {
        if item.kind == ITEM_REPORT_ID {
            continue;
        }
        out.extend_from_slice(&segment[item.offset..item.end()]).ok()?;
        if !id_written && item.kind == ITEM_COLLECTION {
            out.extend_from_slice(&[ITEM_REPORT_ID | 0x01, MOUSE_REPORT_ID]).ok()?;
            id_written = true;
        }
    }

    out.extend_from_slice(CONSUMER_SEGMENT).ok()?;
    Some(out)
}
