//! Status event hooks for the LED collaborator.

use heapless::Vec;

/// Which USB stack a reset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackTarget {
    Device,
    Host,
    Both,
}

impl StackTarget {
    #[must_use]
    pub fn includes_device(self) -> bool {
        matches!(self, Self::Device | Self::Both)
    }

    #[must_use]
    pub fn includes_host(self) -> bool {
        matches!(self, Self::Host | Self::Both)
    }

    /// Smallest target covering both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if self == other {
            self
        } else {
            Self::Both
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusEvent {
    /// A command or report passed through.
    ActivityFlash,
    /// The upstream device went away.
    DisconnectFlash,
    /// Connection or suspend state changed.
    StatusChanged,
    ResetPending(StackTarget),
    ResetSuccess(StackTarget),
    ResetFailed(StackTarget),
}

/// Receiver of status events.
pub trait EventSink {
    fn emit(&mut self, event: StatusEvent);
}

impl<T: EventSink + ?Sized> EventSink for &mut T {
    fn emit(&mut self, event: StatusEvent) {
        (**self).emit(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl EventSink for NoEvents {
    fn emit(&mut self, _event: StatusEvent) {}
}

/// Bounded in-memory record; events past capacity are counted, not kept.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<StatusEvent, 32>,
    dropped: u32,
}

impl EventLog {
    #[must_use]
    pub fn events(&self) -> &[StatusEvent] {
        &self.events
    }

    #[must_use]
    pub fn contains(&self, event: StatusEvent) -> bool {
        self.events.contains(&event)
    }

    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: StatusEvent) {
        if self.events.push(event).is_err() {
            self.dropped += 1;
        }
    }
}
