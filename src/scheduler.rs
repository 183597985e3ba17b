//! Time division of the single radio between the management and the data channel.
//!
//! ```text
//! START_MGMT -> MGMT -> START_RAW -> RAW -> START_MGMT ...
//! ```
//!
//! Each `MGMT` and `RAW` window lasts for its configured dwell time, measured on the
//! injected millisecond clock. While no session is connected the raw window is
//! skipped, so listening things and pending handshakes keep the radio.

use crate::clock::Deadline;

/// State of the scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Window {
    /// Tune to the management channel on the next tick.
    StartManagement,
    /// On the management channel.
    Management,
    /// Tune to the data channel on the next tick.
    StartRaw,
    /// On the data channel.
    Raw,
}

/// Work the caller performs for the current tick.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// Tune to the management channel and start listening.
    EnterManagement,
    /// Exchange management frames.
    Management,
    /// Tune to the data channel and start listening.
    EnterRaw,
    /// Exchange frames of the session in this slot.
    Raw(usize),
}

/// The four state machine driving the radio.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Scheduler {
    window: Window,
    deadline: Deadline,
    cursor: usize,
    management_dwell_ms: u32,
    raw_dwell_ms: u32,
}

impl Scheduler {
    /// Scheduler starting with a management window.
    pub fn new(management_dwell_ms: u32, raw_dwell_ms: u32) -> Self {
        Self {
            window: Window::StartManagement,
            deadline: Deadline::new(0, 0),
            cursor: 0,
            management_dwell_ms,
            raw_dwell_ms,
        }
    }

    /// Current window.
    pub fn window(&self) -> Window {
        self.window
    }

    /// Restarts the cycle with a management window on the next tick.
    pub fn restart(&mut self) {
        self.window = Window::StartManagement;
    }

    /// Moves the state machine forward and returns the work for this tick.
    ///
    /// Windows whose deadline passed are left within the same call. In the raw window
    /// the slots in `0..slots` for which `is_active` holds are served round-robin,
    /// one per tick.
    pub fn advance<F>(&mut self, now: u32, raw_active: bool, slots: usize, is_active: F) -> Action
    where
        F: Fn(usize) -> bool,
    {
        loop {
            match self.window {
                Window::StartManagement => {
                    self.deadline = Deadline::new(now, self.management_dwell_ms);
                    self.window = Window::Management;
                    return Action::EnterManagement;
                }
                Window::Management => {
                    if !self.deadline.is_expired(now) {
                        return Action::Management;
                    }
                    self.window = Window::StartRaw;
                }
                Window::StartRaw => {
                    if !raw_active {
                        self.window = Window::StartManagement;
                        continue;
                    }
                    self.deadline = Deadline::new(now, self.raw_dwell_ms);
                    self.window = Window::Raw;
                    return Action::EnterRaw;
                }
                Window::Raw => {
                    if !self.deadline.is_expired(now) {
                        if let Some(slot) = self.next_slot(slots, &is_active) {
                            return Action::Raw(slot);
                        }
                    }
                    // window over, or nobody left to serve
                    self.window = Window::StartManagement;
                }
            }
        }
    }

    fn next_slot<F>(&mut self, slots: usize, is_active: &F) -> Option<usize>
    where
        F: Fn(usize) -> bool,
    {
        let slot = (0..slots)
            .map(|i| (self.cursor + i) % slots)
            .find(|&i| is_active(i))?;
        self.cursor = (slot + 1) % slots;
        Some(slot)
    }
}
