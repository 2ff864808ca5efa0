//! Input gate
//!
//! Queues movement commands for the next tick and carries the flag that
//! suspends them, e.g. while a text field has focus.

/// One movement command, with axes in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputCommand {
    /// Planar movement relative to facing
    Move { strafe: f32, forward: f32 },
    /// Turn about the vertical axis; positive turns right
    Rotate(f32),
}

#[derive(Debug, Clone)]
pub struct InputGate {
    enabled: bool,
    pending: Vec<InputCommand>,
}

impl Default for InputGate {
    fn default() -> Self {
        Self {
            enabled: true,
            pending: Vec::new(),
        }
    }
}

impl InputGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable input; disabling discards queued commands
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.pending.clear();
        }
    }

    /// Queue a command for the next tick; dropped while disabled
    pub fn push(&mut self, command: InputCommand) {
        if self.enabled {
            self.pending.push(command);
        }
    }

    /// Take every queued command
    pub fn drain(&mut self) -> Vec<InputCommand> {
        std::mem::take(&mut self.pending)
    }
}
