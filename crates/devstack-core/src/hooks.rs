//! Companion lifecycle hooks

use std::fmt;

/// Lifecycle callbacks a module may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// After discovery
    OnInit,
    /// After the command line has been set up
    OnCliInit,
    /// Before the module's services start
    BeforeStart,
    /// Before status is reported
    BeforeStatus,
}

impl Hook {
    /// Key under which the hook is declared
    pub fn key(&self) -> &'static str {
        match self {
            Hook::OnInit => "on_init",
            Hook::OnCliInit => "on_cli_init",
            Hook::BeforeStart => "before_start",
            Hook::BeforeStatus => "before_status",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
