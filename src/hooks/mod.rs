//! Side-effect collaborators of the request pipeline
//!
//! The client never prints, exits or writes logs to a remote sink by itself.
//! It calls these traits, which the binary wires to the terminal and tests
//! replace with recorders.

mod report;

pub use report::{ErrorReport, ErrorReporter, HttpReporter, TracingReporter};

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Warning,
    Error,
}

/// Schedules navigation to the login route. Must not block the caller.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self, route: &str);
}

/// Shows a short message to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);
}

/// In a terminal, "redirecting to login" means telling the user how to log in.
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn redirect_to_login(&self, route: &str) {
        tracing::debug!("Login redirect requested ({})", route);
        eprintln!("Run 'bms-client login' to sign in again.");
    }
}

pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Warning => eprintln!("Warning: {}", message),
            NotifyLevel::Error => eprintln!("Error: {}", message),
        }
    }
}
