pub mod display;
pub mod icons;
pub mod reporter;

pub use display::{format_duration, render_next, render_remaining, render_sessions, render_status};
pub use reporter::RunReporter;
