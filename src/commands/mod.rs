pub mod general;
pub mod verify;

pub use general::{help, ping};
pub use verify::{verify, verify_panel};
