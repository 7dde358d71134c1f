pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{FlushOutcome, TimerController, TimerSnapshot};
pub use state::{Handoff, LifecycleEvent, TimerState, Visibility};
