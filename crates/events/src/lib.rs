//! Run outcome events: an in-process bus and the journal that logs it.

pub mod bus;
pub mod journal;

pub use bus::{EventBus, RunEvent, RunOutcome};
pub use journal::RunJournal;
