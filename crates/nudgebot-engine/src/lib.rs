//! # Nudgebot Engine
//!
//! The reminder delivery and scheduling engine: a fixed-cadence tick that
//! discovers due reminders, claims each one exclusively through the store,
//! delivers with retry across ticks, advances recurring schedules in
//! place, and sends early-warning alerts ahead of the due time.
//!
//! ```text
//! Tick (tokio interval)
//!   ├── release stuck `processing` claims
//!   ├── Early-Alert pass:  window open? → send → mark alerted
//!   └── Due-Delivery pass: find due → claim → compose → send
//!          ├── success → recur (reset in place) or mark sent
//!          └── failure → retry next tick, or mark failed at the bound
//! ```

pub mod compose;
pub mod engine;
pub mod recurrence;

pub use compose::{Composer, LlmComposer, TemplateComposer};
pub use engine::{ReminderEngine, TickStats};
pub use recurrence::next_occurrence;
