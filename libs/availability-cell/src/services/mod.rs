pub mod exceptions;
pub mod interval;
pub mod slots;
pub mod template;

pub use exceptions::{booked_id, ExceptionOverlay};
pub use slots::{effective_intervals, generate, Slot, SlotQuery, MIN_GRANULARITY_MINUTES};
pub use template::{AvailabilityEditor, IntervalBound, TemplateKey};
