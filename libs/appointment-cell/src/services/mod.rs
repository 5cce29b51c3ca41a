pub mod booking;
pub mod clients;
pub mod engine;
pub mod hold;
pub mod lifecycle;
pub mod notifications;
pub mod view;

pub use booking::BookingPolicyGuard;
pub use engine::SchedulingEngine;
pub use hold::HoldTimers;
pub use lifecycle::{AppointmentLifecycleService, TransitionPlan};
pub use notifications::{LogNotificationSender, NotificationSender, StatusNotification};
pub use view::{ScheduleView, ViewSnapshot};
