pub mod clock;
pub mod error;
pub mod tenant;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::AppError;
pub use tenant::ProfessionalId;
