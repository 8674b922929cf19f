pub mod clock;
pub mod timeout;

pub use clock::{Clock, SystemClock};
pub use timeout::run_with_timeout;
