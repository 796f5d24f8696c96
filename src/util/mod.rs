pub mod log_throttle;

pub use log_throttle::LogThrottle;
