//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod policy;
mod sweeper;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::RateLimitKey;
pub use limiter::RateLimiter;
pub use policy::{
    default_rules, IdentitySource, Policy, PolicyCatalog, PolicyFile, PolicyRule, WindowLimit,
    DEFAULT_MESSAGE, MAX_WINDOW_MS,
};
pub use sweeper::{default_sweep_interval, Sweeper};
pub use window::{Decision, WindowStore};
