//! Resilient task dispatch.
//!
//! Background tasks are routed to a broker queue by name and submitted
//! through a [`CircuitBreaker`] so that a dead broker fails fast instead of
//! stalling every caller. Nothing here retries.

mod circuit_breaker;
mod error;
mod gateway;
mod router;
mod suppress;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use error::{DispatchError, FailureKind};
pub use gateway::{Broker, DispatchGateway, TaskMessage};
pub use router::TaskRouter;
pub use suppress::{recover, suppress};
