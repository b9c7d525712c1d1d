//! Testing utilities and fake back-ends
//!
//! Lets the transport be exercised without a modem, a broker, or a name
//! server: a scriptable back-end whose link state is shared with the test, a
//! resolver that answers after a delay, and a clock the test advances by hand.

pub mod mocks;

pub use mocks::*;
