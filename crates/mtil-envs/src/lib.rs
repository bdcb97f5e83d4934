//! Reference environments for mtil.
//!
//! Small classic-control tasks used to smoke-test learners:
//! - `CartPole` - Pole balancing with two discrete pushes
//! - `ContinuousCartPole` - The same dynamics driven by a force in `[-1, 1]`

mod cartpole;

pub use cartpole::{CartPole, ContinuousCartPole};

/// Names accepted by [`make`]
pub const ENV_NAMES: &[&str] = &["cartpole", "continuous_cartpole"];

/// Construct an environment by name.
pub fn make(name: &str) -> Option<Box<dyn mtil::env::Env>> {
    match name {
        "cartpole" => Some(Box::new(CartPole::new())),
        "continuous_cartpole" => Some(Box::new(ContinuousCartPole::new())),
        _ => None,
    }
}
