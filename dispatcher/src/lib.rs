//! Scheduled order execution: trigger evaluation, TWAP slicing, pricing and
//! the lease-based dispatcher that fires due orders.

pub mod clients;
pub mod repositories;
pub mod services;
pub mod state;

pub use services::{Dispatcher, OrderIntake, PollReport};
pub use state::AppState;
