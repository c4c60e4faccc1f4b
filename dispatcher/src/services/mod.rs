pub mod cron;
pub mod dispatcher;
pub mod order_intake;
pub mod order_state;
pub mod price_engine;
pub mod retry;
pub mod trigger;
pub mod twap;

pub use dispatcher::{Dispatcher, PollReport};
pub use order_intake::{OrderIntake, OrderRequest, ScheduleRequest, SubmittedOrder};
