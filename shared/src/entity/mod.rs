//! `SeaORM` entities of the execution engine

pub mod trading_orders;
pub mod schedulers;
