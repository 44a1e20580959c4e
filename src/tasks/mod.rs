//! Periodic background tasks driving the persistence coordinator

pub mod aggregation;
pub mod retention;
