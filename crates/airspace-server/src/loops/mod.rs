//! Background loops for continuous processing.

pub mod retention_loop;
