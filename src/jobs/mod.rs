//! Recurring background jobs

pub mod expire_holds;
