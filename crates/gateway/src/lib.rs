//! Gateway wiring, exposed as a library so the binary stays thin.

pub mod app;
