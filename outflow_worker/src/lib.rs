//! Outflow worker: wires the store, connector clients, activities and the
//! local workflow engine into one process.

pub mod app;
pub mod cli;
