//! Snapshot/restore encoding shared by the coprocessor device models.

pub mod io;
