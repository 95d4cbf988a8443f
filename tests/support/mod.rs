//! Helpers shared by integration tests.

#![allow(dead_code)]

pub mod socket_guard;
pub mod stubs;
