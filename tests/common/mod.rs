#![allow(dead_code)]

pub mod fixtures;
pub mod stubs;
pub mod wiremock_helpers;
