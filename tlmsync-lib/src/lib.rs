#![doc = include_str!("../README.md")]

mod error;

pub mod framing;

pub use error::{Error, Result};
