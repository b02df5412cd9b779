//! Cucumber support code and step definitions


pub use support::TestWorld;
