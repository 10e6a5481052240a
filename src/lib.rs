#![doc = include_str!("../RUSTDOC.md")]

pub mod app;
pub mod component;
pub mod firestore;
pub(crate) mod platform;

#[cfg(test)]
pub mod test_support;
