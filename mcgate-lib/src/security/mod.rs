pub mod access;

pub use access::{evaluate, sni_allowed, Identity, ListResolver};
