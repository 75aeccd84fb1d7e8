//! Effects: the only code that touches devices, files or the network.

#[cfg(feature = "native")]
pub mod audio;
pub mod http;
pub mod import;
pub mod probe;
pub mod simulated;
