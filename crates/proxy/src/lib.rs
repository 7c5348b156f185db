pub mod dns;

pub use dns::forwarder::Forwarder;

/// Library version, stable for the lifetime of the process.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
