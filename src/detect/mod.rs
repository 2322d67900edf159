#[cfg(feature = "provider-http")]
mod http;
mod parse;
mod provider;
mod record;

#[cfg(feature = "provider-http")]
pub use http::{HttpProvider, HttpProviderConfig};
pub use parse::{parse_entry, parse_response};
pub use provider::{DetectionProvider, StubProvider};
pub use record::{confidence_label, DetectionBatch, DetectionRecord, MISSING_CLASS};
