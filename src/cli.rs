//! Pieces shared by the command-line tools.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use crate::format::ResyncPolicy;

/// `--resync` argument values.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncArg {
    /// Retry at every following byte
    Byte,
    /// Retry at the next alignment boundary
    Aligned,
}

impl From<ResyncArg> for ResyncPolicy {
    fn from(r: ResyncArg) -> Self {
        match r {
            ResyncArg::Byte => ResyncPolicy::ByteByByte,
            ResyncArg::Aligned => ResyncPolicy::Aligned,
        }
    }
}

/// Log to stderr at `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
