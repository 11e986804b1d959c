pub mod cache;
pub mod cli;
pub mod client;
pub mod decode;
pub mod extrinsic;
pub mod logging;
pub mod moonbeam;
pub mod node;

pub use client::{ChainClient, ChainDialect, ClientError, Identity, ScanContext};
pub use extrinsic::{Extrinsic, ExtrinsicFilter, ExtrinsicKind, Param, ParamKind};
pub use moonbeam::MoonbeamClient;
