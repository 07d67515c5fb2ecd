//! warp-accel: Hardware offload for block compression and encryption
//!
//! Sits between the storage pipeline and an accelerator card:
//! - Contiguous DMA buffers with direct and virtually-mapped origins
//! - Independent compression and crypto instance pools
//! - Size-window eligibility and a runtime kill switch
//! - Bounded-wait offload calls with software fallback on any failure
//! - Per-direction counters
//!
//! ```no_run
//! use std::sync::Arc;
//! use warp_accel::{select_offload, AccelConfig, CompressDir, StubDevice};
//!
//! let offload = select_offload(&AccelConfig::default(), Some(Arc::new(StubDevice::new())))?;
//! let block = vec![0u8; 65536];
//! let mut out = vec![0u8; block.len()];
//! if offload.use_hw_for_compression(block.len()) {
//!     let n = offload.compress(CompressDir::Compress, &block, &mut out)?;
//!     println!("{n} bytes");
//! }
//! # Ok::<(), warp_accel::Error>(())
//! ```

pub mod backends;
pub mod completion;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod logging;
pub mod memory;
pub mod offload;
pub mod policy;
pub mod software;
pub mod stats;
pub mod types;

pub use config::AccelConfig;
pub use device::{AccelDevice, DeviceInfo, DeviceKind};
pub use engine::{AccelEngine, InitReport};
pub use error::{status_of, Error, ErrorSeverity, Result, STATUS_SUCCESS};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use memory::{ContigAllocator, ContigBuffer, MemOrigin, PhysPage};
pub use offload::{
    compress_or_else, crypt_or_else, select_offload, CryptRequest, HwOffload, NoopOffload,
    Offload, Route,
};
pub use policy::{AccelSwitch, Eligibility, SizeWindow};
pub use stats::{AccelStats, DirectionSnapshot, SharedStats, StatsSnapshot};
pub use types::{CompressDir, CryptKey, CryptMode, EncryptDir, OpClass};

#[cfg(feature = "stub")]
pub use backends::{Fault, StubDevice};
#[cfg(feature = "logging")]
pub use logging::init_logging;
