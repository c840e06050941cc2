//! Logmirror Test Utilities
//!
//! In-memory stand-ins for the collaborators logmirror talks to over ssh,
//! the storage CLI, mail and HTTP. Each one records what it was asked so
//! tests can assert on alerts and metrics without a network.
//!
//! # Usage
//!
//! ```rust,ignore
//! use logmirror_test_utils::{FakeRemote, RecordingMetrics, RecordingNotifier};
//!
//! let remote = FakeRemote::new();
//! remote.add_file("dk@ded5128.example.net", "imp_log_V02_ded5128_2016-05-09_21_0.log", b"a\n", 30);
//! ```

pub mod recorders;
pub mod remote;
pub mod storage;

// Re-exports for convenience
pub use recorders::{RecordedAlert, RecordingMetrics, RecordingNotifier};
pub use remote::FakeRemote;
pub use storage::FakeStorage;

/// Hex md5 digest, the checksum format every stage uses
pub fn md5_hex(content: &[u8]) -> String {
    format!("{:x}", md5::compute(content))
}
