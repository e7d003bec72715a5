//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestHistory;
//!
//! #[test]
//! fn test_list() {
//!     let history = TestHistory::new();
//!     history.insert("legacy", None, "import", BatchStatus::Completed);
//! }
//! ```

mod fixtures;
mod launcher;

pub use fixtures::TestHistory;
#[allow(unused_imports)]
pub use launcher::RecordingLauncher;
