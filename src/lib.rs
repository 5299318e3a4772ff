//! loadrig: in-process load, stress, spike and endurance testing.
//!
//! ```rust,no_run
//! use loadrig::loadtest::{LoadConfig, LoadTestRunner, OperationError};
//!
//! # async fn demo() -> Result<(), loadrig::loadtest::LoadTestError> {
//! let runner = LoadTestRunner::new(|| async {
//!     // call the system under test here
//!     Ok::<(), OperationError>(())
//! });
//! let result = runner
//!     .load_test(&LoadConfig {
//!         duration_secs: 10,
//!         users: 5,
//!         ramp_up_secs: 2,
//!         think_time_ms: 100,
//!     })
//!     .await?;
//! println!("{} requests, {:.1}% errors", result.total_requests, result.error_rate);
//! # Ok(())
//! # }
//! ```

pub mod loadtest;
