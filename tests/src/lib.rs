//! # Float Bridge Test Suite
//!
//! Cross-crate scenarios for the supervisory control plane.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── bootstrap.rs   # parameter verification gates startup
//!     ├── lifecycle.rs   # start/stop state machine and exit signal
//!     ├── modes.rs       # split-trust topology per mode
//!     └── network.rs     # real TCP collaborators end to end
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bridge-tests
//! cargo test -p bridge-tests integration::network::
//! ```

pub mod integration;
