// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Runtime-agnostic core of a TCP tunnel smuggled inside Lightning Network
//! payment payloads. This crate has no opinion on how local TCP sockets
//! are bridged in; see `tunnel-net-tokio` for the Tokio-based endpoint
//! loops that bind Submarine and Periscope to real sockets.

pub mod carrier;
pub mod config;
pub mod crypt;
pub mod error;
pub mod packet;
pub mod session;
pub mod throttle;
pub mod tube;

pub use carrier::CarrierClient;
pub use error::TunnelError;
pub use session::{Role, Session, SessionEvent};
pub use tube::TubeId;
