// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Tokio bridge between local TCP sockets and `tunnel-core` Tubes.
//!
//! Each accepted/opened connection gets one reader task and one writer
//! task (see [`common::spawn_pipe`]) instead of the single-threaded
//! `select()` loop the reference implementation used — §5 of the design
//! explicitly allows substituting asynchronous I/O tasks for threads
//! without changing the protocol's semantics.

pub mod common;
pub mod periscope;
pub mod submarine;
