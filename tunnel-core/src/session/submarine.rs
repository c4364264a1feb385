// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The Submarine side initiates the handshake (`register`) and creates
//! tubes locally before announcing them; see [`super::Session::register`]
//! and [`super::Session::open_tube`]. Nothing here differs structurally
//! from [`super::periscope`] — the asymmetry lives entirely in which
//! `Role` is passed to [`super::Session::new`].

use std::sync::Arc;

use tokio::sync::mpsc::{Sender, UnboundedSender};

use crate::carrier::CarrierClient;
use crate::session::{Role, Session, SessionEvent};
use crate::throttle::OutboundItem;

pub fn new_submarine<C: CarrierClient>(
	local_pk: String,
	carrier: Arc<C>,
	outbound_tx: Sender<OutboundItem>,
	events_tx: UnboundedSender<SessionEvent>,
) -> Arc<Session<C>> {
	Session::new(Role::Submarine, local_pk, carrier, outbound_tx, events_tx)
}
