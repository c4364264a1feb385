// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The Periscope side never initiates a handshake: it waits for any
//! kind-0 service message, records the sender as its target and replies
//! `0:ACTIVE` (see [`super::Session::on_handshake_request`]). It also
//! turns incoming kind-1 messages into tubes and an
//! [`super::SessionEvent::OpenTube`] for the endpoint loop to act on,
//! instead of creating tubes from a local accept as Submarine does.

use std::sync::Arc;

use tokio::sync::mpsc::{Sender, UnboundedSender};

use crate::carrier::CarrierClient;
use crate::session::{Role, Session, SessionEvent};
use crate::throttle::OutboundItem;

pub fn new_periscope<C: CarrierClient>(
	local_pk: String,
	carrier: Arc<C>,
	outbound_tx: Sender<OutboundItem>,
	events_tx: UnboundedSender<SessionEvent>,
) -> Arc<Session<C>> {
	Session::new(Role::Periscope, local_pk, carrier, outbound_tx, events_tx)
}
