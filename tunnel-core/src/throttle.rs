// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! A fixed-interval pacer: exactly one packet leaves the wire per tick,
//! either a real queued packet or, with cover traffic enabled and the
//! queue empty, a freshly timestamped dummy. This decouples wire cadence
//! from queue depth, which is the whole point (§4.5): an observer watching
//! the carrier cannot tell an idle tunnel from a busy one.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::packet::DUMMY_TUBE_ID;
use crate::tube::TubeId;

/// One item pulled off the outbound queue (or a synthesized dummy).
#[derive(Debug, Clone)]
pub struct OutboundItem {
	pub payload: Vec<u8>,
	pub packet_idx: u64,
	pub tube_id: TubeId,
}

impl OutboundItem {
	fn dummy() -> Self {
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default();
		OutboundItem {
			payload: format!("{}.{:09}", now.as_secs(), now.subsec_nanos()).into_bytes(),
			packet_idx: 0,
			tube_id: DUMMY_TUBE_ID,
		}
	}
}

/// A running throttle task. Dropping or calling [`Throttle::shutdown`]
/// stops further ticks; any in-flight send is allowed to finish.
pub struct Throttle {
	shutdown: Arc<Notify>,
	handle: JoinHandle<()>,
}

impl Throttle {
	/// Spawns the pacer task. `send` is called once per released item and
	/// must not be awaited by the pacer loop itself — each call runs as an
	/// independent task so a slow carrier round-trip never drops the rate.
	pub fn spawn<F, Fut>(interval: Duration, queue: mpsc::Receiver<OutboundItem>, cover_traffic: bool, send: F) -> Self
	where
		F: Fn(OutboundItem) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let shutdown = Arc::new(Notify::new());
		let task_shutdown = shutdown.clone();
		let send = Arc::new(send);

		let handle = tokio::spawn(async move {
			let mut queue = queue;
			let mut ticker = tokio::time::interval(interval);
			loop {
				tokio::select! {
					_ = task_shutdown.notified() => break,
					_ = ticker.tick() => {
						let item = if cover_traffic {
							match queue.try_recv() {
								Ok(item) => item,
								Err(_) => OutboundItem::dummy(),
							}
						} else {
							match queue.recv().await {
								Some(item) => item,
								None => break, // queue closed, nothing left to throttle
							}
						};

						let send = send.clone();
						tokio::spawn(async move { send(item).await });
					}
				}
			}
		});

		Throttle { shutdown, handle }
	}

	/// Signals the pacer to stop after its current wait. Does not wait for
	/// in-flight sends spawned by earlier ticks.
	pub fn shutdown(&self) {
		self.shutdown.notify_one();
	}

	pub async fn join(self) {
		let _ = self.handle.await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use tokio::sync::mpsc;

	#[tokio::test(start_paused = true)]
	async fn releases_exactly_one_item_per_tick() {
		let (tx, rx) = mpsc::channel(16);
		let released = Arc::new(AtomicUsize::new(0));
		let released_clone = released.clone();

		let throttle = Throttle::spawn(Duration::from_millis(10), rx, false, move |_item| {
			let released = released_clone.clone();
			async move {
				released.fetch_add(1, Ordering::SeqCst);
			}
		});

		for i in 0..3 {
			tx.send(OutboundItem { payload: vec![i], packet_idx: i as u64, tube_id: 1 }).await.unwrap();
		}

		tokio::time::advance(Duration::from_millis(35)).await;
		tokio::task::yield_now().await;
		assert_eq!(released.load(Ordering::SeqCst), 3);

		throttle.shutdown();
		throttle.join().await;
	}

	#[tokio::test(start_paused = true)]
	async fn injects_dummy_when_queue_empty_and_cover_enabled() {
		let (_tx, rx) = mpsc::channel::<OutboundItem>(16);
		let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
		let seen_clone = seen.clone();

		let throttle = Throttle::spawn(Duration::from_millis(10), rx, true, move |item| {
			let seen = seen_clone.clone();
			async move {
				seen.lock().unwrap().push(item.tube_id);
			}
		});

		tokio::time::advance(Duration::from_millis(25)).await;
		tokio::task::yield_now().await;

		let seen = seen.lock().unwrap();
		assert!(seen.iter().all(|&id| id == DUMMY_TUBE_ID));
		assert!(seen.len() >= 2);

		drop(seen);
		throttle.shutdown();
		throttle.join().await;
	}
}
