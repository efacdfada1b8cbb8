// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{_prelude::*, obs};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`ApiClient::on_logout`](crate::client::ApiClient::on_logout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LogoutListenerId(u64);

/// Registry of callbacks fired when the session ends.
#[derive(Default)]
pub(crate) struct LogoutListeners {
	next_id: AtomicU64,
	listeners: Mutex<Vec<(LogoutListenerId, Listener)>>,
}
impl LogoutListeners {
	pub(crate) fn register(&self, listener: Listener) -> LogoutListenerId {
		let id = LogoutListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));

		self.listeners.lock().push((id, listener));

		id
	}

	pub(crate) fn remove(&self, id: LogoutListenerId) -> bool {
		let mut listeners = self.listeners.lock();
		let before = listeners.len();

		listeners.retain(|(existing, _)| *existing != id);

		listeners.len() != before
	}

	/// Invokes every listener outside the lock so callbacks may (de)register listeners.
	pub(crate) fn notify(&self) {
		let snapshot: Vec<Listener> =
			self.listeners.lock().iter().map(|(_, listener)| listener.clone()).collect();

		obs::log_logout(snapshot.len());

		for listener in snapshot {
			listener();
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.listeners.lock().len()
	}
}
