use crate::types::{Callback, ListenerId, ListenerKey};
use std::collections::HashMap;

/// One caller's subscription
pub(crate) struct Registration {
	pub key: ListenerKey,
	pub callback: Callback,
}

/// Arena of registrations keyed by monotonically assigned ids
#[derive(Default)]
pub(crate) struct Registry {
	last_id: u64,
	records: HashMap<ListenerId, Registration>,
}

impl Registry {
	pub fn allocate(&mut self, key: ListenerKey, callback: Callback) -> ListenerId {
		self.last_id += 1;
		let id = ListenerId::new(self.last_id);
		self.records.insert(id, Registration { key, callback });
		id
	}

	pub fn get(&self, id: ListenerId) -> Option<&Registration> {
		self.records.get(&id)
	}

	pub fn remove(&mut self, id: ListenerId) -> Option<Registration> {
		self.records.remove(&id)
	}

	pub fn contains(&self, id: ListenerId) -> bool {
		self.records.contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Takes every registration on `table` out of the arena.
	pub fn remove_table(&mut self, table: &str) -> Vec<Registration> {
		let ids: Vec<ListenerId> = self.records.iter().filter(|(_, record)| record.key.table == table).map(|(id, _)| *id).collect();
		ids.into_iter().filter_map(|id| self.records.remove(&id)).collect()
	}

	/// Takes everything out. Ids keep increasing afterwards.
	pub fn clear(&mut self) -> Vec<Registration> {
		self.records.drain().map(|(_, record)| record).collect()
	}
}
