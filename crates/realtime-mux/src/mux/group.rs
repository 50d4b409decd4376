use crate::types::{ListenerId, ListenerKey};

/// Listener ids sharing one composite key, kept in registration order.
/// The callbacks themselves live in the registry.
#[derive(Debug)]
pub(crate) struct ListenerGroup {
	key: ListenerKey,
	members: Vec<ListenerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GroupChange {
	pub added: usize,
	pub removed: usize,
	pub total: usize,
}

impl ListenerGroup {
	pub fn new(key: ListenerKey) -> Self {
		Self { key, members: Vec::new() }
	}

	pub fn key(&self) -> &ListenerKey {
		&self.key
	}

	pub fn add(&mut self, id: ListenerId) -> GroupChange {
		let added = if self.contains(id) {
			0
		} else {
			self.members.push(id);
			1
		};

		GroupChange {
			added,
			removed: 0,
			total: self.members.len(),
		}
	}

	pub fn remove(&mut self, id: ListenerId) -> GroupChange {
		let removed = match self.members.iter().position(|member| *member == id) {
			Some(index) => {
				self.members.remove(index);
				1
			}
			None => 0,
		};

		GroupChange {
			added: 0,
			removed,
			total: self.members.len(),
		}
	}

	pub fn contains(&self, id: ListenerId) -> bool {
		self.members.contains(&id)
	}

	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}

	pub fn members(&self) -> &[ListenerId] {
		&self.members
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use realtime_provider::ChangeEvent;

	fn group() -> ListenerGroup {
		ListenerGroup::new(ListenerKey::new("orders", ChangeEvent::Insert, None))
	}

	#[test]
	fn test_add_keeps_registration_order() {
		let mut group = group();
		group.add(ListenerId::new(3));
		group.add(ListenerId::new(1));
		group.add(ListenerId::new(2));

		let order: Vec<u64> = group.members().iter().map(ListenerId::as_u64).collect();
		assert_eq!(order, vec![3, 1, 2]);
	}

	#[test]
	fn test_add_same_id_twice_is_ignored() {
		let mut group = group();
		assert_eq!(group.add(ListenerId::new(1)).added, 1);

		let change = group.add(ListenerId::new(1));
		assert_eq!(change.added, 0);
		assert_eq!(change.total, 1);
	}

	#[test]
	fn test_remove_only_that_member() {
		let mut group = group();
		group.add(ListenerId::new(1));
		group.add(ListenerId::new(2));

		let change = group.remove(ListenerId::new(1));
		assert_eq!(change.removed, 1);
		assert_eq!(change.total, 1);
		assert!(!group.contains(ListenerId::new(1)));
		assert!(group.contains(ListenerId::new(2)));

		assert_eq!(group.remove(ListenerId::new(1)).removed, 0);
	}

	#[test]
	fn test_empty_after_last_removal() {
		let mut group = group();
		group.add(ListenerId::new(1));
		group.remove(ListenerId::new(1));

		assert!(group.is_empty());
		assert_eq!(group.len(), 0);
		assert_eq!(group.key().table, "orders");
	}
}
