/// Bytes charged for an item's identifier in memory accounting.
pub const ID_SIZE: usize = std::mem::size_of::<i64>();

/// The unit of work held by the queue: an identifier and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub id: i64,
    pub data: Vec<u8>,
}

impl QueuedItem {
    pub fn new(id: i64, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Accounted size: the 8-byte identifier plus the payload length.
    pub fn size(&self) -> usize {
        ID_SIZE + self.data.len()
    }
}

/// Orders items by ascending identifier, which is FIFO order.
pub fn sort_by_id(items: &mut [QueuedItem]) {
    items.sort_unstable_by_key(|item| item.id);
}
