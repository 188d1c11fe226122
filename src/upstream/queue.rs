//! In-flight exchanges of one client connection, in request order.

use std::collections::VecDeque;

use crate::downstream::{Exchange, ExchangeId};

/// FIFO of exchanges. The back receives request bytes; only the front may
/// complete its response.
///
/// Exchange ids are assigned sequentially and removal only happens at the
/// front, so the ids held here are contiguous and lookup is an index.
#[derive(Debug, Default)]
pub struct PipelineQueue {
    exchanges: VecDeque<Exchange>,
}

impl PipelineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, exchange: Exchange) {
        debug_assert!(self
            .exchanges
            .back()
            .map_or(true, |back| back.id().next() == exchange.id()));
        self.exchanges.push_back(exchange);
    }

    pub fn pop_front(&mut self) -> Option<Exchange> {
        self.exchanges.pop_front()
    }

    pub fn front(&self) -> Option<&Exchange> {
        self.exchanges.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut Exchange> {
        self.exchanges.front_mut()
    }

    pub fn back(&self) -> Option<&Exchange> {
        self.exchanges.back()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn get_mut(&mut self, id: ExchangeId) -> Option<&mut Exchange> {
        let index = self.index_of(id)?;
        self.exchanges.get_mut(index)
    }

    pub fn get(&self, id: ExchangeId) -> Option<&Exchange> {
        let index = self.index_of(id)?;
        self.exchanges.get(index)
    }

    /// Remove the front exchange, which must be `id`.
    ///
    /// # Panics
    /// If `id` is not the front. Completing any other exchange would put
    /// responses on the wire out of request order.
    pub fn retire(&mut self, id: ExchangeId) -> Exchange {
        match self.exchanges.pop_front() {
            Some(front) if front.id() == id => front,
            front => panic!(
                "pipeline order violation: retiring {} while front is {:?}",
                id,
                front.map(|exchange| exchange.id())
            ),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    fn index_of(&self, id: ExchangeId) -> Option<usize> {
        let front = self.exchanges.front()?.id().as_u64();
        let offset = id.as_u64().checked_sub(front)?;
        usize::try_from(offset).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(ids: std::ops::Range<u64>) -> PipelineQueue {
        let mut queue = PipelineQueue::new();
        for id in ids {
            queue.push_back(Exchange::new(ExchangeId::new(id)));
        }
        queue
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = queue_of(1..4);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.front().unwrap().id(), ExchangeId::new(1));
        assert_eq!(queue.back().unwrap().id(), ExchangeId::new(3));
        assert_eq!(queue.pop_front().unwrap().id(), ExchangeId::new(1));
        assert_eq!(queue.front().unwrap().id(), ExchangeId::new(2));
    }

    #[test]
    fn test_lookup_by_id() {
        let mut queue = queue_of(5..8);
        assert_eq!(queue.get_mut(ExchangeId::new(6)).unwrap().id(), ExchangeId::new(6));
        assert!(queue.get(ExchangeId::new(4)).is_none());
        assert!(queue.get(ExchangeId::new(8)).is_none());

        queue.retire(ExchangeId::new(5));
        assert!(queue.get(ExchangeId::new(5)).is_none());
        assert_eq!(queue.get(ExchangeId::new(7)).unwrap().id(), ExchangeId::new(7));
    }

    #[test]
    fn test_retire_front() {
        let mut queue = queue_of(1..3);
        let retired = queue.retire(ExchangeId::new(1));
        assert_eq!(retired.id(), ExchangeId::new(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    #[should_panic(expected = "pipeline order violation")]
    fn test_retire_out_of_order_panics() {
        let mut queue = queue_of(1..3);
        queue.retire(ExchangeId::new(2));
    }

    #[test]
    #[should_panic(expected = "pipeline order violation")]
    fn test_retire_on_empty_panics() {
        let mut queue = PipelineQueue::new();
        queue.retire(ExchangeId::new(1));
    }
}
