//! Per-frame draw ordering.

use crate::scene::node::NodeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderItem {
    pub node: NodeKey,
    pub render_order: i32,
}

/// Opaque and transparent drawables of one frame.
#[derive(Debug, Default)]
pub struct RenderList {
    opaque: Vec<RenderItem>,
    transparent: Vec<RenderItem>,
}

impl RenderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
    }

    pub fn submit(&mut self, item: RenderItem, transparent: bool) {
        if transparent {
            self.transparent.push(item);
        } else {
            self.opaque.push(item);
        }
    }

    /// Opaque ascending, transparent descending by render order. Both
    /// sorts are stable, so ties keep submission order.
    pub fn order(&mut self) {
        self.opaque.sort_by_key(|item| item.render_order);
        self.transparent.sort_by(|a, b| b.render_order.cmp(&a.render_order));
    }

    pub fn opaque(&self) -> &[RenderItem] {
        &self.opaque
    }

    pub fn transparent(&self) -> &[RenderItem] {
        &self.transparent
    }

    pub fn len(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transparent.is_empty()
    }

    /// Draw sequence: every opaque item, then every transparent one.
    pub fn iter(&self) -> impl Iterator<Item = &RenderItem> {
        self.opaque.iter().chain(self.transparent.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    fn items(orders: &[i32]) -> Vec<RenderItem> {
        let mut keys: SlotMap<NodeKey, ()> = SlotMap::with_key();
        orders
            .iter()
            .map(|order| RenderItem {
                node: keys.insert(()),
                render_order: *order,
            })
            .collect()
    }

    fn orders(items: &[RenderItem]) -> Vec<i32> {
        items.iter().map(|item| item.render_order).collect()
    }

    #[test]
    fn test_opaque_ascending() {
        let mut list = RenderList::new();
        for item in items(&[3, 1, 2]) {
            list.submit(item, false);
        }
        list.order();
        assert_eq!(orders(list.opaque()), [1, 2, 3]);
    }

    #[test]
    fn test_transparent_descending() {
        let mut list = RenderList::new();
        for item in items(&[3, 1, 2]) {
            list.submit(item, true);
        }
        list.order();
        assert_eq!(orders(list.transparent()), [3, 2, 1]);
    }

    #[test]
    fn test_ties_keep_submission_order() {
        let mut list = RenderList::new();
        let submitted = items(&[0, 0, 0]);
        for item in &submitted {
            list.submit(*item, true);
        }
        list.order();
        assert_eq!(list.transparent(), submitted.as_slice());
    }

    #[test]
    fn test_mixed_partition_and_reset() {
        let mut list = RenderList::new();
        let all = items(&[5, 2, 7, 1]);
        list.submit(all[0], true);
        list.submit(all[1], false);
        list.submit(all[2], true);
        list.submit(all[3], false);
        list.order();

        assert_eq!(orders(list.opaque()), [1, 2]);
        assert_eq!(orders(list.transparent()), [7, 5]);
        let sequence: Vec<i32> = list.iter().map(|item| item.render_order).collect();
        assert_eq!(sequence, [1, 2, 7, 5]);

        list.reset();
        assert!(list.is_empty());
    }
}
