//! Access-ordered key list with O(1) touch, insert and evict.
//!
//! An arena of doubly linked nodes; freed slots are reused so the arena
//! never grows past the cache's peak size.

#[derive(Debug)]
struct Node {
    key: String,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Recency order of cache keys. Head is most recent, tail least recent.
#[derive(Debug, Default)]
pub(crate) struct LruList {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl LruList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Insert a key as most recent, returning its handle.
    pub(crate) fn push_front(&mut self, key: String) -> usize {
        let node = Node {
            key,
            prev: None,
            next: self.head,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            if let Some(n) = self.nodes[old_head].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.len += 1;
        idx
    }

    /// Mark a handle as most recently used.
    pub(crate) fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        if let Some(key) = self.unlink(idx) {
            self.relink_front(idx, key);
        }
    }

    /// Remove a handle, returning its key.
    pub(crate) fn remove(&mut self, idx: usize) -> Option<String> {
        let key = self.unlink(idx)?;
        self.free.push(idx);
        Some(key)
    }

    /// Remove and return the least recently used key.
    pub(crate) fn pop_back(&mut self) -> Option<String> {
        let tail = self.tail?;
        self.remove(tail)
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    /// Detach a node, leaving its slot empty.
    fn unlink(&mut self, idx: usize) -> Option<String> {
        let node = self.nodes.get_mut(idx)?.take()?;

        match node.prev {
            Some(prev) => {
                if let Some(n) = self.nodes[prev].as_mut() {
                    n.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(n) = self.nodes[next].as_mut() {
                    n.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }

        self.len -= 1;
        Some(node.key)
    }

    /// Put a detached key back at the front, reusing its slot.
    fn relink_front(&mut self, idx: usize, key: String) {
        self.nodes[idx] = Some(Node {
            key,
            prev: None,
            next: self.head,
        });
        if let Some(old_head) = self.head {
            if let Some(n) = self.nodes[old_head].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
        self.len += 1;
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.nodes[idx].as_ref().expect("linked node");
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_eviction() {
        let mut list = LruList::new();
        let a = list.push_front("a".into());
        let _b = list.push_front("b".into());
        let c = list.push_front("c".into());
        assert_eq!(list.keys(), vec!["c", "b", "a"]);

        list.touch(a);
        assert_eq!(list.keys(), vec!["a", "c", "b"]);

        assert_eq!(list.pop_back().as_deref(), Some("b"));
        assert_eq!(list.len(), 2);

        list.remove(c);
        assert_eq!(list.keys(), vec!["a"]);
        assert_eq!(list.pop_back().as_deref(), Some("a"));
        assert_eq!(list.pop_back(), None);
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut list = LruList::new();
        let a = list.push_front("a".into());
        list.remove(a);
        let b = list.push_front("b".into());
        assert_eq!(a, b);
        assert_eq!(list.keys(), vec!["b"]);
    }
}
