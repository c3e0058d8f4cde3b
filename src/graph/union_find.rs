//! Array-backed union-find over dense indices, used to relabel the connected
//! components of an affected island during recomputation.

/// Path-compressing union-find forest. Indices are island-local and dense;
/// the caller maps node handles to `0..len` before use.
#[derive(Debug, Default)]
pub struct UnionFind {
    parent: Vec<u32>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self { parent: Vec::new() }
    }

    /// Resets the forest to `len` singleton sets, reusing the allocation.
    pub fn reset(&mut self, len: usize) {
        self.parent.clear();
        self.parent.extend(0..len as u32);
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Finds the set representative, halving the path along the way.
    pub fn find(&mut self, index: u32) -> u32 {
        let mut current = index;
        loop {
            let parent = self.parent[current as usize];
            if parent == current {
                return current;
            }
            let grandparent = self.parent[parent as usize];
            self.parent[current as usize] = grandparent;
            current = grandparent;
        }
    }

    /// Unions the sets containing `a` and `b`. The smaller root index wins,
    /// which keeps the final labelling independent of union order.
    pub fn union(&mut self, a: u32, b: u32) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let (low, high) = if root_a < root_b {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[high as usize] = low;
    }
}
