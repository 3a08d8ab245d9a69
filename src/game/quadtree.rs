//! Point-region quadtree over the fixed world bounds
//!
//! Stores `(id, bounds)` value records in owned recursive nodes; the
//! entities themselves live in the world's maps. Cloning the tree clones
//! every node and record, so a snapshot's index can never be perturbed by
//! mutating the live world.

use crate::util::vec2::Vec2;

/// Records per leaf before it splits
const NODE_CAPACITY: usize = 16;
/// Depth limit; keeps degenerate point clusters from recursing forever
const MAX_DEPTH: u32 = 12;

/// Axis-aligned bounding box, inclusive on all edges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl BoundingBox {
    pub fn new(min_x: i32, max_x: i32, min_y: i32, max_y: i32) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    /// Square box centered on `center` with the given half-extent.
    pub fn around(center: Vec2, half: i32) -> Self {
        Self {
            min_x: center.x - half,
            max_x: center.x + half,
            min_y: center.y - half,
            max_y: center.y + half,
        }
    }

    #[inline]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    #[inline]
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.min_x
            && other.max_x <= self.max_x
            && self.min_y <= other.min_y
            && other.max_y <= self.max_y
    }
}

/// Outcome of a `relocate` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveResult {
    /// The record was not in the tree at the old bounds; a caller that
    /// believed it was is observing a broken invariant.
    NotFound,
    /// Bounds updated in place, no structural change
    SameNode,
    /// Record migrated to a different node
    Moved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record {
    id: u32,
    bounds: BoundingBox,
}

#[derive(Debug, Clone)]
struct Node {
    region: BoundingBox,
    records: Vec<Record>,
    children: Option<Box<[Node; 4]>>,
}

impl Node {
    fn new(region: BoundingBox) -> Self {
        Self {
            region,
            records: Vec::new(),
            children: None,
        }
    }

    /// Index of the child quadrant that fully contains `bounds`, if any.
    fn child_for(&self, bounds: &BoundingBox) -> Option<usize> {
        let children = self.children.as_ref()?;
        children
            .iter()
            .position(|c| c.region.contains(bounds))
    }

    fn insert(&mut self, record: Record, depth: u32) {
        if let Some(idx) = self.child_for(&record.bounds) {
            self.children.as_mut().unwrap()[idx].insert(record, depth + 1);
            return;
        }
        self.records.push(record);
        if self.children.is_none() && self.records.len() > NODE_CAPACITY && depth < MAX_DEPTH {
            self.split(depth);
        }
    }

    fn split(&mut self, depth: u32) {
        let r = self.region;
        let mid_x = r.min_x + (r.max_x - r.min_x) / 2;
        let mid_y = r.min_y + (r.max_y - r.min_y) / 2;
        self.children = Some(Box::new([
            Node::new(BoundingBox::new(r.min_x, mid_x, r.min_y, mid_y)),
            Node::new(BoundingBox::new(mid_x + 1, r.max_x, r.min_y, mid_y)),
            Node::new(BoundingBox::new(r.min_x, mid_x, mid_y + 1, r.max_y)),
            Node::new(BoundingBox::new(mid_x + 1, r.max_x, mid_y + 1, r.max_y)),
        ]));

        // Push every record that fits entirely inside a quadrant down one
        // level; records spanning a boundary stay here.
        let mut kept = Vec::new();
        for record in self.records.drain(..) {
            let target = self
                .children
                .as_ref()
                .unwrap()
                .iter()
                .position(|c| c.region.contains(&record.bounds));
            match target {
                Some(idx) => self.children.as_mut().unwrap()[idx].insert(record, depth + 1),
                None => kept.push(record),
            }
        }
        self.records = kept;
    }

    fn remove(&mut self, id: u32, bounds: &BoundingBox) -> bool {
        if let Some(idx) = self.child_for(bounds) {
            return self.children.as_mut().unwrap()[idx].remove(id, bounds);
        }
        match self
            .records
            .iter()
            .position(|r| r.id == id && r.bounds == *bounds)
        {
            Some(idx) => {
                self.records.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Attempts the in-place fast path for a move: if the record lives here
    /// (or in a descendant) and its new bounds would land in the same node,
    /// update it without restructuring.
    fn relocate(&mut self, id: u32, old: &BoundingBox, new: &BoundingBox) -> MoveResult {
        if let Some(idx) = self.child_for(old) {
            return self.children.as_mut().unwrap()[idx].relocate(id, old, new);
        }
        let Some(pos) = self
            .records
            .iter()
            .position(|r| r.id == id && r.bounds == *old)
        else {
            return MoveResult::NotFound;
        };

        // Still belongs to this node if no child quadrant swallows the new
        // bounds whole.
        let stays = self.region.contains(new) && self.child_for(new).is_none();
        if stays {
            self.records[pos].bounds = *new;
            MoveResult::SameNode
        } else {
            self.records.swap_remove(pos);
            MoveResult::Moved
        }
    }

    fn query(&self, area: &BoundingBox, out: &mut Vec<u32>) {
        if !self.region.intersects(area) {
            return;
        }
        for record in &self.records {
            if record.bounds.intersects(area) {
                out.push(record.id);
            }
        }
        if let Some(children) = &self.children {
            for child in children.iter() {
                child.query(area, out);
            }
        }
    }

    fn len(&self) -> usize {
        let mut n = self.records.len();
        if let Some(children) = &self.children {
            for child in children.iter() {
                n += child.len();
            }
        }
        n
    }
}

/// Quadtree over a fixed square region
#[derive(Debug, Clone)]
pub struct QuadTree {
    root: Node,
}

impl QuadTree {
    pub fn new(region: BoundingBox) -> Self {
        Self {
            root: Node::new(region),
        }
    }

    /// Inserts a record into the deepest node whose region contains its
    /// bounds.
    pub fn add(&mut self, id: u32, bounds: BoundingBox) {
        self.root.insert(Record { id, bounds }, 0);
    }

    /// Removes a record located via its current bounds. Returns false if no
    /// record with that id sits at those bounds.
    pub fn remove(&mut self, id: u32, bounds: BoundingBox) -> bool {
        self.root.remove(id, &bounds)
    }

    /// Updates a record's spatial location. The caller has already mutated
    /// the entity; `old` is where the tree last saw it.
    pub fn relocate(&mut self, id: u32, old: BoundingBox, new: BoundingBox) -> MoveResult {
        let result = self.root.relocate(id, &old, &new);
        if result == MoveResult::Moved {
            self.root.insert(Record { id, bounds: new }, 0);
        }
        result
    }

    /// Ids of every record whose bounds intersect `area`.
    pub fn query(&self, area: BoundingBox) -> Vec<u32> {
        let mut out = Vec::new();
        self.root.query(&area, &mut out);
        out
    }

    /// Total records stored.
    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The region this tree covers.
    pub fn region(&self) -> BoundingBox {
        self.root.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn world_tree() -> QuadTree {
        QuadTree::new(BoundingBox::new(-1_000, 1_000, -1_000, 1_000))
    }

    fn boxed(x: i32, y: i32, size: i32) -> BoundingBox {
        BoundingBox::around(Vec2::new(x, y), size)
    }

    #[test]
    fn test_add_and_query() {
        let mut tree = world_tree();
        tree.add(1, boxed(100, 100, 10));

        let hits = tree.query(boxed(100, 100, 5));
        assert_eq!(hits, vec![1]);
        assert!(tree.query(boxed(-500, -500, 5)).is_empty());
    }

    #[test]
    fn test_query_returns_own_bounds() {
        // Core contract: everything inserted is found by querying its own
        // bounds, before and after splits.
        let mut tree = world_tree();
        let mut rng = StdRng::seed_from_u64(42);
        let mut items = Vec::new();
        for id in 0..200u32 {
            let b = boxed(
                rng.gen_range(-900..900),
                rng.gen_range(-900..900),
                rng.gen_range(1..50),
            );
            tree.add(id, b);
            items.push((id, b));
        }
        assert_eq!(tree.len(), 200);
        for (id, b) in items {
            assert!(
                tree.query(b).contains(&id),
                "record {} lost after inserts",
                id
            );
        }
    }

    #[test]
    fn test_split_keeps_straddlers_at_parent() {
        let mut tree = world_tree();
        // A record spanning the origin can't fit any quadrant.
        tree.add(0, boxed(0, 0, 50));
        for id in 1..=(NODE_CAPACITY as u32 + 4) {
            tree.add(id, boxed(500, 500, 2));
        }
        assert!(tree.query(boxed(0, 0, 1)).contains(&0));
        assert_eq!(tree.len(), NODE_CAPACITY + 5);
    }

    #[test]
    fn test_remove() {
        let mut tree = world_tree();
        let b = boxed(10, 10, 5);
        tree.add(9, b);
        assert!(tree.remove(9, b));
        assert!(!tree.remove(9, b));
        assert!(tree.query(b).is_empty());
    }

    #[test]
    fn test_remove_wrong_bounds_fails() {
        let mut tree = world_tree();
        tree.add(9, boxed(10, 10, 5));
        assert!(!tree.remove(9, boxed(11, 10, 5)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_relocate_same_node() {
        let mut tree = world_tree();
        let old = boxed(100, 100, 5);
        tree.add(3, old);
        let new = boxed(105, 100, 5);
        assert_eq!(tree.relocate(3, old, new), MoveResult::SameNode);
        assert!(tree.query(new).contains(&3));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_relocate_moved_across_split() {
        let mut tree = world_tree();
        // Force a split so quadrants exist.
        for id in 0..(NODE_CAPACITY as u32 + 1) {
            tree.add(id, boxed(800, 800, 2));
        }
        let old = boxed(800, 800, 2);
        let new = boxed(-800, -800, 2);
        assert_eq!(tree.relocate(0, old, new), MoveResult::Moved);
        assert!(tree.query(new).contains(&0));
        assert!(!tree.query(old).contains(&0));
        assert_eq!(tree.len(), NODE_CAPACITY + 1);
    }

    #[test]
    fn test_relocate_not_found() {
        let mut tree = world_tree();
        tree.add(1, boxed(0, 0, 5));
        assert_eq!(
            tree.relocate(2, boxed(0, 0, 5), boxed(1, 0, 5)),
            MoveResult::NotFound
        );
        // Same id, stale bounds.
        assert_eq!(
            tree.relocate(1, boxed(3, 3, 5), boxed(4, 3, 5)),
            MoveResult::NotFound
        );
    }

    #[test]
    fn test_clone_is_disjoint() {
        let mut tree = world_tree();
        let b = boxed(50, 50, 5);
        tree.add(1, b);

        let mut copy = tree.clone();
        let moved = boxed(-50, -50, 5);
        assert_eq!(copy.relocate(1, b, moved), MoveResult::SameNode);
        copy.add(2, boxed(0, 0, 1));

        // Original is untouched by mutations of the clone.
        assert_eq!(tree.len(), 1);
        assert!(tree.query(b).contains(&1));
        assert!(tree.query(boxed(0, 0, 1)).is_empty());
    }

    #[test]
    fn test_randomized_relocate_churn() {
        let mut tree = world_tree();
        let mut rng = StdRng::seed_from_u64(7);
        let mut bounds: Vec<BoundingBox> = (0..100)
            .map(|_| boxed(rng.gen_range(-900..900), rng.gen_range(-900..900), 10))
            .collect();
        for (id, b) in bounds.iter().enumerate() {
            tree.add(id as u32, *b);
        }
        for _ in 0..500 {
            let id = rng.gen_range(0..100usize);
            let new = boxed(rng.gen_range(-900..900), rng.gen_range(-900..900), 10);
            let result = tree.relocate(id as u32, bounds[id], new);
            assert_ne!(result, MoveResult::NotFound, "record {} vanished", id);
            bounds[id] = new;
        }
        assert_eq!(tree.len(), 100);
        for (id, b) in bounds.iter().enumerate() {
            assert!(tree.query(*b).contains(&(id as u32)));
        }
    }
}
