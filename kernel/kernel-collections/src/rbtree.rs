//! Intrusive red-black tree: the ordered index.
//!
//! Nodes carry no key; ordering is delegated to a caller-supplied
//! strict-less-than comparator over two nodes. Equal nodes are rejected on
//! insert — when a logical key can collide (timer deadlines), the comparator
//! breaks ties on node identity to keep the order total.
//!
//! Used with two independent keyings: absolute millisecond deadlines (one
//! tree per core) and process identifiers (one global tree), each behind its
//! own lock. Classic parent-pointer red-black discipline; the color lives in
//! the low bit of the parent word.

use core::cmp::Ordering;
use core::ptr;

const RED: usize = 0;
const BLACK: usize = 1;
const COLOR_MASK: usize = 1;

/// An index node, embedded in the object being ordered.
#[repr(C)]
pub struct RbNode {
    parent_color: usize,
    left: *mut RbNode,
    right: *mut RbNode,
}

impl Default for RbNode {
    fn default() -> Self {
        Self::new()
    }
}

impl RbNode {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            parent_color: RED,
            left: ptr::null_mut(),
            right: ptr::null_mut(),
        }
    }
}

/// Insert rejected because an equal node is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateNode;

unsafe fn parent(n: *const RbNode) -> *mut RbNode {
    (unsafe { (*n).parent_color } & !COLOR_MASK) as *mut RbNode
}

unsafe fn color(n: *const RbNode) -> usize {
    (unsafe { (*n).parent_color }) & COLOR_MASK
}

/// Null nodes count as black.
unsafe fn is_black(n: *const RbNode) -> bool {
    n.is_null() || unsafe { color(n) } == BLACK
}

unsafe fn is_red(n: *const RbNode) -> bool {
    !unsafe { is_black(n) }
}

unsafe fn set_parent(n: *mut RbNode, p: *mut RbNode) {
    unsafe { (*n).parent_color = (p as usize) | ((*n).parent_color & COLOR_MASK) }
}

unsafe fn set_color(n: *mut RbNode, c: usize) {
    unsafe { (*n).parent_color = ((*n).parent_color & !COLOR_MASK) | c }
}

unsafe fn minimum(mut n: *mut RbNode) -> *mut RbNode {
    unsafe {
        while !(*n).left.is_null() {
            n = (*n).left;
        }
    }
    n
}

/// Root of one ordered index. Wrap it in the lock that guards the keying.
pub struct RbRoot {
    node: *mut RbNode,
}

// Safety: raw pointers only; access is serialized by the owning lock.
unsafe impl Send for RbRoot {}

impl Default for RbRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl RbRoot {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            node: ptr::null_mut(),
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.node.is_null()
    }

    /// Leftmost node: the minimum under the index's comparator.
    #[must_use]
    pub fn first(&self) -> *mut RbNode {
        if self.node.is_null() {
            return ptr::null_mut();
        }
        unsafe { minimum(self.node) }
    }

    /// In-order successor of `node`, or null.
    ///
    /// # Safety
    /// `node` must be linked into this tree; caller holds the index lock.
    #[must_use]
    pub unsafe fn next(node: *mut RbNode) -> *mut RbNode {
        unsafe {
            if !(*node).right.is_null() {
                return minimum((*node).right);
            }
            let mut n = node;
            let mut p = parent(n);
            while !p.is_null() && n == (*p).right {
                n = p;
                p = parent(n);
            }
            p
        }
    }

    /// Link `node` into the index under `less`.
    ///
    /// Fails without modifying the tree if an equal node already exists.
    ///
    /// # Safety
    /// `node` must be valid, not linked into any tree, and stay pinned while
    /// linked; caller holds the index lock. `less` must be a strict total
    /// order over all linked nodes.
    pub unsafe fn insert(
        &mut self,
        node: *mut RbNode,
        less: impl Fn(*const RbNode, *const RbNode) -> bool,
    ) -> Result<(), DuplicateNode> {
        unsafe {
            let mut link: *mut *mut RbNode = &raw mut self.node;
            let mut p: *mut RbNode = ptr::null_mut();
            while !(*link).is_null() {
                p = *link;
                if less(node, p) {
                    link = &raw mut (*p).left;
                } else if less(p, node) {
                    link = &raw mut (*p).right;
                } else {
                    return Err(DuplicateNode);
                }
            }
            (*node).left = ptr::null_mut();
            (*node).right = ptr::null_mut();
            (*node).parent_color = (p as usize) | RED;
            *link = node;
            self.insert_fixup(node);
        }
        Ok(())
    }

    /// Find the node equal to `probe` under `less`, or null.
    ///
    /// # Safety
    /// Caller holds the index lock; `less` as for [`insert`](Self::insert).
    /// `probe` need not be linked.
    #[must_use]
    pub unsafe fn lookup(
        &self,
        probe: *const RbNode,
        less: impl Fn(*const RbNode, *const RbNode) -> bool,
    ) -> *mut RbNode {
        let mut cur = self.node;
        unsafe {
            while !cur.is_null() {
                if less(probe, cur) {
                    cur = (*cur).left;
                } else if less(cur, probe) {
                    cur = (*cur).right;
                } else {
                    break;
                }
            }
        }
        cur
    }

    /// Find a node by an external key: `cmp(n)` orders the key against `n`.
    ///
    /// # Safety
    /// Caller holds the index lock; `cmp` must agree with the order the
    /// tree was built with.
    #[must_use]
    pub unsafe fn lookup_by(&self, cmp: impl Fn(*const RbNode) -> Ordering) -> *mut RbNode {
        let mut cur = self.node;
        unsafe {
            while !cur.is_null() {
                match cmp(cur) {
                    Ordering::Less => cur = (*cur).left,
                    Ordering::Greater => cur = (*cur).right,
                    Ordering::Equal => break,
                }
            }
        }
        cur
    }

    /// Unlink `node` from the index.
    ///
    /// # Safety
    /// `node` must currently be linked into this tree; caller holds the
    /// index lock.
    pub unsafe fn erase(&mut self, node: *mut RbNode) {
        unsafe {
            let x: *mut RbNode;
            let x_parent: *mut RbNode;
            let removed_black: bool;

            if (*node).left.is_null() {
                x = (*node).right;
                x_parent = parent(node);
                removed_black = color(node) == BLACK;
                self.transplant(node, x);
            } else if (*node).right.is_null() {
                x = (*node).left;
                x_parent = parent(node);
                removed_black = color(node) == BLACK;
                self.transplant(node, x);
            } else {
                // Two children: splice in the in-order successor.
                let y = minimum((*node).right);
                removed_black = color(y) == BLACK;
                x = (*y).right;
                if parent(y) == node {
                    x_parent = y;
                } else {
                    x_parent = parent(y);
                    self.transplant(y, x);
                    (*y).right = (*node).right;
                    set_parent((*y).right, y);
                }
                self.transplant(node, y);
                (*y).left = (*node).left;
                set_parent((*y).left, y);
                set_color(y, color(node));
            }

            if removed_black {
                self.erase_fixup(x, x_parent);
            }

            (*node).left = ptr::null_mut();
            (*node).right = ptr::null_mut();
            (*node).parent_color = RED;
        }
    }

    /// Replace the subtree rooted at `u` with the one rooted at `v`.
    unsafe fn transplant(&mut self, u: *mut RbNode, v: *mut RbNode) {
        unsafe {
            let up = parent(u);
            if up.is_null() {
                self.node = v;
            } else if u == (*up).left {
                (*up).left = v;
            } else {
                (*up).right = v;
            }
            if !v.is_null() {
                set_parent(v, up);
            }
        }
    }

    unsafe fn rotate_left(&mut self, x: *mut RbNode) {
        unsafe {
            let y = (*x).right;
            (*x).right = (*y).left;
            if !(*y).left.is_null() {
                set_parent((*y).left, x);
            }
            let xp = parent(x);
            set_parent(y, xp);
            if xp.is_null() {
                self.node = y;
            } else if x == (*xp).left {
                (*xp).left = y;
            } else {
                (*xp).right = y;
            }
            (*y).left = x;
            set_parent(x, y);
        }
    }

    unsafe fn rotate_right(&mut self, x: *mut RbNode) {
        unsafe {
            let y = (*x).left;
            (*x).left = (*y).right;
            if !(*y).right.is_null() {
                set_parent((*y).right, x);
            }
            let xp = parent(x);
            set_parent(y, xp);
            if xp.is_null() {
                self.node = y;
            } else if x == (*xp).right {
                (*xp).right = y;
            } else {
                (*xp).left = y;
            }
            (*y).right = x;
            set_parent(x, y);
        }
    }

    unsafe fn insert_fixup(&mut self, mut node: *mut RbNode) {
        unsafe {
            loop {
                let mut p = parent(node);
                if p.is_null() {
                    set_color(node, BLACK);
                    return;
                }
                if color(p) == BLACK {
                    return;
                }
                // Red parent implies a grandparent (the root is black).
                let g = parent(p);
                if p == (*g).left {
                    let u = (*g).right;
                    if is_red(u) {
                        set_color(p, BLACK);
                        set_color(u, BLACK);
                        set_color(g, RED);
                        node = g;
                        continue;
                    }
                    if node == (*p).right {
                        self.rotate_left(p);
                        node = p;
                        p = parent(node);
                    }
                    set_color(p, BLACK);
                    set_color(g, RED);
                    self.rotate_right(g);
                } else {
                    let u = (*g).left;
                    if is_red(u) {
                        set_color(p, BLACK);
                        set_color(u, BLACK);
                        set_color(g, RED);
                        node = g;
                        continue;
                    }
                    if node == (*p).left {
                        self.rotate_right(p);
                        node = p;
                        p = parent(node);
                    }
                    set_color(p, BLACK);
                    set_color(g, RED);
                    self.rotate_left(g);
                }
                return;
            }
        }
    }

    /// Restore the black-height after removing a black node. `x` (possibly
    /// null) carries the extra black; `x_parent` is its parent.
    unsafe fn erase_fixup(&mut self, mut x: *mut RbNode, mut x_parent: *mut RbNode) {
        unsafe {
            while x != self.node && is_black(x) {
                if x_parent.is_null() {
                    break;
                }
                if x == (*x_parent).left {
                    let mut w = (*x_parent).right;
                    if is_red(w) {
                        set_color(w, BLACK);
                        set_color(x_parent, RED);
                        self.rotate_left(x_parent);
                        w = (*x_parent).right;
                    }
                    if is_black((*w).left) && is_black((*w).right) {
                        set_color(w, RED);
                        x = x_parent;
                        x_parent = parent(x);
                    } else {
                        if is_black((*w).right) {
                            if !(*w).left.is_null() {
                                set_color((*w).left, BLACK);
                            }
                            set_color(w, RED);
                            self.rotate_right(w);
                            w = (*x_parent).right;
                        }
                        set_color(w, color(x_parent));
                        set_color(x_parent, BLACK);
                        if !(*w).right.is_null() {
                            set_color((*w).right, BLACK);
                        }
                        self.rotate_left(x_parent);
                        x = self.node;
                        x_parent = ptr::null_mut();
                    }
                } else {
                    let mut w = (*x_parent).left;
                    if is_red(w) {
                        set_color(w, BLACK);
                        set_color(x_parent, RED);
                        self.rotate_right(x_parent);
                        w = (*x_parent).left;
                    }
                    if is_black((*w).left) && is_black((*w).right) {
                        set_color(w, RED);
                        x = x_parent;
                        x_parent = parent(x);
                    } else {
                        if is_black((*w).left) {
                            if !(*w).right.is_null() {
                                set_color((*w).right, BLACK);
                            }
                            set_color(w, RED);
                            self.rotate_left(w);
                            w = (*x_parent).left;
                        }
                        set_color(w, color(x_parent));
                        set_color(x_parent, BLACK);
                        if !(*w).left.is_null() {
                            set_color((*w).left, BLACK);
                        }
                        self.rotate_right(x_parent);
                        x = self.node;
                        x_parent = ptr::null_mut();
                    }
                }
            }
            if !x.is_null() {
                set_color(x, BLACK);
            }
        }
    }
}
