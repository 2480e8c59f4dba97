//! Open-call lookup by scanning the tree.
//!
//! Calls on one thread are strictly nested, so the call that is currently
//! open is always reached by repeatedly stepping into the rightmost open
//! child whose next sibling (if any) has already closed. No per-thread stack
//! is needed; the tree's append order carries the same information.

use indextree::{Arena, NodeId};

use super::TraceNode;

/// Return the deepest open call below `thread`, or `thread` itself when the
/// thread has no open call.
pub(crate) fn find_open(tree: &Arena<TraceNode>, thread: NodeId) -> NodeId {
    let mut cursor = thread;
    while let Some(child) = open_child(tree, cursor) {
        cursor = child;
    }
    cursor
}

/// The rightmost child of `parent` that is open and is either the last child
/// or followed by a closed sibling.
fn open_child(tree: &Arena<TraceNode>, parent: NodeId) -> Option<NodeId> {
    let mut found = None;
    let mut children = parent.children(tree).peekable();
    while let Some(child) = children.next() {
        let next_closed = children
            .peek()
            .is_none_or(|next| !is_open(tree, *next));
        if next_closed && is_open(tree, child) {
            found = Some(child);
        }
    }
    found
}

fn is_open(tree: &Arena<TraceNode>, id: NodeId) -> bool {
    tree.get(id).is_some_and(|node| node.get().is_open())
}
