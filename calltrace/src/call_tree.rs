//! # Call tree
//!
//! All traced calls live in one [`indextree::Arena`]. The root owns one node
//! per thread; each thread node owns that thread's top-level calls, which own
//! the calls made from inside them, in call order. Parent links are arena
//! indices, so nothing in the tree owns its parent.
//!
//! Finding the call that is currently open on a thread is done either with
//! an explicit per-thread stack of open nodes ([`LocatorStrategy::CallStack`])
//! or by scanning the thread's subtree ([`LocatorStrategy::TreeScan`]). Both
//! produce the same tree as long as each thread ends its calls in reverse
//! order of beginning them.
//!
//! The tree itself is not synchronised; [`Tracer`](crate::Tracer) keeps it
//! behind its lock.

mod locator;

use indextree::{Arena, NodeId};
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    clock::{Clock, Stopwatch},
    document::{MethodRecord, ThreadRecord, TraceDocument},
    error::TraceError,
    frame::StackFrame,
};

/// How the open call of a thread is located.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorStrategy {
    /// Keep an explicit stack of open calls per thread.
    #[default]
    CallStack,
    /// Rebuild the open call from the tree on every lookup.
    TreeScan,
}

/// Identity of a traced routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Routine name.
    pub name: String,
    /// Owning module path.
    pub module: String,
    /// Declared parameter count, if known.
    pub param_count: Option<usize>,
}

impl From<&StackFrame> for MethodInfo {
    fn from(frame: &StackFrame) -> Self {
        Self {
            name: frame.name.clone(),
            module: frame.module.clone(),
            param_count: frame.param_count,
        }
    }
}

/// What a node in the tree stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// The single root.
    Root,
    /// One traced thread.
    Thread {
        /// Tracer-assigned thread id.
        id: u64,
    },
    /// One traced call.
    Method(MethodInfo),
}

/// A node of the call tree.
#[derive(Debug, Clone)]
pub struct TraceNode {
    kind: NodeKind,
    elapsed_ms: u64,
    stopwatch: Option<Stopwatch>,
}

impl TraceNode {
    pub(crate) fn root() -> Self {
        Self {
            kind: NodeKind::Root,
            elapsed_ms: 0,
            stopwatch: None,
        }
    }

    pub(crate) fn thread(id: u64) -> Self {
        Self {
            kind: NodeKind::Thread { id },
            elapsed_ms: 0,
            stopwatch: None,
        }
    }

    /// A method node whose stopwatch starts now.
    pub(crate) fn method(info: MethodInfo, clock: &dyn Clock) -> Self {
        Self {
            kind: NodeKind::Method(info),
            elapsed_ms: 0,
            stopwatch: Some(Stopwatch::start(clock)),
        }
    }

    /// Stop the stopwatch and record the elapsed milliseconds. `None` for
    /// nodes without a stopwatch or already stopped.
    pub(crate) fn stop(&mut self, clock: &dyn Clock) -> Option<u64> {
        let elapsed = self.stopwatch.as_mut()?.stop(clock)?;
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        Some(self.elapsed_ms)
    }

    /// What this node stands for.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Elapsed milliseconds: the call's duration for methods, the rolled-up
    /// time of top-level calls for threads.
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Whether this is a method call that has begun and not yet ended.
    pub fn is_open(&self) -> bool {
        self.stopwatch.is_some_and(|watch| watch.is_running())
    }
}

/// The shared tree of traced calls.
pub struct CallTree {
    arena: Arena<TraceNode>,
    root: NodeId,
    /// Thread id to thread node.
    threads: HashMap<u64, NodeId>,
    /// Open calls per thread, innermost last. Only used by
    /// [`LocatorStrategy::CallStack`].
    open_calls: HashMap<u64, SmallVec<[NodeId; 8]>>,
    strategy: LocatorStrategy,
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new(LocatorStrategy::default())
    }
}

impl CallTree {
    /// Create a tree holding only the root.
    pub fn new(strategy: LocatorStrategy) -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(TraceNode::root());
        Self {
            arena,
            root,
            threads: HashMap::default(),
            open_calls: HashMap::default(),
            strategy,
        }
    }

    /// The strategy used to find open calls.
    pub fn strategy(&self) -> LocatorStrategy {
        self.strategy
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get a node by id.
    pub fn get(&self, id: NodeId) -> Option<&TraceNode> {
        self.arena.get(id).map(|node| node.get())
    }

    /// Parent of a node; `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena.get(id).and_then(|node| node.parent())
    }

    /// Children of a node in call order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        id.children(&self.arena)
    }

    /// Total number of nodes, root included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Whether the tree holds nothing but the root.
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// The node of a thread that has begun at least one call.
    pub fn find_thread(&self, thread_id: u64) -> Option<NodeId> {
        self.threads.get(&thread_id).copied()
    }

    /// Return the thread's node, appending a new one under the root on first
    /// use.
    pub fn get_or_create_thread(&mut self, thread_id: u64) -> NodeId {
        if let Some(&existing) = self.threads.get(&thread_id) {
            return existing;
        }
        let thread = self.attach(self.root, TraceNode::thread(thread_id));
        self.threads.insert(thread_id, thread);
        thread
    }

    /// Append `node` as the last child of `parent`.
    pub fn attach(&mut self, parent: NodeId, node: TraceNode) -> NodeId {
        let id = self.arena.new_node(node);
        parent.append(id, &mut self.arena);
        id
    }

    /// The call currently open on a thread, if any.
    pub fn open_call(&self, thread_id: u64) -> Option<NodeId> {
        let thread = self.find_thread(thread_id)?;
        match self.strategy {
            LocatorStrategy::CallStack => self
                .open_calls
                .get(&thread_id)
                .and_then(|stack| stack.last().copied()),
            LocatorStrategy::TreeScan => {
                let found = locator::find_open(&self.arena, thread);
                (found != thread).then_some(found)
            }
        }
    }

    /// Open a new call on a thread, nested under its currently open call or
    /// directly under the thread node.
    pub fn begin_call(&mut self, thread_id: u64, info: MethodInfo, clock: &dyn Clock) -> NodeId {
        let thread = self.get_or_create_thread(thread_id);
        let parent = self.open_call(thread_id).unwrap_or(thread);
        let id = self.attach(parent, TraceNode::method(info, clock));
        if self.strategy == LocatorStrategy::CallStack {
            self.open_calls.entry(thread_id).or_default().push(id);
        }
        id
    }

    /// Close the call currently open on a thread.
    pub fn end_call(&mut self, thread_id: u64, clock: &dyn Clock) -> Result<NodeId, TraceError> {
        let open = match self.strategy {
            LocatorStrategy::CallStack => self
                .open_calls
                .get_mut(&thread_id)
                .and_then(|stack| stack.pop()),
            LocatorStrategy::TreeScan => self.open_call(thread_id),
        };
        let id = open.ok_or(TraceError::UnmatchedEnd { thread_id })?;
        self.close(id, clock);
        Ok(id)
    }

    /// Stop a call's stopwatch and apply the rollup: when the call's parent
    /// is a thread node (its grandparent is the root), the call's time is
    /// added to the thread. Deeper calls are not rolled up.
    ///
    /// Returns the elapsed milliseconds, or `None` if the node was not an
    /// open call.
    pub fn close(&mut self, id: NodeId, clock: &dyn Clock) -> Option<u64> {
        let elapsed = self.arena.get_mut(id)?.get_mut().stop(clock)?;
        if let Some(parent) = self.parent(id)
            && self.parent(parent) == Some(self.root)
            && let Some(parent_node) = self.arena.get_mut(parent)
        {
            let parent_node = parent_node.get_mut();
            parent_node.elapsed_ms = parent_node.elapsed_ms.saturating_add(elapsed);
        }
        Some(elapsed)
    }

    /// Depth-first snapshot of the whole tree.
    pub fn to_document(&self) -> TraceDocument {
        let threads = self
            .root
            .children(&self.arena)
            .filter_map(|id| {
                let node = self.get(id)?;
                let NodeKind::Thread { id: thread_id } = &node.kind else {
                    return None;
                };
                Some(ThreadRecord {
                    id: *thread_id,
                    time_ms: node.elapsed_ms,
                    methods: self.method_records(id),
                })
            })
            .collect();
        TraceDocument { threads }
    }

    fn method_records(&self, parent: NodeId) -> Vec<MethodRecord> {
        parent
            .children(&self.arena)
            .filter_map(|id| {
                let node = self.get(id)?;
                let NodeKind::Method(info) = &node.kind else {
                    return None;
                };
                Some(MethodRecord {
                    name: info.name.clone(),
                    package: info.module.clone(),
                    params_count: info.param_count,
                    time_ms: node.elapsed_ms,
                    children: self.method_records(id),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    fn info(name: &str) -> MethodInfo {
        MethodInfo {
            name: name.to_string(),
            module: "app".to_string(),
            param_count: Some(0),
        }
    }

    fn name_of(tree: &CallTree, id: NodeId) -> String {
        match tree.get(id).map(|n| n.kind()) {
            Some(NodeKind::Method(info)) => info.name.clone(),
            other => panic!("expected a method node, got {other:?}"),
        }
    }

    #[test]
    fn thread_nodes_are_unique_children_of_root() {
        let mut tree = CallTree::default();
        let a = tree.get_or_create_thread(1);
        let b = tree.get_or_create_thread(2);
        assert_eq!(tree.get_or_create_thread(1), a);
        assert_ne!(a, b);
        assert_eq!(tree.children(tree.root()).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(tree.parent(a), Some(tree.root()));
        assert_eq!(tree.parent(tree.root()), None);
        assert_eq!(tree.len(), 3);
        assert!(!tree.is_empty());
    }

    #[test]
    fn nested_calls_attach_under_open_call() {
        for strategy in [LocatorStrategy::CallStack, LocatorStrategy::TreeScan] {
            let clock = ManualClock::new();
            let mut tree = CallTree::new(strategy);
            let outer = tree.begin_call(1, info("outer"), &clock);
            let inner = tree.begin_call(1, info("inner"), &clock);
            assert_eq!(tree.parent(inner), Some(outer));
            assert_eq!(tree.open_call(1), Some(inner));

            clock.advance(Duration::from_millis(5));
            assert_eq!(tree.end_call(1, &clock), Ok(inner));
            assert_eq!(tree.open_call(1), Some(outer));
            clock.advance(Duration::from_millis(5));
            assert_eq!(tree.end_call(1, &clock), Ok(outer));
            assert_eq!(tree.open_call(1), None);

            assert_eq!(tree.get(inner).map(|n| n.elapsed_ms()), Some(5));
            assert_eq!(tree.get(outer).map(|n| n.elapsed_ms()), Some(10));
        }
    }

    #[test]
    fn rollup_only_reaches_thread_nodes() {
        let clock = ManualClock::new();
        let mut tree = CallTree::default();

        tree.begin_call(1, info("first"), &clock);
        tree.begin_call(1, info("nested"), &clock);
        clock.advance(Duration::from_millis(3));
        tree.end_call(1, &clock).expect("nested ends");
        clock.advance(Duration::from_millis(4));
        tree.end_call(1, &clock).expect("first ends");

        tree.begin_call(1, info("second"), &clock);
        clock.advance(Duration::from_millis(10));
        tree.end_call(1, &clock).expect("second ends");

        let doc = tree.to_document();
        let thread = &doc.threads[0];
        assert_eq!(thread.time_ms, 7 + 10);
        // Third-level calls are not added to their grandparent.
        assert_eq!(thread.methods[0].time_ms, 7);
        assert_eq!(thread.methods[0].children[0].time_ms, 3);
    }

    #[test]
    fn end_without_open_call_is_unmatched() {
        for strategy in [LocatorStrategy::CallStack, LocatorStrategy::TreeScan] {
            let clock = ManualClock::new();
            let mut tree = CallTree::new(strategy);
            assert_eq!(
                tree.end_call(9, &clock),
                Err(TraceError::UnmatchedEnd { thread_id: 9 })
            );
            assert!(tree.is_empty());

            tree.begin_call(9, info("only"), &clock);
            tree.end_call(9, &clock).expect("matched end");
            assert_eq!(
                tree.end_call(9, &clock),
                Err(TraceError::UnmatchedEnd { thread_id: 9 })
            );
        }
    }

    #[test]
    fn threads_do_not_share_open_calls() {
        let clock = ManualClock::new();
        let mut tree = CallTree::default();
        let a = tree.begin_call(1, info("a"), &clock);
        let b = tree.begin_call(2, info("b"), &clock);
        let a2 = tree.begin_call(1, info("a2"), &clock);
        assert_eq!(tree.parent(a2), Some(a));
        assert_eq!(tree.open_call(2), Some(b));
        let closed = tree.end_call(2, &clock).expect("b");
        assert_eq!(name_of(&tree, closed), "b");
        let closed = tree.end_call(1, &clock).expect("a2");
        assert_eq!(name_of(&tree, closed), "a2");
    }

    #[test]
    fn close_is_one_shot() {
        let clock = ManualClock::new();
        let mut tree = CallTree::default();
        let id = tree.begin_call(1, info("once"), &clock);
        clock.advance(Duration::from_millis(2));
        assert_eq!(tree.close(id, &clock), Some(2));
        clock.advance(Duration::from_millis(2));
        assert_eq!(tree.close(id, &clock), None);
        assert_eq!(tree.to_document().threads[0].time_ms, 2);
    }

    #[test]
    fn strategies_build_identical_trees() {
        let script: &[Option<&str>] = &[
            Some("main"),
            Some("load"),
            Some("parse"),
            None,
            None,
            Some("save"),
            None,
            Some("flush"),
            Some("sync"),
            None,
            None,
            None,
            Some("tail"),
            None,
        ];
        let run = |strategy| {
            let clock = ManualClock::new();
            let mut tree = CallTree::new(strategy);
            for step in script {
                clock.advance(Duration::from_millis(1));
                match step {
                    Some(name) => {
                        tree.begin_call(1, info(name), &clock);
                    }
                    None => {
                        tree.end_call(1, &clock).expect("balanced script");
                    }
                }
            }
            tree.to_document()
        };
        assert_eq!(
            run(LocatorStrategy::CallStack),
            run(LocatorStrategy::TreeScan)
        );
    }
}
