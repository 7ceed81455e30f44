use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use whenlang::ast::{BlockDecl, BlockKind, Statement};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Idle,
    Running,
    Stopped,
    Exhausted,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockState::Idle => "idle",
            BlockState::Running => "running",
            BlockState::Stopped => "stopped",
            BlockState::Exhausted => "exhausted",
        };
        f.write_str(name)
    }
}

/// What `start` does to a counted block that has used up its iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Reset the remaining count to the declared total and run again.
    #[default]
    Reset,
    /// Refuse with an `InvalidLifecycleOperation` error.
    Error,
}

/// Result of a `start` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The block entered `Running`.
    Started,
    /// The block was already running; nothing changed.
    AlreadyRunning,
    /// A counted block with no iterations to run went straight to `Exhausted`.
    Exhausted,
    /// One-shot blocks have no scheduled state; the caller runs the body now.
    Invoke,
}

/// Runtime record for one declared block.
#[derive(Debug, Clone)]
pub struct Block {
    name: String,
    kind: BlockKind,
    parallel: bool,
    body: Rc<[Statement]>,
    /// File the declaration came from. Differs between blocks after a reload.
    source_id: usize,
    state: BlockState,
    remaining: u64,
}

impl Block {
    pub fn from_decl(decl: &BlockDecl, source_id: usize) -> Self {
        let remaining = match decl.kind {
            BlockKind::Counted(count) => count,
            _ => 0,
        };
        Block {
            name: decl.name.clone(),
            kind: decl.kind,
            parallel: decl.parallel,
            body: decl.body.clone().into(),
            source_id,
            state: BlockState::Idle,
            remaining,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    /// Iterations left for a counted block. Always zero for other kinds.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn source_id(&self) -> usize {
        self.source_id
    }

    pub fn body(&self) -> Rc<[Statement]> {
        Rc::clone(&self.body)
    }

    pub fn start(&mut self, policy: RestartPolicy) -> Result<StartOutcome, RuntimeError> {
        let total = match self.kind {
            BlockKind::OneShot => return Ok(StartOutcome::Invoke),
            BlockKind::Counted(total) => Some(total),
            BlockKind::Forever => None,
        };
        if self.state == BlockState::Running {
            return Ok(StartOutcome::AlreadyRunning);
        }
        if let Some(total) = total {
            if self.state == BlockState::Exhausted && policy == RestartPolicy::Error {
                return Err(RuntimeError::InvalidLifecycleOperation {
                    target: self.name.clone(),
                    reason: "block is exhausted and restarting is disabled".to_string(),
                });
            }
            // Every start begins a full run, including a start after stop.
            self.remaining = total;
            if total == 0 {
                self.state = BlockState::Exhausted;
                return Ok(StartOutcome::Exhausted);
            }
        }
        self.state = BlockState::Running;
        Ok(StartOutcome::Started)
    }

    /// Returns true if the block left `Running`.
    pub fn stop(&mut self) -> bool {
        if self.state != BlockState::Running {
            return false;
        }
        self.state = BlockState::Stopped;
        true
    }

    /// Body to run for this pass, if the block is scheduled to tick.
    pub fn begin_tick(&self) -> Option<Rc<[Statement]>> {
        match (self.kind, self.state) {
            (BlockKind::OneShot, _) => None,
            (_, BlockState::Running) => Some(self.body()),
            _ => None,
        }
    }

    /// Account for a completed tick. Returns true if the block just exhausted.
    pub fn finish_tick(&mut self) -> bool {
        if !matches!(self.kind, BlockKind::Counted(_)) {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 && self.state == BlockState::Running {
            self.state = BlockState::Exhausted;
            return true;
        }
        false
    }

    /// Adopt the lifecycle of the block this one replaces on reload.
    ///
    /// Only a running block carries over; everything else starts idle.
    pub fn carry_over(&mut self, previous: &Block) {
        if previous.state != BlockState::Running {
            return;
        }
        match (self.kind, previous.kind) {
            (BlockKind::OneShot, _) => {}
            (BlockKind::Counted(total), BlockKind::Counted(_)) => {
                self.remaining = previous.remaining.min(total);
                self.state = if self.remaining == 0 {
                    BlockState::Exhausted
                } else {
                    BlockState::Running
                };
            }
            (BlockKind::Counted(total), _) => {
                self.remaining = total;
                self.state = if total == 0 {
                    BlockState::Exhausted
                } else {
                    BlockState::Running
                };
            }
            (BlockKind::Forever, _) => self.state = BlockState::Running,
        }
    }
}

/// Declared blocks, in source order.
#[derive(Debug, Default)]
pub struct BlockTable {
    blocks: IndexMap<String, Block>,
}

impl BlockTable {
    pub fn from_decls(decls: &[BlockDecl], source_id: usize) -> Self {
        let blocks = decls
            .iter()
            .map(|decl| (decl.name.clone(), Block::from_decl(decl, source_id)))
            .collect();
        BlockTable { blocks }
    }

    pub fn get(&self, name: &str) -> Option<&Block> {
        self.blocks.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Block> {
        self.blocks.get_mut(name)
    }

    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks.get_index_mut(index).map(|(_, block)| block)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: BlockKind) -> Block {
        Block::from_decl(
            &BlockDecl {
                name: "b".to_string(),
                kind,
                parallel: false,
                body: Vec::new(),
                span: 0..0,
            },
            0,
        )
    }

    #[test]
    fn counted_block_runs_down_to_exhausted() {
        let mut b = block(BlockKind::Counted(2));
        assert_eq!(b.state(), BlockState::Idle);
        assert_eq!(b.start(RestartPolicy::Reset).unwrap(), StartOutcome::Started);
        assert!(b.begin_tick().is_some());
        assert!(!b.finish_tick());
        assert_eq!(b.remaining(), 1);
        assert!(b.finish_tick());
        assert_eq!(b.state(), BlockState::Exhausted);
        assert!(b.begin_tick().is_none());
    }

    #[test]
    fn start_while_running_is_a_no_op() {
        let mut b = block(BlockKind::Counted(3));
        b.start(RestartPolicy::Reset).unwrap();
        b.finish_tick();
        assert_eq!(
            b.start(RestartPolicy::Reset).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert_eq!(b.remaining(), 2);
    }

    #[test]
    fn restart_after_stop_resets_the_count() {
        let mut b = block(BlockKind::Counted(3));
        b.start(RestartPolicy::Reset).unwrap();
        b.finish_tick();
        assert!(b.stop());
        assert_eq!(b.state(), BlockState::Stopped);
        assert_eq!(b.remaining(), 2);
        assert!(b.begin_tick().is_none());
        // The restart policy only guards exhausted blocks.
        b.start(RestartPolicy::Error).unwrap();
        assert_eq!(b.remaining(), 3);
        assert_eq!(b.state(), BlockState::Running);
    }

    #[test]
    fn stop_outside_running_changes_nothing() {
        let mut idle = block(BlockKind::Forever);
        assert!(!idle.stop());
        assert_eq!(idle.state(), BlockState::Idle);

        let mut done = block(BlockKind::Counted(1));
        done.start(RestartPolicy::Reset).unwrap();
        done.finish_tick();
        assert!(!done.stop());
        assert_eq!(done.state(), BlockState::Exhausted);
    }

    #[test]
    fn restart_policy_controls_exhausted_blocks() {
        let mut b = block(BlockKind::Counted(1));
        b.start(RestartPolicy::Reset).unwrap();
        b.finish_tick();
        assert!(b.start(RestartPolicy::Error).is_err());
        assert_eq!(b.state(), BlockState::Exhausted);
        assert_eq!(b.start(RestartPolicy::Reset).unwrap(), StartOutcome::Started);
        assert_eq!(b.remaining(), 1);
    }

    #[test]
    fn zero_count_exhausts_on_start() {
        let mut b = block(BlockKind::Counted(0));
        assert_eq!(b.start(RestartPolicy::Reset).unwrap(), StartOutcome::Exhausted);
        assert_eq!(b.state(), BlockState::Exhausted);
        assert!(b.begin_tick().is_none());
    }

    #[test]
    fn stopping_inside_final_tick_leaves_block_stopped() {
        let mut b = block(BlockKind::Counted(1));
        b.start(RestartPolicy::Reset).unwrap();
        b.stop();
        assert!(!b.finish_tick());
        assert_eq!(b.state(), BlockState::Stopped);
        assert_eq!(b.remaining(), 0);
        b.start(RestartPolicy::Error).unwrap();
        assert_eq!(b.remaining(), 1);
    }

    #[test]
    fn one_shot_start_asks_caller_to_invoke() {
        let mut b = block(BlockKind::OneShot);
        assert_eq!(b.start(RestartPolicy::Reset).unwrap(), StartOutcome::Invoke);
        assert_eq!(b.state(), BlockState::Idle);
        assert!(!b.stop());
    }

    #[test]
    fn reload_keeps_running_state_and_clamps_count() {
        let mut old = block(BlockKind::Counted(10));
        old.start(RestartPolicy::Reset).unwrap();
        for _ in 0..4 {
            old.finish_tick();
        }
        let mut new = block(BlockKind::Counted(3));
        new.carry_over(&old);
        assert_eq!(new.state(), BlockState::Running);
        assert_eq!(new.remaining(), 3);

        let mut idle_old = block(BlockKind::Forever);
        idle_old.stop();
        let mut replacement = block(BlockKind::Forever);
        replacement.carry_over(&idle_old);
        assert_eq!(replacement.state(), BlockState::Idle);
    }
}
