//! Execution frames.
//!
//! Every executing block, function call and loop owns a [`Frame`].  Control
//! flow (`$Return`, `$Break`, `$Continue`) works by marking frame statuses;
//! the executor checks the current frame after each statement and unwinds
//! while it is not [`ProgramStatus::Next`].

use bitflags::bitflags;

use super::context::ScopeRef;
use super::value::Arg;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// Owns a variable scope of its own.
        const VAR_SCOPE  = 0b001;
        /// Stops `$Return`.
        const FLOW_SCOPE = 0b010;
        /// Target of `$Break` / `$Continue`.
        const LOOP_SCOPE = 0b100;
        const FUNC_CALL  = Self::VAR_SCOPE.bits() | Self::FLOW_SCOPE.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgramStatus {
    #[default]
    Next,
    End,
    LoopEnd,
}

#[derive(Debug)]
pub struct Frame {
    pub flags: FrameFlags,
    pub status: ProgramStatus,
    pub scope: ScopeRef,
    /// `Block Main`, `call Foo`, ...
    pub label: String,
    pub return_arg: Option<Arg>,
    /// Outcome of the last `@If` seen in this frame, consumed by `@Else`.
    pub if_record: Option<bool>,
}

impl Frame {
    pub fn new(flags: FrameFlags, scope: ScopeRef, label: impl Into<String>) -> Self {
        Frame {
            flags,
            status: ProgramStatus::Next,
            scope,
            label: label.into(),
            return_arg: None,
            if_record: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        tracing::trace!(depth = self.frames.len() + 1, label = %frame.label, "push frame");
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        let frame = self.frames.pop();
        if let Some(f) = &frame {
            tracing::trace!(depth = self.frames.len(), label = %f.label, status = ?f.status, "pop frame");
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn current(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Status of the innermost frame; an empty stack counts as ended.
    pub fn status(&self) -> ProgramStatus {
        self.current().map_or(ProgramStatus::End, |f| f.status)
    }

    /// End every frame up to and including the nearest flow frame, which
    /// receives `arg` as its result.
    pub fn set_return(&mut self, arg: Option<Arg>) {
        for frame in self.frames.iter_mut().rev() {
            frame.status = ProgramStatus::End;
            if frame.flags.contains(FrameFlags::FLOW_SCOPE) {
                frame.return_arg = arg;
                return;
            }
        }
    }

    /// End the frames inside the nearest loop and mark the loop finished.
    pub fn set_break(&mut self) -> Result<(), String> {
        let idx = self.nearest_loop().ok_or("Break outside of a loop")?;
        for frame in &mut self.frames[idx + 1..] {
            frame.status = ProgramStatus::End;
        }
        self.frames[idx].status = ProgramStatus::LoopEnd;
        Ok(())
    }

    /// End the current iteration of the nearest loop.
    pub fn set_continue(&mut self) -> Result<(), String> {
        let idx = self.nearest_loop().ok_or("Continue outside of a loop")?;
        for frame in &mut self.frames[idx..] {
            frame.status = ProgramStatus::End;
        }
        Ok(())
    }

    /// End the current block; loop frames pass the request to their owner.
    pub fn set_block_end(&mut self) {
        for frame in self.frames.iter_mut().rev() {
            frame.status = ProgramStatus::End;
            if !frame.flags.contains(FrameFlags::LOOP_SCOPE) {
                return;
            }
        }
    }

    /// Status of the frame below the current one.
    pub fn parent_status(&self) -> ProgramStatus {
        let len = self.frames.len();
        if len < 2 {
            return ProgramStatus::Next;
        }
        self.frames[len - 2].status
    }

    /// The innermost loop frame of the current call.  Loops of a caller are
    /// out of reach.
    fn nearest_loop(&self) -> Option<usize> {
        for (idx, frame) in self.frames.iter().enumerate().rev() {
            if frame.flags.contains(FrameFlags::LOOP_SCOPE) {
                return Some(idx);
            }
            if frame.flags.contains(FrameFlags::FUNC_CALL) {
                return None;
            }
        }
        None
    }

    /// Frame labels, innermost first.
    pub fn collect_stacks(&self) -> Vec<String> {
        self.frames.iter().rev().map(|f| format!("{} [{}]", f.label, describe(f.flags))).collect()
    }
}

fn describe(flags: FrameFlags) -> &'static str {
    if flags.contains(FrameFlags::FUNC_CALL) {
        "call"
    } else if flags.contains(FrameFlags::LOOP_SCOPE) {
        "loop"
    } else if flags.contains(FrameFlags::FLOW_SCOPE) {
        "flow"
    } else if flags.contains(FrameFlags::VAR_SCOPE) {
        "scope"
    } else {
        "plain"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
