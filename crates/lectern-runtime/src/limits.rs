//! Resource bounding inside one interpreter.
//!
//! A single hook fires on every call, every return and every
//! [`INSTRUCTION_STRIDE`] VM instructions. It tracks call depth and executed
//! instructions against the policy budgets and polls the cancel token and the
//! execution deadline. Once an execution is aborted every later hook event
//! raises again, and `pcall`, `xpcall` and `coroutine.resume` are wrapped so a
//! script cannot swallow the abort.

use crate::policy::{Capability, CapabilityPolicy};
use crate::pool::CancelToken;
use mlua::{
    DebugEvent, Function, HookTriggers, Lua, MultiValue, Result as LuaResult, Table, VmState,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

/// VM instructions between deadline and budget checks.
pub const INSTRUCTION_STRIDE: u32 = 1_000;

/// Why an execution was stopped from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Abort {
    StackDepth(u32),
    InstructionBudget(u64),
    Cancelled,
    DeadlineExceeded,
}

impl Abort {
    pub(crate) fn message(&self) -> String {
        match self {
            Abort::StackDepth(limit) => format!("stack depth limit of {} exceeded", limit),
            Abort::InstructionBudget(limit) => {
                format!("instruction budget of {} exhausted", limit)
            }
            Abort::Cancelled => "execution cancelled".to_string(),
            Abort::DeadlineExceeded => "execution deadline exceeded".to_string(),
        }
    }

    /// Whether the abort surfaces as a timeout rather than a script error.
    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, Abort::Cancelled | Abort::DeadlineExceeded)
    }
}

/// Mutable bookkeeping for one execution. Lives on the worker thread only.
pub(crate) struct ExecutionState {
    cancel: CancelToken,
    deadline: Instant,
    max_depth: u32,
    max_instructions: u64,
    depth: Cell<u32>,
    instructions: Cell<u64>,
    abort: Cell<Option<Abort>>,
    violations: RefCell<Vec<Capability>>,
}

impl ExecutionState {
    pub(crate) fn new(policy: &CapabilityPolicy, cancel: CancelToken, deadline: Instant) -> Self {
        Self {
            cancel,
            deadline,
            max_depth: policy.max_stack_depth(),
            max_instructions: policy.max_instruction_count(),
            depth: Cell::new(0),
            instructions: Cell::new(0),
            abort: Cell::new(None),
            violations: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn abort(&self) -> Option<Abort> {
        self.abort.get()
    }

    fn raise(&self, reason: Abort) -> mlua::Error {
        if self.abort.get().is_none() {
            self.abort.set(Some(reason));
        }
        mlua::Error::RuntimeError(self.abort.get().unwrap_or(reason).message())
    }

    pub(crate) fn record_violation(&self, capability: Capability) {
        self.violations.borrow_mut().push(capability);
    }

    /// First denied capability, if any.
    pub(crate) fn first_violation(&self) -> Option<Capability> {
        self.violations.borrow().first().copied()
    }

    /// Error to re-raise when a protected call returns after an abort or a
    /// denied access.
    pub(crate) fn pending(&self) -> Option<mlua::Error> {
        if let Some(abort) = self.abort.get() {
            return Some(mlua::Error::RuntimeError(abort.message()));
        }
        self.first_violation().map(|cap| {
            mlua::Error::RuntimeError(format!("access denied: {} capability", cap))
        })
    }

    /// Poll cancellation and the deadline outside of hook events.
    pub(crate) fn check_interrupt(&self) -> LuaResult<()> {
        if let Some(abort) = self.abort.get() {
            return Err(mlua::Error::RuntimeError(abort.message()));
        }
        if self.cancel.is_cancelled() {
            return Err(self.raise(Abort::Cancelled));
        }
        if Instant::now() >= self.deadline {
            return Err(self.raise(Abort::DeadlineExceeded));
        }
        Ok(())
    }

    /// Milliseconds left before the deadline.
    pub(crate) fn remaining_ms(&self) -> u64 {
        self.deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as u64
    }

    fn on_event(&self, event: DebugEvent) -> LuaResult<VmState> {
        if let Some(abort) = self.abort.get() {
            return Err(mlua::Error::RuntimeError(abort.message()));
        }
        match event {
            DebugEvent::Call => {
                let depth = self.depth.get() + 1;
                self.depth.set(depth);
                if depth > self.max_depth {
                    return Err(self.raise(Abort::StackDepth(self.max_depth)));
                }
            }
            DebugEvent::Ret => {
                self.depth.set(self.depth.get().saturating_sub(1));
            }
            DebugEvent::Count => {
                let executed = self.instructions.get() + u64::from(INSTRUCTION_STRIDE);
                self.instructions.set(executed);
                if executed > self.max_instructions {
                    return Err(self.raise(Abort::InstructionBudget(self.max_instructions)));
                }
                self.check_interrupt()?;
            }
            _ => {}
        }
        Ok(VmState::Continue)
    }
}

/// Install the depth/budget/deadline hook.
pub(crate) fn install_hook(lua: &Lua, state: Rc<ExecutionState>) {
    let triggers = HookTriggers::new()
        .on_calls()
        .on_returns()
        .every_nth_instruction(INSTRUCTION_STRIDE);
    lua.set_hook(triggers, move |_lua, debug| state.on_event(debug.event()));
}

/// Wrap the error-catching builtins so a pending abort or violation is
/// re-raised as soon as they return.
pub(crate) fn guard_protected_calls(lua: &Lua, state: &Rc<ExecutionState>) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["pcall", "xpcall"] {
        let original: Function = globals.get(name)?;
        globals.set(name, guarded(lua, original, Rc::clone(state))?)?;
    }

    if let Some(coroutine) = globals.get::<Option<Table>>("coroutine")? {
        let resume: Function = coroutine.get("resume")?;
        coroutine.set("resume", guarded(lua, resume, Rc::clone(state))?)?;
    }
    Ok(())
}

fn guarded(lua: &Lua, original: Function, state: Rc<ExecutionState>) -> LuaResult<Function> {
    lua.create_function(move |_, args: MultiValue| {
        // Frames unwound by a caught error never fire return events.
        let depth = state.depth.get();
        let results: MultiValue = original.call(args)?;
        state.depth.set(depth);
        match state.pending() {
            Some(err) => Err(err),
            None => Ok(results),
        }
    })
}
