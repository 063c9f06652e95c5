//! One script execution inside one fresh interpreter.
//!
//! Runs on a pool worker thread. Everything created here (the `Lua` state,
//! the gate, the hook state) is dropped when [`run`] returns.

use crate::context::ExecutionRequest;
use crate::gate::HostGate;
use crate::limits::{guard_protected_calls, install_hook, ExecutionState};
use crate::policy::Capability;
use crate::pool::CancelToken;
use crate::result::ExecutionResult;
use lectern_extension::host::{describe, from_json, to_json};
use lectern_extension::{ExecutionLog, LogLevel};
use mlua::{Lua, LuaOptions, MultiValue, StdLib, Value};
use std::rc::Rc;
use std::time::Instant;
use tracing::debug;

/// A request plus the handles that tie it to its caller.
pub(crate) struct ScriptJob {
    pub request: ExecutionRequest,
    pub log: ExecutionLog,
    pub cancel: CancelToken,
    pub deadline: Instant,
    pub memory_limit: usize,
}

/// Run one script to completion and classify the outcome.
pub(crate) fn run(job: ScriptJob) -> ExecutionResult {
    if job.cancel.is_cancelled() {
        return ExecutionResult::Timeout;
    }

    let label = job.request.context.label();
    let state = Rc::new(ExecutionState::new(
        &job.request.policy,
        job.cancel.clone(),
        job.deadline,
    ));

    let outcome = prepare(&job, &label, &state).and_then(|lua| evaluate(&lua, &job, &label));
    let result = classify(outcome, &state);
    if let ExecutionResult::ScriptError(message) = &result {
        debug!(source = %label, error = %message, "Script failed");
    }
    result
}

fn libraries(job: &ScriptJob) -> StdLib {
    let mut libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
    libs |= StdLib::COROUTINE | StdLib::OS;
    if job.request.policy.allows(Capability::File) {
        libs |= StdLib::IO;
    }
    libs
}

/// Build the interpreter: libraries, gate, helpers, context globals, hook.
fn prepare(job: &ScriptJob, label: &str, state: &Rc<ExecutionState>) -> mlua::Result<Lua> {
    let lua = Lua::new_with(libraries(job), LuaOptions::default())?;
    if job.memory_limit > 0 {
        lua.set_memory_limit(job.memory_limit)?;
    }

    HostGate::new(job.request.policy.clone(), Rc::clone(state), label).install(&lua)?;
    lectern_extension::install(&lua)?;
    lua.set_app_data(job.log.clone());

    let globals = lua.globals();
    let log = job.log.clone();
    globals.set(
        "print",
        lua.create_function(move |lua, args: MultiValue| {
            let line: Vec<String> = args.iter().map(|v| describe(lua, v)).collect();
            log.record(LogLevel::Info, line.join("\t"), None);
            Ok(())
        })?,
    )?;

    let context = &job.request.context;
    if let Some(source) = &context.source {
        globals.set("source", from_json(&lua, source)?)?;
    }
    if let Some(item) = &context.item {
        globals.set("item", from_json(&lua, item)?)?;
    }
    if let Some(chapter) = &context.chapter {
        globals.set("chapter", from_json(&lua, chapter)?)?;
    }
    // Extras may not shadow libraries, helpers or the context globals above.
    for (name, value) in &context.extra {
        if !globals.get::<Value>(name.as_str())?.is_nil() {
            return Err(mlua::Error::RuntimeError(format!(
                "context variable '{}' would shadow a built-in global",
                name
            )));
        }
        globals.set(name.as_str(), from_json(&lua, value)?)?;
    }

    guard_protected_calls(&lua, state)?;
    install_hook(&lua, Rc::clone(state));
    Ok(lua)
}

fn evaluate(lua: &Lua, job: &ScriptJob, label: &str) -> mlua::Result<serde_json::Value> {
    let chunk = lua
        .load(job.request.code.as_str())
        .set_name(format!("={}", label));

    let value = match &job.request.entry {
        None => chunk.eval::<Value>()?,
        Some(entry) => {
            chunk.exec()?;
            let function = match lua.globals().get::<Value>(entry.as_str())? {
                Value::Function(function) => function,
                _ => {
                    return Err(mlua::Error::RuntimeError(format!(
                        "entry function '{}' not found",
                        entry
                    )))
                }
            };
            let args = job
                .request
                .args
                .iter()
                .map(|arg| from_json(lua, arg))
                .collect::<mlua::Result<Vec<_>>>()?;
            function.call::<Value>(MultiValue::from_vec(args))?
        }
    };
    to_json(lua, value)
}

fn classify(
    outcome: mlua::Result<serde_json::Value>,
    state: &ExecutionState,
) -> ExecutionResult {
    if let Some(capability) = state.first_violation() {
        return ExecutionResult::PolicyViolation(capability);
    }
    if let Some(abort) = state.abort() {
        return if abort.is_timeout() {
            ExecutionResult::Timeout
        } else {
            ExecutionResult::ScriptError(abort.message())
        };
    }
    match outcome {
        Ok(value) => ExecutionResult::Success(value),
        Err(err) => ExecutionResult::ScriptError(error_message(&err)),
    }
}

/// Flatten an interpreter error into one non-empty line.
fn error_message(err: &mlua::Error) -> String {
    let message = match err {
        mlua::Error::SyntaxError { message, .. } => format!("syntax error: {}", message),
        mlua::Error::RuntimeError(message) => message.clone(),
        mlua::Error::MemoryError(_) => "memory limit exceeded".to_string(),
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::WithContext { cause, .. } => error_message(cause),
        other => other.to_string(),
    };
    if message.trim().is_empty() {
        "script failed without a message".to_string()
    } else {
        message
    }
}
