//! Host-access gate.
//!
//! Every API that reaches outside the interpreter goes through
//! [`HostGate::check`]. A denied check records the capability on the
//! execution, emits a `warn` event and raises a Lua error. The gate is
//! installed before the first script statement runs:
//!
//! - `os` keeps only `time`, `clock`, `date` and `difftime` ungated
//! - `io` is a denying stub unless file access is granted; `io.popen` is
//!   always denied
//! - `debug`, `package` and `process` are denying stubs
//! - `require`, `load`, `loadfile`, `dofile` are always denied
//! - `file`, `socket`, `reflect` and `thread` are host tables whose functions
//!   check their capability on every call

use crate::limits::ExecutionState;
use crate::policy::{Capability, CapabilityPolicy};
use lectern_extension::host::describe;
use mlua::{Function, Lua, MultiValue, Result as LuaResult, Table, Value};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Upper bound on bytes read back from a socket request.
const MAX_SOCKET_RESPONSE: u64 = 4 * 1024 * 1024;

/// Default socket timeout when the script passes none.
const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 5_000;

/// `socket.request(host, port, payload, timeout_ms?)`
type SocketRequestArgs = (String, u16, mlua::String, Option<u64>);

/// Capability checks for one execution.
#[derive(Clone)]
pub(crate) struct HostGate {
    policy: CapabilityPolicy,
    state: Rc<ExecutionState>,
    label: Arc<str>,
}

impl HostGate {
    pub(crate) fn new(policy: CapabilityPolicy, state: Rc<ExecutionState>, label: &str) -> Self {
        Self {
            policy,
            state,
            label: Arc::from(label),
        }
    }

    /// Allow or deny `operation`.
    pub(crate) fn check(&self, capability: Capability, operation: &str) -> LuaResult<()> {
        if self.policy.allows(capability) {
            return Ok(());
        }
        self.state.record_violation(capability);
        warn!(
            source = %self.label,
            capability = capability.as_str(),
            operation,
            "Denied host access"
        );
        Err(mlua::Error::RuntimeError(format!(
            "access denied: {} requires the {} capability",
            operation, capability
        )))
    }

    /// Install every gate point into `lua`.
    pub(crate) fn install(&self, lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();

        for name in ["require", "load", "loadfile", "dofile"] {
            globals.set(name, self.denied_fn(lua, Capability::ClassLoader, name)?)?;
        }
        globals.set("package", self.deny_table(lua, Capability::ClassLoader, "package")?)?;
        globals.set("process", self.deny_table(lua, Capability::Process, "process")?)?;
        globals.set("debug", self.deny_table(lua, Capability::Reflection, "debug")?)?;

        self.gate_os(lua, &globals)?;
        self.gate_io(lua, &globals)?;

        if !self.policy.allows(Capability::Reflection) {
            globals.set(
                "collectgarbage",
                self.denied_fn(lua, Capability::Reflection, "collectgarbage")?,
            )?;
            let string: Table = globals.get("string")?;
            string.set(
                "dump",
                self.denied_fn(lua, Capability::Reflection, "string.dump")?,
            )?;
        }

        globals.set("file", self.file_table(lua)?)?;
        globals.set("socket", self.socket_table(lua)?)?;
        globals.set("reflect", self.reflect_table(lua)?)?;
        globals.set("thread", self.thread_table(lua)?)?;
        Ok(())
    }

    fn gate_os(&self, lua: &Lua, globals: &Table) -> LuaResult<()> {
        let os: Table = match globals.get::<Option<Table>>("os")? {
            Some(os) => os,
            None => return Ok(()),
        };
        for name in ["execute", "exit", "getenv", "setlocale"] {
            let op = format!("os.{}", name);
            os.set(name, self.denied_fn(lua, Capability::Process, &op)?)?;
        }
        if !self.policy.allows(Capability::File) {
            for name in ["remove", "rename", "tmpname"] {
                let op = format!("os.{}", name);
                os.set(name, self.denied_fn(lua, Capability::File, &op)?)?;
            }
        }
        Ok(())
    }

    fn gate_io(&self, lua: &Lua, globals: &Table) -> LuaResult<()> {
        match globals.get::<Option<Table>>("io")? {
            Some(io) if self.policy.allows(Capability::File) => {
                io.set("popen", self.denied_fn(lua, Capability::Process, "io.popen")?)?;
            }
            _ => {
                globals.set("io", self.deny_table(lua, Capability::File, "io")?)?;
            }
        }
        Ok(())
    }

    /// A function that always goes through the gate for `capability`.
    fn denied_fn(
        &self,
        lua: &Lua,
        capability: Capability,
        operation: &str,
    ) -> LuaResult<Function> {
        let gate = self.clone();
        let operation = operation.to_string();
        lua.create_function(move |_, _: MultiValue| gate.check(capability, &operation))
    }

    /// A table whose every read or write goes through the gate.
    fn deny_table(
        &self,
        lua: &Lua,
        capability: Capability,
        name: &'static str,
    ) -> LuaResult<Table> {
        let table = lua.create_table()?;
        let meta = lua.create_table()?;

        let gate = self.clone();
        meta.set(
            "__index",
            lua.create_function(move |lua, (_, key): (Table, Value)| {
                gate.check(capability, &format!("{}.{}", name, describe(lua, &key)))?;
                Ok(Value::Nil)
            })?,
        )?;
        let gate = self.clone();
        meta.set(
            "__newindex",
            lua.create_function(move |lua, (_, key, _): (Table, Value, Value)| {
                gate.check(capability, &format!("{}.{}", name, describe(lua, &key)))
            })?,
        )?;
        meta.set("__metatable", false)?;
        table.set_metatable(Some(meta));
        Ok(table)
    }

    // ========================================================================
    // file.*
    // ========================================================================

    fn file_table(&self, lua: &Lua) -> LuaResult<Table> {
        let table = lua.create_table()?;

        let gate = self.clone();
        table.set(
            "read",
            lua.create_function(move |_, path: String| {
                gate.check(Capability::File, "file.read")?;
                Ok(io_try(std::fs::read_to_string(&path)))
            })?,
        )?;

        let gate = self.clone();
        table.set(
            "write",
            lua.create_function(move |_, (path, content): (String, mlua::String)| {
                gate.check(Capability::File, "file.write")?;
                Ok(io_try(std::fs::write(&path, &*content.as_bytes()).map(|_| true)))
            })?,
        )?;

        let gate = self.clone();
        table.set(
            "exists",
            lua.create_function(move |_, path: String| {
                gate.check(Capability::File, "file.exists")?;
                Ok(std::path::Path::new(&path).exists())
            })?,
        )?;

        let gate = self.clone();
        table.set(
            "list",
            lua.create_function(move |lua, path: String| {
                gate.check(Capability::File, "file.list")?;
                let listing = std::fs::read_dir(&path).and_then(|entries| {
                    let mut names = entries
                        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
                        .collect::<std::io::Result<Vec<_>>>()?;
                    names.sort();
                    Ok(names)
                });
                match listing {
                    Ok(names) => Ok((Some(lua.create_sequence_from(names)?), None)),
                    Err(err) => Ok((None, Some(err.to_string()))),
                }
            })?,
        )?;

        Ok(table)
    }

    // ========================================================================
    // socket.*
    // ========================================================================

    fn socket_table(&self, lua: &Lua) -> LuaResult<Table> {
        let table = lua.create_table()?;

        let gate = self.clone();
        table.set(
            "request",
            lua.create_function(move |lua, args: SocketRequestArgs| {
                let (host, port, payload, timeout) = args;
                gate.check(Capability::Socket, "socket.request")?;
                let timeout = gate.socket_timeout(timeout);
                match socket_request(&host, port, &payload.as_bytes(), timeout) {
                    Ok(response) => Ok((Some(lua.create_string(&response)?), None)),
                    Err(err) => Ok((None, Some(err.to_string()))),
                }
            })?,
        )?;

        let gate = self.clone();
        table.set(
            "connect",
            lua.create_function(move |_, (host, port, timeout): (String, u16, Option<u64>)| {
                gate.check(Capability::Socket, "socket.connect")?;
                let timeout = gate.socket_timeout(timeout);
                Ok(io_try(connect(&host, port, timeout).map(|_| true)))
            })?,
        )?;

        Ok(table)
    }

    /// Socket timeout clamped to the time left before the execution deadline.
    fn socket_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let requested = requested_ms.unwrap_or(DEFAULT_SOCKET_TIMEOUT_MS).max(1);
        Duration::from_millis(requested.min(self.state.remaining_ms().max(1)))
    }

    // ========================================================================
    // reflect.* / thread.*
    // ========================================================================

    fn reflect_table(&self, lua: &Lua) -> LuaResult<Table> {
        let table = lua.create_table()?;

        let gate = self.clone();
        table.set(
            "globals",
            lua.create_function(move |lua, ()| {
                gate.check(Capability::Reflection, "reflect.globals")?;
                let mut names = Vec::new();
                for pair in lua.globals().pairs::<Value, Value>() {
                    let (key, _) = pair?;
                    if let Value::String(name) = key {
                        names.push(name.to_string_lossy());
                    }
                }
                names.sort();
                lua.create_sequence_from(names)
            })?,
        )?;

        let gate = self.clone();
        table.set(
            "typeof",
            lua.create_function(move |_, value: Value| {
                gate.check(Capability::Reflection, "reflect.typeof")?;
                Ok(value.type_name())
            })?,
        )?;

        let gate = self.clone();
        table.set(
            "memory",
            lua.create_function(move |lua, ()| {
                gate.check(Capability::Reflection, "reflect.memory")?;
                Ok(lua.used_memory())
            })?,
        )?;

        Ok(table)
    }

    fn thread_table(&self, lua: &Lua) -> LuaResult<Table> {
        let table = lua.create_table()?;
        for name in ["spawn", "sleep"] {
            let op = format!("thread.{}", name);
            table.set(name, self.denied_fn(lua, Capability::Thread, &op)?)?;
        }
        Ok(table)
    }
}

fn io_try<T>(result: std::io::Result<T>) -> (Option<T>, Option<String>) {
    match result {
        Ok(value) => (Some(value), None),
        Err(err) => (None, Some(err.to_string())),
    }
}

fn connect(host: &str, port: u16, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host did not resolve")
    }))
}

/// Write `payload`, half-close, and read the reply until EOF.
fn socket_request(
    host: &str,
    port: u16,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<Vec<u8>> {
    let mut stream = connect(host, port, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.write_all(payload)?;
    stream.shutdown(Shutdown::Write)?;

    let mut response = Vec::new();
    stream.take(MAX_SOCKET_RESPONSE).read_to_end(&mut response)?;
    Ok(response)
}
