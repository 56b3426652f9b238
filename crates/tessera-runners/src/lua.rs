//! Lua 5.4 runner for native-code units
//!
//! Every call gets a fresh VM: the unit's file is loaded, its global
//! function is looked up by symbol and called with the resolved arguments
//! in declaration order. Values cross the boundary through serde
//! ([`LuaSerdeExt`]). A call with a time budget also installs an
//! instruction hook that aborts the VM once the deadline passes, so a
//! runaway script does not keep a blocking thread forever.
//!
//! Scripts call other units through `tessera.invoke(name, args)`. The call
//! blocks the script until the nested unit finishes and sees the same
//! registry version as the outer call.

use async_trait::async_trait;
use mlua::{Function, HookTriggers, Lua, LuaSerdeExt, MultiValue, Value, VmState};
use serde_json::{Map, Value as JsonValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crate::shape::shape_value;
use tessera_core::{Descriptor, NestedCalls, RunRequest, Runner, RunnerFailure, SourceKind};
use tracing::{debug, info, warn};

/// Instructions between deadline checks
const HOOK_EVERY: u32 = 10_000;

/// Budget for loading a chunk during promotion checks
const CHECK_BUDGET: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, Copy)]
pub struct LuaRunner;

impl LuaRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for LuaRunner {
    fn source_kind(&self) -> SourceKind {
        SourceKind::NativeCode
    }

    async fn run(&self, request: RunRequest) -> Result<JsonValue, RunnerFailure> {
        let deadline = request.budget.map(|budget| Instant::now() + budget);
        tokio::task::spawn_blocking(move || call(&request, deadline))
            .await
            .map_err(|e| RunnerFailure::Execution(format!("lua task failed: {}", e)))?
    }

    fn check(&self, descriptor: &Descriptor) -> Result<(), String> {
        let vm = Vm::new(Some(Instant::now() + CHECK_BUDGET), None).map_err(|e| e.to_string())?;
        vm.load(descriptor).map_err(|e| format!("chunk failed to load: {}", e))?;
        vm.handler(&descriptor.handler.symbol)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn call(request: &RunRequest, deadline: Option<Instant>) -> Result<JsonValue, RunnerFailure> {
    let descriptor = &request.descriptor;
    let vm = Vm::new(deadline, request.nested.clone())
        .map_err(|e| RunnerFailure::Execution(e.to_string()))?;
    vm.load(descriptor).map_err(|e| vm.failure(e))?;
    let handler = vm.handler(&descriptor.handler.symbol)?;

    let mut args = Vec::with_capacity(descriptor.signature.arguments.len());
    for spec in &descriptor.signature.arguments {
        let value = match request.arguments.get(&spec.name) {
            None | Some(JsonValue::Null) => Value::Nil,
            Some(value) => vm.lua.to_value(value).map_err(|e| vm.failure(e))?,
        };
        args.push(value);
    }

    debug!(unit = %descriptor.name, symbol = %descriptor.handler.symbol, "Calling Lua handler");
    let result: Value = handler
        .call(MultiValue::from_vec(args))
        .map_err(|e| vm.failure(e))?;

    let value = vm
        .lua
        .from_value::<JsonValue>(result)
        .map_err(|e| RunnerFailure::InvalidReturn(e.to_string()))?;
    shape_value(value, &descriptor.signature.return_shape)
}

/// One short-lived interpreter
struct Vm {
    lua: Lua,
    interrupted: Arc<AtomicBool>,
}

impl Vm {
    fn new(deadline: Option<Instant>, nested: Option<NestedCalls>) -> mlua::Result<Self> {
        let lua = Lua::new();
        install_globals(&lua, nested)?;

        let interrupted = Arc::new(AtomicBool::new(false));
        if let Some(deadline) = deadline {
            let flag = interrupted.clone();
            let _ = lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_EVERY),
                move |_lua, _debug| {
                    if Instant::now() >= deadline {
                        flag.store(true, Ordering::SeqCst);
                        return Err(mlua::Error::RuntimeError("time budget exceeded".to_string()));
                    }
                    Ok(VmState::Continue)
                },
            );
        }
        Ok(Self { lua, interrupted })
    }

    fn load(&self, descriptor: &Descriptor) -> mlua::Result<()> {
        self.lua
            .load(descriptor.body.as_str())
            .set_name(descriptor.source.path.display().to_string())
            .exec()
    }

    fn handler(&self, symbol: &str) -> Result<Function, RunnerFailure> {
        let value: Value = self
            .lua
            .globals()
            .get(symbol)
            .map_err(|e| RunnerFailure::Execution(e.to_string()))?;
        match value {
            Value::Function(function) => Ok(function),
            _ => Err(RunnerFailure::MissingHandler(symbol.to_string())),
        }
    }

    fn failure(&self, error: mlua::Error) -> RunnerFailure {
        if self.interrupted.load(Ordering::SeqCst) {
            RunnerFailure::Interrupted
        } else {
            RunnerFailure::Execution(error.to_string())
        }
    }
}

/// `tessera.log`, `tessera.json_encode`, `tessera.json_decode`, and
/// `tessera.invoke` when the call can reach other units
fn install_globals(lua: &Lua, nested: Option<NestedCalls>) -> mlua::Result<()> {
    let tessera = lua.create_table()?;

    let log = lua.create_function(|_, (level, message): (String, String)| {
        match level.as_str() {
            "debug" => debug!(target: "tessera::lua", "{}", message),
            "warn" => warn!(target: "tessera::lua", "{}", message),
            _ => info!(target: "tessera::lua", "{}", message),
        }
        Ok(())
    })?;
    tessera.set("log", log)?;

    let json_encode = lua.create_function(|_, value: Value| {
        serde_json::to_string(&value).map_err(mlua::Error::external)
    })?;
    tessera.set("json_encode", json_encode)?;

    let json_decode = lua.create_function(|lua, text: String| {
        let json: JsonValue = serde_json::from_str(&text).map_err(mlua::Error::external)?;
        lua.to_value(&json)
    })?;
    tessera.set("json_decode", json_decode)?;

    if let Some(nested) = nested {
        let invoke = lua.create_function(move |lua, (name, args): (String, Option<Value>)| {
            let input = match args {
                None | Some(Value::Nil) => Map::new(),
                Some(value) => match lua.from_value::<JsonValue>(value)? {
                    JsonValue::Object(map) => map,
                    JsonValue::Array(items) if items.is_empty() => Map::new(),
                    _ => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "arguments to '{}' must be a table of named values",
                            name
                        )))
                    }
                },
            };
            match nested.invoke_blocking(&name, input).map_err(mlua::Error::external)? {
                JsonValue::Null => Ok(Value::Nil),
                value => lua.to_value(&value),
            }
        })?;
        tessera.set("invoke", invoke)?;
    }

    lua.globals().set("tessera", tessera)
}
