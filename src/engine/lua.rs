//! Lua Engine Module
//!
//! [`ScriptEngine`] backed by an `mlua` Lua 5.4 state. Each request runs the
//! `pre` script, the target script and the `post` script with a global `lws`
//! table bound to the request context for the duration of the call.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;
use mlua::{Function, Lua, Value, Variadic};
use tracing::{debug, error, warn};

use crate::engine::{EngineConfig, EngineFactory, ScriptEngine, RC_OK};
use crate::error::EngineError;
use crate::request::{Redirect, RequestContext};

/// Result code for a script that raised an error.
const RC_SCRIPT_ERROR: i32 = 500;

// == Factory ==
/// Creates one Lua state per engine instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct LuaEngineFactory;

impl EngineFactory for LuaEngineFactory {
    fn create(&self, config: &EngineConfig) -> Result<Box<dyn ScriptEngine>, EngineError> {
        Ok(Box::new(LuaEngine::new(config)?))
    }
}

struct CachedChunk {
    modified: Option<SystemTime>,
    function: Function,
}

// == Lua Engine ==
pub struct LuaEngine {
    lua: Lua,
    pre: Option<PathBuf>,
    post: Option<PathBuf>,
    /// Compiled chunks by path, reloaded when the file's mtime changes
    chunks: HashMap<PathBuf, CachedChunk>,
}

impl LuaEngine {
    // == Constructor ==
    /// Builds a state, applies the search paths and runs the `init` script.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let lua = if config.cpath.is_empty() {
            Lua::new()
        } else {
            // SAFETY: a configured cpath asks for native modules, which only
            // the unrestricted state can load.
            unsafe { Lua::unsafe_new() }
        };

        let package: mlua::Table = lua.globals().get("package")?;
        if !config.path.is_empty() {
            package.set("path", config.path.as_str())?;
        }
        if !config.cpath.is_empty() {
            package.set("cpath", config.cpath.as_str())?;
        }

        let mut engine = Self {
            lua,
            pre: config.pre.clone(),
            post: config.post.clone(),
            chunks: HashMap::new(),
        };

        if let Some(init) = &config.init {
            engine.chunk(init)?.call::<()>(())?;
            debug!(init = %init.display(), "init script executed");
        }

        Ok(engine)
    }

    // == Chunk Cache ==
    fn chunk(&mut self, path: &Path) -> Result<Function, EngineError> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if let Some(cached) = self.chunks.get(path) {
            if cached.modified.is_some() && cached.modified == modified {
                return Ok(cached.function.clone());
            }
        }

        let source = std::fs::read(path).map_err(|source| EngineError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        let function = self
            .lua
            .load(&source[..])
            .set_name(format!("@{}", path.display()))
            .into_function()?;

        debug!(path = %path.display(), "compiled script");
        self.chunks.insert(
            path.to_path_buf(),
            CachedChunk {
                modified,
                function: function.clone(),
            },
        );
        Ok(function)
    }

    fn request_table(&self, ctx: &RequestContext) -> mlua::Result<mlua::Table> {
        let request = self.lua.create_table()?;
        request.set("method", ctx.method.as_str())?;
        request.set("path", ctx.uri.as_str())?;
        request.set("script", ctx.main.as_str())?;
        request.set("path_info", ctx.path_info.as_deref())?;
        request.set("args", ctx.args.as_deref())?;

        let headers = self.lua.create_table()?;
        for (name, value) in ctx.request_headers.iter() {
            headers.set(self.lua.create_string(name)?, self.lua.create_string(value)?)?;
        }
        request.set("headers", headers)?;
        Ok(request)
    }

    fn run_chunks(&mut self, ctx: &mut RequestContext) -> Result<i32, EngineError> {
        let mut chunks = Vec::with_capacity(3);
        if let Some(pre) = self.pre.clone() {
            chunks.push(self.chunk(&pre)?);
        }
        chunks.push(self.chunk(Path::new(&ctx.main))?);
        if let Some(post) = self.post.clone() {
            chunks.push(self.chunk(&post)?);
        }

        let request = self.request_table(ctx)?;

        let RequestContext {
            request_headers,
            request_body,
            response_headers,
            status,
            response_body,
            redirect,
            ..
        } = ctx;
        let request_headers = &*request_headers;
        let lua = &self.lua;

        let outcome = lua.scope(|scope| {
            let api = lua.create_table()?;
            api.set("request", request)?;

            api.set(
                "header",
                scope.create_function(move |lua, name: mlua::String| {
                    match request_headers.peek(&*name.as_bytes()) {
                        Some(value) => Ok(Value::String(lua.create_string(value)?)),
                        None => Ok(Value::Nil),
                    }
                })?,
            )?;

            api.set(
                "read",
                scope.create_function_mut(move |lua, limit: Option<usize>| {
                    let Some(stream) = request_body.as_mut() else {
                        return Ok(Value::Nil);
                    };
                    let data = stream.read_up_to(limit).map_err(mlua::Error::external)?;
                    if data.is_empty() && limit != Some(0) {
                        return Ok(Value::Nil);
                    }
                    Ok(Value::String(lua.create_string(&data)?))
                })?,
            )?;

            api.set(
                "write",
                scope.create_function_mut(move |_, values: Variadic<Value>| {
                    for value in values {
                        let written = match value {
                            Value::String(s) => response_body.write_all(&s.as_bytes()),
                            Value::Integer(i) => write!(response_body, "{i}"),
                            Value::Number(n) => write!(response_body, "{n}"),
                            other => {
                                return Err(mlua::Error::RuntimeError(format!(
                                    "bad argument to 'write' (string expected, got {})",
                                    other.type_name()
                                )))
                            }
                        };
                        written.map_err(mlua::Error::external)?;
                    }
                    Ok(())
                })?,
            )?;

            api.set(
                "status",
                scope.create_function_mut(move |_, code: Option<u16>| {
                    if let Some(code) = code {
                        *status = code;
                    }
                    Ok(*status)
                })?,
            )?;

            api.set(
                "set_header",
                scope.create_function_mut(
                    move |_, (name, value): (mlua::String, Option<mlua::String>)| {
                        let name = name.as_bytes();
                        match value {
                            Some(value) => {
                                response_headers
                                    .set(&*name, Bytes::copy_from_slice(&value.as_bytes()))
                                    .map_err(mlua::Error::external)?;
                            }
                            None => {
                                response_headers.remove(&*name);
                            }
                        }
                        Ok(())
                    },
                )?,
            )?;

            api.set(
                "redirect",
                scope.create_function_mut(move |_, (target, args): (String, Option<String>)| {
                    if target.is_empty() {
                        return Err(mlua::Error::RuntimeError(
                            "redirect target must not be empty".to_string(),
                        ));
                    }
                    *redirect = Some(Redirect::new(target, args));
                    Ok(())
                })?,
            )?;

            lua.globals().set("lws", api)?;

            for chunk in &chunks {
                let rc = result_code(chunk.call::<Value>(())?);
                if rc != RC_OK {
                    return Ok(rc);
                }
            }
            Ok(RC_OK)
        });

        self.lua.globals().set("lws", Value::Nil)?;
        Ok(outcome?)
    }
}

impl ScriptEngine for LuaEngine {
    fn run(&mut self, ctx: &mut RequestContext) -> i32 {
        match self.run_chunks(ctx) {
            Ok(rc) => rc,
            Err(err) => {
                error!(script = %ctx.main, error = %err, "script execution failed");
                RC_SCRIPT_ERROR
            }
        }
    }

    fn memory_used(&self) -> usize {
        self.lua.used_memory()
    }

    fn collect_step(&mut self) {
        if let Err(err) = self.lua.gc_step() {
            warn!(error = %err, "lua collection step failed");
        }
    }
}

/// Maps a chunk's return value to a result code; non-numbers mean success.
fn result_code(value: Value) -> i32 {
    match value {
        Value::Integer(i) => i32::try_from(i).unwrap_or(RC_SCRIPT_ERROR),
        Value::Number(n) if n.is_finite() => n as i32,
        _ => RC_OK,
    }
}
