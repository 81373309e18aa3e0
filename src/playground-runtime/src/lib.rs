//! The embedded QuickJS runtime for the JavaScript playground server.
//!
//! This crate owns a single [`rquickjs`] interpreter and the binding surface
//! installed into its global scope: `console`, `app`, `db`, `globalState`,
//! and the legacy `registerHandler`/`registerFile` aliases. It does not know
//! about HTTP sockets or job queues — `playground-dispatcher` drives it one
//! job at a time, and `playground-server` talks to the dispatcher.

mod db;
mod express;
mod globals;

use std::path::Path;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context as _, Result};
use playground_common::{HttpRequestData, HttpResponseOutcome, JobError};
use rquickjs::{CatchResultExt, Context, Runtime};
use tracing::instrument;

pub use express::{HandlerEntry, Registries};

/// Owns the QuickJS runtime, context, and route registries for the
/// playground server.
///
/// `ScriptRuntime` is not internally synchronised: every method requires
/// `&mut self` and the type is only `Send` so it can be moved onto the
/// dispatcher's dedicated thread once at startup. It must never be called
/// from more than one thread, or concurrently with itself.
pub struct ScriptRuntime {
    context: Context,
    registries: Rc<Registries>,
    deadline: Arc<Mutex<Option<Instant>>>,
}

// SAFETY: `rquickjs::Context` holds a raw pointer and is therefore not
// `Send` by default. We move a `ScriptRuntime` exactly once, onto the
// dispatcher thread at construction time, and every subsequent access goes
// through `&mut self` on that same thread — see `playground-dispatcher`'s
// job loop, which never shares this value across threads.
unsafe impl Send for ScriptRuntime {}

impl ScriptRuntime {
    /// Build a new runtime backed by the SQLite file at `db_path`, with all
    /// sandbox bindings installed into the global scope.
    #[instrument(skip(db_path), level = "info")]
    pub fn new(db_path: &Path) -> Result<Self> {
        let runtime = Runtime::new().context("initializing QuickJS runtime")?;
        let context = Context::full(&runtime).context("creating QuickJS context")?;

        let registries = Rc::new(Registries::default());
        let deadline: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        // QuickJS polls this callback periodically while executing
        // bytecode. It is the in-process substitute for the host-initiated
        // "kill" a VM-backed runtime would use: there is no separate guest
        // VM here, so cooperative cancellation goes through the
        // interpreter's own interrupt-check points instead.
        {
            let deadline = deadline.clone();
            runtime.set_interrupt_handler(Some(Box::new(move || {
                deadline
                    .lock()
                    .expect("deadline mutex poisoned")
                    .is_some_and(|deadline| Instant::now() >= deadline)
            })));
        }

        context.with(|ctx| -> Result<()> {
            globals::setup(&ctx).catch(&ctx).context("installing console global")?;
            express::setup(&ctx, registries.clone())
                .catch(&ctx)
                .context("installing express bindings")?;
            db::setup(&ctx, db_path).context("installing db binding")?;
            ctx.globals()
                .set("globalState", rquickjs::Object::new(ctx.clone()).catch(&ctx)?)
                .catch(&ctx)?;
            Ok(())
        })?;

        Ok(ScriptRuntime {
            context,
            registries,
            deadline,
        })
    }

    /// Set (or clear, with `None`) the wall-clock deadline the interrupt
    /// handler enforces for the next bit of script execution. Called by the
    /// dispatcher immediately before and after running a job.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        *self.deadline.lock().expect("deadline mutex poisoned") = deadline;
    }

    /// Evaluate a source submission, returning the final statement's
    /// completion value serialised as JSON, if it produced one.
    ///
    /// The source is wrapped in a strict-mode top-level block so that
    /// `let`/`const`/`class`/function-declaration bindings from one
    /// submission never collide with the next (each submission's block
    /// gets its own fresh lexical environment, discarded once the block
    /// finishes); `var` declarations and bare global assignments still hoist
    /// past the block and remain visible to later submissions, alongside
    /// `globalState`. Unlike wrapping in a function, a block does not
    /// swallow the completion value: the wrapped block's completion is the
    /// completion of its last statement, exactly like an unwrapped script.
    #[instrument(skip(self, source), level = "debug")]
    pub fn eval_source(&mut self, source: &str) -> Result<Option<serde_json::Value>, JobError> {
        let wrapped = format!("'use strict';\n{{\n{source}\n}}");

        self.context.with(|ctx| {
            let value: rquickjs::Value = ctx
                .eval(wrapped)
                .catch(&ctx)
                .map_err(|err| script_error(&err.to_string()))?;

            if value.is_undefined() {
                return Ok(None);
            }

            let json = ctx
                .json_stringify(value)
                .catch(&ctx)
                .map_err(|err| script_error(&err.to_string()))?;

            match json {
                Some(text) => serde_json::from_str(&text.to_string().map_err(|err| script_error(&err.to_string()))?)
                    .map(Some)
                    .map_err(|err| script_error(&err.to_string())),
                None => Ok(None),
            }
        })
    }

    /// Resolve and invoke the handler (or legacy file) matching `req`,
    /// falling back to [`JobError::NotFound`] when nothing matches.
    ///
    /// This performs the full routing lookup described by the registries,
    /// inside the single-threaded runtime, so that route resolution is
    /// never racing a concurrent registry mutation.
    #[instrument(skip(self, req), fields(method = %req.method, path = %req.path), level = "debug")]
    pub fn route(&mut self, req: HttpRequestData) -> Result<HttpResponseOutcome, JobError> {
        let registries = self.registries.clone();
        self.context.with(|ctx| express::route(&ctx, &registries, req))
    }
}

fn script_error(message: &str) -> JobError {
    JobError::Script {
        message: message.to_string(),
        stack: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> ScriptRuntime {
        let dir = tempfile::tempdir().unwrap();
        ScriptRuntime::new(&dir.path().join("test.sqlite")).unwrap()
    }

    #[test]
    fn eval_source_returns_final_expression_value() {
        let mut rt = runtime();
        let result = rt.eval_source("1 + 41").unwrap();
        assert_eq!(result, Some(serde_json::json!(42)));
    }

    #[test]
    fn var_bindings_persist_across_evaluations() {
        let mut rt = runtime();
        rt.eval_source("var counter = 1;").unwrap();
        let result = rt.eval_source("counter += 1; counter").unwrap();
        assert_eq!(result, Some(serde_json::json!(2)));
    }

    #[test]
    fn global_state_persists_across_evaluations() {
        let mut rt = runtime();
        rt.eval_source("globalState.hits = 1;").unwrap();
        let result = rt.eval_source("globalState.hits").unwrap();
        assert_eq!(result, Some(serde_json::json!(1)));
    }

    #[test]
    fn script_throw_surfaces_as_script_error() {
        let mut rt = runtime();
        let err = rt.eval_source("throw new Error('boom')").unwrap_err();
        matches!(err, JobError::Script { .. });
    }
}
