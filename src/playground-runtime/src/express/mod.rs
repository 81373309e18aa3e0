//! The Express-compatible routing facade: `app.get/post/put/delete/patch/use`,
//! the legacy `registerHandler`/`registerFile` aliases, the `HttpStatus`
//! constant bag, and the registries they mutate.

mod request;
mod response;

use std::cell::RefCell;
use std::rc::Rc;

use playground_common::{status, HttpRequestData, HttpResponseOutcome, JobError};
use rquickjs::{Ctx, Function, Object, Persistent};

pub use response::ResponseState;

/// One segment of a parsed path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// A literal segment, matched case-sensitively.
    Literal(String),
    /// A `:name` segment, captured under `name`.
    Param(String),
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(segment.to_string()),
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

/// Match `path` against `segments`, returning the captured parameters on
/// success. All segments must match and the segment counts must be equal.
fn match_pattern(segments: &[Segment], path: &str) -> Option<Vec<(String, String)>> {
    let parts = split_path(path);
    if parts.len() != segments.len() {
        return None;
    }

    let mut params = Vec::new();
    for (segment, part) in segments.iter().zip(parts.iter()) {
        match segment {
            Segment::Literal(literal) => {
                if literal != part {
                    return None;
                }
            }
            Segment::Param(name) => params.push((name.clone(), (*part).to_string())),
        }
    }
    Some(params)
}

/// Whether a pattern is made entirely of literal segments — used to give
/// exact-literal patterns precedence over parameterised ones of the same
/// segment count.
fn is_exact(segments: &[Segment]) -> bool {
    segments.iter().all(|s| matches!(s, Segment::Literal(_)))
}

struct HandlerEntryInner {
    method: String,
    raw_pattern: String,
    segments: Vec<Segment>,
    callable: Persistent<Function<'static>>,
}

/// A registered `(method, path pattern)` -> handler binding.
pub struct HandlerEntry {
    inner: HandlerEntryInner,
}

struct FileEntryInner {
    path: String,
    callable: Persistent<Function<'static>>,
}

/// A registered legacy static-file handler, keyed by an exact path.
struct FileEntry {
    inner: FileEntryInner,
}

/// The route registries the dispatcher consults on every request.
///
/// Registration order is preserved; re-registering the same
/// `(method, pattern)` replaces the existing entry in place so that route
/// resolution stays deterministic.
#[derive(Default)]
pub struct Registries {
    handlers: RefCell<Vec<HandlerEntry>>,
    files: RefCell<Vec<FileEntry>>,
}

impl Registries {
    fn register_handler(&self, method: &str, pattern: &str, callable: Persistent<Function<'static>>) {
        let method = method.to_ascii_uppercase();
        let segments = parse_pattern(pattern);
        let mut handlers = self.handlers.borrow_mut();

        if let Some(existing) = handlers
            .iter_mut()
            .find(|entry| entry.inner.method == method && entry.inner.raw_pattern == pattern)
        {
            existing.inner.callable = callable;
            return;
        }

        handlers.push(HandlerEntry {
            inner: HandlerEntryInner {
                method,
                raw_pattern: pattern.to_string(),
                segments,
                callable,
            },
        });
    }

    fn register_file(&self, path: &str, callable: Persistent<Function<'static>>) {
        let mut files = self.files.borrow_mut();
        if let Some(existing) = files.iter_mut().find(|entry| entry.inner.path == path) {
            existing.inner.callable = callable;
            return;
        }
        files.push(FileEntry {
            inner: FileEntryInner {
                path: path.to_string(),
                callable,
            },
        });
    }

    /// Find the best matching handler for `(method, path)`, preferring
    /// exact-literal patterns over parameterised ones of equal segment
    /// count, and otherwise taking the first match in registration order.
    ///
    /// Returns the matched handler's own `(method, pattern)` alongside it,
    /// for the request logger's handler-name field.
    fn resolve(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(Persistent<Function<'static>>, Vec<(String, String)>, String)> {
        let handlers = self.handlers.borrow();

        let mut exact_match = None;
        let mut first_match = None;

        for entry in handlers.iter().filter(|entry| entry.inner.method == method) {
            if let Some(params) = match_pattern(&entry.inner.segments, path) {
                let route = format!("{} {}", entry.inner.method, entry.inner.raw_pattern);
                if is_exact(&entry.inner.segments) && exact_match.is_none() {
                    exact_match = Some((entry.inner.callable.clone(), params, route));
                    continue;
                }
                if first_match.is_none() {
                    first_match = Some((entry.inner.callable.clone(), params, route));
                }
            }
        }

        exact_match.or(first_match)
    }

    fn resolve_file(&self, path: &str) -> Option<Persistent<Function<'static>>> {
        self.files
            .borrow()
            .iter()
            .find(|entry| entry.inner.path == path)
            .map(|entry| entry.inner.callable.clone())
    }
}

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];

/// Install `app`, `registerHandler`, `registerFile`, and `HttpStatus` into
/// the global scope, all backed by `registries`.
pub fn setup(ctx: &Ctx<'_>, registries: Rc<Registries>) -> rquickjs::Result<()> {
    let app = Object::new(ctx.clone())?;

    for method in METHODS {
        let registries = registries.clone();
        let method_name = method.to_ascii_lowercase();
        let func = Function::new(ctx.clone(), move |path: String, handler: Function| {
            registries.register_handler(method, &path, Persistent::save(&handler.ctx().clone(), handler));
            Ok::<(), rquickjs::Error>(())
        })?;
        app.set(method_name, func)?;
    }

    {
        let registries = registries.clone();
        let use_func = Function::new(ctx.clone(), move |path: String, handler: Function| {
            let persisted = Persistent::save(&handler.ctx().clone(), handler);
            for method in METHODS {
                registries.register_handler(method, &path, persisted.clone());
            }
            Ok::<(), rquickjs::Error>(())
        })?;
        app.set("use", use_func)?;
    }

    ctx.globals().set("app", app)?;

    {
        let registries = registries.clone();
        let register_handler = Function::new(
            ctx.clone(),
            move |method: String, path: String, handler: Function| {
                registries.register_handler(
                    &method.to_ascii_uppercase(),
                    &path,
                    Persistent::save(&handler.ctx().clone(), handler),
                );
                Ok::<(), rquickjs::Error>(())
            },
        )?;
        ctx.globals().set("registerHandler", register_handler)?;
    }

    {
        let registries = registries.clone();
        let register_file = Function::new(ctx.clone(), move |path: String, handler: Function| {
            registries.register_file(&path, Persistent::save(&handler.ctx().clone(), handler));
            Ok::<(), rquickjs::Error>(())
        })?;
        ctx.globals().set("registerFile", register_file)?;
    }

    let http_status = Object::new(ctx.clone())?;
    http_status.set("OK", status::OK)?;
    http_status.set("CREATED", status::CREATED)?;
    http_status.set("NO_CONTENT", status::NO_CONTENT)?;
    http_status.set("FOUND", status::FOUND)?;
    http_status.set("BAD_REQUEST", status::BAD_REQUEST)?;
    http_status.set("UNAUTHORIZED", status::UNAUTHORIZED)?;
    http_status.set("FORBIDDEN", status::FORBIDDEN)?;
    http_status.set("NOT_FOUND", status::NOT_FOUND)?;
    http_status.set("CONFLICT", status::CONFLICT)?;
    http_status.set("INTERNAL_SERVER_ERROR", status::INTERNAL_SERVER_ERROR)?;
    http_status.set("SERVICE_UNAVAILABLE", status::SERVICE_UNAVAILABLE)?;
    http_status.set("GATEWAY_TIMEOUT", status::GATEWAY_TIMEOUT)?;
    ctx.globals().set("HttpStatus", http_status)?;

    Ok(())
}

/// Resolve and invoke the handler (or legacy file handler) matching `req`.
pub fn route(
    ctx: &Ctx<'_>,
    registries: &Registries,
    req: HttpRequestData,
) -> Result<HttpResponseOutcome, JobError> {
    let method = req.method.clone();
    let path = req.path.clone();

    let matched = registries
        .resolve(&method, &path)
        .map(|(callable, params, route)| (callable, params, Some(route)))
        .or_else(|| {
            if method == "GET" {
                registries
                    .resolve_file(&path)
                    .map(|callable| (callable, Vec::new(), None))
            } else {
                None
            }
        });

    let Some((callable, params, route)) = matched else {
        return Err(JobError::NotFound { method, path });
    };

    let req_object = request::build(ctx, &req, &params).map_err(|err| script_error(ctx, err))?;
    let state = Rc::new(RefCell::new(response::ResponseState::default()));
    let res_object = response::build(ctx, state.clone()).map_err(|err| script_error(ctx, err))?;

    let func = callable.clone().restore(ctx).map_err(|err| script_error(ctx, err))?;

    let call_result: rquickjs::Result<rquickjs::Value> = func.call((req_object, res_object));

    match call_result {
        Ok(_) => {
            let mut outcome = state.borrow().clone().into_outcome();
            outcome.matched_route = route;
            Ok(outcome)
        }
        Err(err) => {
            let state = state.borrow();
            if state.is_ended() {
                // The handler already wrote a response before throwing;
                // honour what it wrote and only log the throw.
                tracing::warn!(error = %err, "handler threw after ending the response");
                let mut outcome = state.clone().into_outcome();
                outcome.matched_route = route;
                Ok(outcome)
            } else {
                Err(script_error(ctx, err))
            }
        }
    }
}

fn script_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> JobError {
    let message = match ctx.catch().into_string() {
        Some(s) => s.to_string().unwrap_or_else(|_| err.to_string()),
        None => err.to_string(),
    };
    JobError::Script { message, stack: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_exact_path() {
        let segments = parse_pattern("/users/active");
        assert_eq!(match_pattern(&segments, "/users/active"), Some(Vec::new()));
        assert_eq!(match_pattern(&segments, "/users/inactive"), None);
    }

    #[test]
    fn param_pattern_captures_segment() {
        let segments = parse_pattern("/users/:id");
        assert_eq!(
            match_pattern(&segments, "/users/42"),
            Some(vec![("id".to_string(), "42".to_string())])
        );
    }

    #[test]
    fn segment_count_mismatch_does_not_match() {
        let segments = parse_pattern("/users/:id");
        assert_eq!(match_pattern(&segments, "/users/42/posts"), None);
    }

    #[test]
    fn exact_pattern_detected() {
        assert!(is_exact(&parse_pattern("/a/b")));
        assert!(!is_exact(&parse_pattern("/a/:b")));
    }
}
