use std::cell::RefCell;
use std::rc::Rc;

use playground_common::{status, HttpResponseOutcome};
use rquickjs::{Ctx, Function, Object, TypedArray, Value};

/// `res.send`/`res.end` treat a `Uint8Array` argument as raw bytes
/// (`application/octet-stream`); everything else that isn't a string falls
/// through to JSON serialisation.
fn as_byte_array(value: &Value<'_>) -> Option<Vec<u8>> {
    TypedArray::<u8>::from_value(value.clone())
        .ok()
        .and_then(|array| array.as_bytes().map(|bytes| bytes.to_vec()))
}

/// The three states an express-style response object can be in. Once
/// `Ended`, every further write is a silent no-op — this is the "response
/// latch" invariant.
#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    headers_sent: bool,
    ended: bool,
}

impl ResponseState {
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn set_status(&mut self, code: u16) {
        if !self.headers_sent {
            self.status = Some(code);
        }
    }

    fn set_header(&mut self, name: String, value: String) {
        if !self.headers_sent {
            self.headers.push((name, value));
        }
    }

    fn end_with(&mut self, body: Vec<u8>) {
        if self.ended {
            return;
        }
        self.body = body;
        self.headers_sent = true;
        self.ended = true;
    }

    pub fn into_outcome(self) -> HttpResponseOutcome {
        if !self.ended {
            // Handler returned without terminating the response.
            return HttpResponseOutcome::default_ok();
        }
        HttpResponseOutcome {
            status: self.status.unwrap_or(status::OK),
            headers: self.headers,
            body: self.body,
            matched_route: None,
        }
    }
}

fn cookie_header(name: &str, value: &str, options: Option<Object<'_>>) -> rquickjs::Result<String> {
    let mut header = format!("{name}={value}");

    let Some(options) = options else {
        return Ok(header);
    };

    if let Ok(path) = options.get::<_, String>("path") {
        header.push_str(&format!("; Path={path}"));
    }
    if let Ok(domain) = options.get::<_, String>("domain") {
        header.push_str(&format!("; Domain={domain}"));
    }
    if let Ok(max_age_ms) = options.get::<_, i64>("maxAge") {
        header.push_str(&format!("; Max-Age={}", max_age_ms / 1000));
    }
    if options.get::<_, bool>("secure").unwrap_or(false) {
        header.push_str("; Secure");
    }
    if options.get::<_, bool>("httpOnly").unwrap_or(false) {
        header.push_str("; HttpOnly");
    }
    if let Ok(same_site) = options.get::<_, String>("sameSite") {
        header.push_str(&format!("; SameSite={same_site}"));
    }

    Ok(header)
}

/// Build the script-visible `res` object, backed by a shared `state`.
pub fn build<'js>(ctx: &Ctx<'js>, state: Rc<RefCell<ResponseState>>) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;

    {
        let state = state.clone();
        let this = object.clone();
        let status_fn = Function::new(ctx.clone(), move |code: u16| {
            state.borrow_mut().set_status(code);
            this.clone()
        })?;
        object.set("status", status_fn)?;
    }

    {
        let state = state.clone();
        let this = object.clone();
        let set_fn = Function::new(ctx.clone(), move |name: String, value: String| {
            state.borrow_mut().set_header(name, value);
            this.clone()
        })?;
        object.set("set", set_fn)?;
    }

    {
        let state = state.clone();
        let this = object.clone();
        let cookie_fn = Function::new(
            ctx.clone(),
            move |name: String, value: String, options: Option<Object>| -> rquickjs::Result<Object> {
                let header = cookie_header(&name, &value, options)?;
                state.borrow_mut().set_header("Set-Cookie".to_string(), header);
                Ok(this.clone())
            },
        )?;
        object.set("cookie", cookie_fn)?;
    }

    {
        let state = state.clone();
        let json_fn = Function::new(ctx.clone(), move |ctx: Ctx<'js>, value: Value<'js>| -> rquickjs::Result<()> {
            let text = ctx
                .json_stringify(value)?
                .map(|s| s.to_string())
                .transpose()?
                .unwrap_or_else(|| "null".to_string());
            let mut state = state.borrow_mut();
            state.set_header("Content-Type".to_string(), "application/json".to_string());
            state.end_with(text.into_bytes());
            Ok(())
        })?;
        object.set("json", json_fn)?;
    }

    {
        let state = state.clone();
        let send_fn = Function::new(ctx.clone(), move |ctx: Ctx<'js>, value: Value<'js>| -> rquickjs::Result<()> {
            if let Some(text) = value.as_string() {
                let mut state_mut = state.borrow_mut();
                state_mut.set_header(
                    "Content-Type".to_string(),
                    "text/html; charset=utf-8".to_string(),
                );
                state_mut.end_with(text.to_string()?.into_bytes());
            } else if let Some(bytes) = as_byte_array(&value) {
                let mut state_mut = state.borrow_mut();
                state_mut.set_header(
                    "Content-Type".to_string(),
                    "application/octet-stream".to_string(),
                );
                state_mut.end_with(bytes);
            } else {
                let text = ctx
                    .json_stringify(value)?
                    .map(|s| s.to_string())
                    .transpose()?
                    .unwrap_or_else(|| "null".to_string());
                let mut state_mut = state.borrow_mut();
                state_mut.set_header("Content-Type".to_string(), "application/json".to_string());
                state_mut.end_with(text.into_bytes());
            }
            Ok(())
        })?;
        object.set("send", send_fn)?;
    }

    {
        let state = state.clone();
        let redirect_fn = Function::new(ctx.clone(), move |args: rquickjs::function::Rest<Value>| {
            let mut state = state.borrow_mut();
            let (code, location) = match args.0.as_slice() {
                [code, location] => (
                    code.as_int().unwrap_or(status::FOUND as i32) as u16,
                    location.as_string().and_then(|s| s.to_string().ok()).unwrap_or_default(),
                ),
                [location] => (
                    status::FOUND,
                    location.as_string().and_then(|s| s.to_string().ok()).unwrap_or_default(),
                ),
                _ => (status::FOUND, String::new()),
            };
            state.set_status(code);
            state.set_header("Location".to_string(), location);
            state.end_with(Vec::new());
        })?;
        object.set("redirect", redirect_fn)?;
    }

    {
        let state = state.clone();
        let end_fn = Function::new(ctx.clone(), move |ctx: Ctx<'js>, value: Option<Value<'js>>| -> rquickjs::Result<()> {
            match value {
                Some(value) if !value.is_undefined() => {
                    if let Some(text) = value.as_string() {
                        let mut state_mut = state.borrow_mut();
                        state_mut.set_header(
                            "Content-Type".to_string(),
                            "text/html; charset=utf-8".to_string(),
                        );
                        state_mut.end_with(text.to_string()?.into_bytes());
                    } else if let Some(bytes) = as_byte_array(&value) {
                        let mut state_mut = state.borrow_mut();
                        state_mut.set_header(
                            "Content-Type".to_string(),
                            "application/octet-stream".to_string(),
                        );
                        state_mut.end_with(bytes);
                    } else {
                        let text = ctx
                            .json_stringify(value)?
                            .map(|s| s.to_string())
                            .transpose()?
                            .unwrap_or_else(|| "null".to_string());
                        let mut state_mut = state.borrow_mut();
                        state_mut.set_header("Content-Type".to_string(), "application/json".to_string());
                        state_mut.end_with(text.into_bytes());
                    }
                }
                _ => {
                    state.borrow_mut().end_with(Vec::new());
                }
            }
            Ok(())
        })?;
        object.set("end", end_fn)?;
    }

    Ok(object)
}
