use playground_common::{HttpRequestData, OneOrMany};
use rquickjs::{Ctx, Object, Value};

fn one_or_many_to_js<'js>(ctx: &Ctx<'js>, value: &OneOrMany) -> rquickjs::Result<Value<'js>> {
    match value {
        OneOrMany::One(s) => rquickjs::String::from_str(ctx.clone(), s).map(|v| v.into_value()),
        OneOrMany::Many(values) => {
            let arr = rquickjs::Array::new(ctx.clone())?;
            for (idx, v) in values.iter().enumerate() {
                arr.set(idx, v.as_str())?;
            }
            Ok(arr.into_value())
        }
    }
}

fn map_to_object<'js>(
    ctx: &Ctx<'js>,
    map: &std::collections::HashMap<String, OneOrMany>,
) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;
    for (key, value) in map {
        object.set(key.as_str(), one_or_many_to_js(ctx, value)?)?;
    }
    Ok(object)
}

/// Build the script-visible `req` object for a matched request.
pub fn build<'js>(
    ctx: &Ctx<'js>,
    req: &HttpRequestData,
    params: &[(String, String)],
) -> rquickjs::Result<Object<'js>> {
    let object = Object::new(ctx.clone())?;

    object.set("method", req.method.to_ascii_lowercase())?;
    object.set("url", req.url.as_str())?;
    object.set("path", req.path.as_str())?;
    object.set("protocol", req.protocol)?;
    object.set("hostname", req.hostname.as_str())?;
    object.set("baseUrl", "")?;
    object.set("ip", req.remote_addr.as_str())?;

    object.set("query", map_to_object(ctx, &req.query)?)?;
    object.set("headers", map_to_object(ctx, &req.headers)?)?;

    let cookies = Object::new(ctx.clone())?;
    for (name, value) in &req.cookies {
        cookies.set(name.as_str(), value.as_str())?;
    }
    object.set("cookies", cookies)?;

    let params_object = Object::new(ctx.clone())?;
    for (name, value) in params {
        params_object.set(name.as_str(), value.as_str())?;
    }
    object.set("params", params_object)?;

    object.set("body", build_body(ctx, req)?)?;

    Ok(object)
}

fn build_body<'js>(ctx: &Ctx<'js>, req: &HttpRequestData) -> rquickjs::Result<Value<'js>> {
    if req.body.is_empty() {
        return Ok(rquickjs::String::from_str(ctx.clone(), "")?.into_value());
    }

    let is_json = req
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));

    let text = String::from_utf8_lossy(&req.body);

    if is_json {
        if let Some(parsed) = ctx.json_parse(text.as_ref()).ok() {
            return Ok(parsed);
        }
    }

    Ok(rquickjs::String::from_str(ctx.clone(), &text)?.into_value())
}
