//! The `db` binding: parameterised SQL access to a single SQLite file shared
//! by the whole process. Every call is bound positionally (`?`) — scripts
//! cannot build SQL by string substitution through this binding.

use std::cell::RefCell;
use std::path::Path;

use anyhow::{Context as _, Result};
use rquickjs::{Ctx, Function, Object, Value};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;

fn js_to_sql<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<SqlValue> {
    if value.is_null() || value.is_undefined() {
        return Ok(SqlValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(SqlValue::Integer(if b { 1 } else { 0 }));
    }
    if let Some(n) = value.as_int() {
        return Ok(SqlValue::Integer(n as i64));
    }
    if let Some(n) = value.as_float() {
        return Ok(SqlValue::Real(n));
    }
    if let Some(s) = value.as_string() {
        return Ok(SqlValue::Text(s.to_string()?));
    }
    // Objects and arrays are JSON-encoded text; there is no bytes/blob
    // representation reachable from script values in this binding.
    let text = ctx
        .json_stringify(value)?
        .map(|s| s.to_string())
        .transpose()?
        .unwrap_or_else(|| "null".to_string());
    Ok(SqlValue::Text(text))
}

fn sql_to_js<'js>(ctx: &Ctx<'js>, value: ValueRef<'_>) -> rquickjs::Result<Value<'js>> {
    match value {
        ValueRef::Null => Ok(Value::new_null(ctx.clone())),
        ValueRef::Integer(i) => Ok(Value::new_number(ctx.clone(), i as f64)),
        ValueRef::Real(f) => Ok(Value::new_number(ctx.clone(), f)),
        ValueRef::Text(text) => Ok(rquickjs::String::from_str(ctx.clone(), &String::from_utf8_lossy(text))?
            .into_value()),
        ValueRef::Blob(bytes) => {
            let array = rquickjs::Array::new(ctx.clone())?;
            for (idx, byte) in bytes.iter().enumerate() {
                array.set(idx, *byte)?;
            }
            Ok(array.into_value())
        }
    }
}

fn collect_params<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> rquickjs::Result<Vec<SqlValue>> {
    // Scripts may pass either variadic arguments or a single array of
    // parameters; both are flattened to the same positional parameter list.
    if let [single] = args {
        if let Some(array) = single.as_array() {
            let mut params = Vec::with_capacity(array.len());
            for item in array.iter::<Value>() {
                params.push(js_to_sql(ctx, item?)?);
            }
            return Ok(params);
        }
    }

    args.iter().map(|v| js_to_sql(ctx, v.clone())).collect()
}

/// Install the `db` global, backed by a single SQLite connection opened at
/// `path`. The connection is only ever touched from the dispatcher thread,
/// so no additional locking is required beyond the `RefCell`.
pub fn setup(ctx: &Ctx<'_>, path: &Path) -> Result<()> {
    let conn = Connection::open(path)
        .with_context(|| format!("opening sqlite database at {}", path.display()))?;
    let conn = std::rc::Rc::new(RefCell::new(conn));

    let db = Object::new(ctx.clone()).map_err(anyhow::Error::from)?;

    {
        let conn = conn.clone();
        let query_fn = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, sql: String, args: rquickjs::function::Rest<Value>| -> rquickjs::Result<rquickjs::Array> {
                let params = collect_params(&ctx, &args)?;
                let conn = conn.borrow();
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|err| rquickjs::Exception::throw_internal(&ctx, &err.to_string()))?;

                let column_names: Vec<String> =
                    stmt.column_names().iter().map(|s| s.to_string()).collect();

                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                        Ok((0..column_names.len())
                            .map(|i| row.get_ref_unwrap(i).to_owned())
                            .collect::<Vec<_>>())
                    })
                    .map_err(|err| rquickjs::Exception::throw_internal(&ctx, &err.to_string()))?;

                let result = rquickjs::Array::new(ctx.clone())?;
                for (idx, row) in rows.enumerate() {
                    let row = row.map_err(|err| rquickjs::Exception::throw_internal(&ctx, &err.to_string()))?;
                    let obj = Object::new(ctx.clone())?;
                    for (name, value) in column_names.iter().zip(row.iter()) {
                        obj.set(name.as_str(), sql_to_js(&ctx, value.as_ref())?)?;
                    }
                    result.set(idx, obj)?;
                }
                Ok(result)
            },
        )
        .map_err(anyhow::Error::from)?;
        db.set("query", query_fn).map_err(anyhow::Error::from)?;
    }

    {
        let conn = conn.clone();
        let exec_fn = Function::new(
            ctx.clone(),
            move |ctx: Ctx<'_>, sql: String, args: rquickjs::function::Rest<Value>| -> rquickjs::Result<Object> {
                let params = collect_params(&ctx, &args)?;
                let conn = conn.borrow();
                let result = Object::new(ctx.clone())?;

                match conn.execute(&sql, rusqlite::params_from_iter(params.iter())) {
                    Ok(rows_affected) => {
                        result.set("success", true)?;
                        result.set("rowsAffected", rows_affected as u32)?;
                        result.set("lastInsertId", conn.last_insert_rowid())?;
                    }
                    Err(err) => {
                        result.set("success", false)?;
                        result.set("error", err.to_string())?;
                        result.set("rowsAffected", 0u32)?;
                        result.set("lastInsertId", 0i64)?;
                    }
                }
                Ok(result)
            },
        )
        .map_err(anyhow::Error::from)?;
        db.set("exec", exec_fn).map_err(anyhow::Error::from)?;
    }

    ctx.globals().set("db", db).map_err(anyhow::Error::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_to_sql_coerces_primitives() {
        let runtime = rquickjs::Runtime::new().unwrap();
        let context = rquickjs::Context::full(&runtime).unwrap();
        context.with(|ctx| {
            assert_eq!(js_to_sql(&ctx, Value::new_bool(ctx.clone(), true)).unwrap(), SqlValue::Integer(1));
            assert_eq!(js_to_sql(&ctx, Value::new_null(ctx.clone())).unwrap(), SqlValue::Null);
        });
    }
}
