use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};

fn render(ctx: &Ctx<'_>, args: &[Value<'_>]) -> String {
    args.iter()
        .map(|arg| {
            if let Some(s) = arg.as_string() {
                s.to_string().unwrap_or_default()
            } else {
                ctx.json_stringify(arg.clone())
                    .ok()
                    .flatten()
                    .and_then(|s| s.to_string().ok())
                    .unwrap_or_else(|| "undefined".to_string())
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

macro_rules! console_method {
    ($name:literal, $level:expr) => {
        |ctx: Ctx<'_>, args: Rest<Value>| {
            let message = render(&ctx, &args);
            tracing::event!($level, target: "playground_runtime::console", "{message}");
        }
    };
}

/// Install `console.log/info/warn/error/debug`, each routing through
/// `tracing` at a level matching the method name.
pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;

    console.set("log", Function::new(ctx.clone(), console_method!("log", tracing::Level::INFO))?)?;
    console.set("info", Function::new(ctx.clone(), console_method!("info", tracing::Level::INFO))?)?;
    console.set("warn", Function::new(ctx.clone(), console_method!("warn", tracing::Level::WARN))?)?;
    console.set("error", Function::new(ctx.clone(), console_method!("error", tracing::Level::ERROR))?)?;
    console.set("debug", Function::new(ctx.clone(), console_method!("debug", tracing::Level::DEBUG))?)?;

    ctx.globals().set("console", console)?;
    Ok(())
}
