use rquickjs::Ctx;

mod console;

/// Install the non-routing, non-SQL globals: currently just `console`.
pub fn setup(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    console::setup(ctx)
}
