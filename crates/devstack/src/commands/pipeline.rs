use devstack_core::{Engine, Result};

pub async fn run(engine: &mut Engine, module: &str, pipeline: &str) -> Result<()> {
    engine.run_pipeline(module, pipeline).await?;
    println!("✓ {module}:{pipeline}");
    Ok(())
}

pub async fn task(engine: &mut Engine, module: &str, task: &str) -> Result<()> {
    if let Some(value) = engine.run_task(module, task).await? {
        println!("{}", render(&value));
    }
    Ok(())
}

pub async fn migrate(engine: &mut Engine, module: &str, list: bool) -> Result<()> {
    if list {
        for id in engine.not_applied_migrations(module)? {
            println!("{id}");
        }
        return Ok(());
    }

    let applied = engine.run_migrations(module).await?;
    println!("Applied {} migrations", applied.len());
    Ok(())
}

pub fn state(engine: &Engine, module: &str) -> Result<()> {
    let state = engine.state(module)?;
    let json = serde_json::to_string_pretty(&state).map_err(std::io::Error::from)?;
    println!("{json}");
    Ok(())
}

pub fn reset(engine: &mut Engine, module: &str) -> Result<()> {
    engine.reset(module)?;
    println!("State of {module} cleared");
    Ok(())
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
