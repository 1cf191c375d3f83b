use devstack_core::{Engine, Result};

pub async fn start(engine: &mut Engine, module: &str, service: Option<&str>) -> Result<()> {
    match service {
        Some(service) => engine.start_service(module, service).await?,
        None => engine.start_module(module).await?,
    }
    println!("✓ started {}", target(module, service));
    Ok(())
}

pub async fn stop(engine: &Engine, module: &str, service: Option<&str>) -> Result<()> {
    match service {
        Some(service) => engine.stop_service(module, service).await?,
        None => engine.stop_module(module).await?,
    }
    println!("✓ stopped {}", target(module, service));
    Ok(())
}

pub async fn restart(engine: &Engine, module: &str, service: &str) -> Result<()> {
    engine.restart_service(module, service).await?;
    println!("✓ restarted {module}:{service}");
    Ok(())
}

fn target(module: &str, service: Option<&str>) -> String {
    match service {
        Some(service) => format!("{module}:{service}"),
        None => module.to_string(),
    }
}
