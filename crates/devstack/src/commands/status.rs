use comfy_table::{Cell, Color, Table};
use devstack_core::{Engine, Hook, Result, ServiceStatus, ServiceStatusRow};

pub async fn run(engine: &Engine, module: Option<&str>, json: bool) -> Result<()> {
    let modules: Vec<String> = match module {
        Some(name) => vec![engine.graph().module(name)?.name.clone()],
        None => engine.graph().modules().map(|m| m.name.clone()).collect(),
    };
    for module in &modules {
        engine.run_hook(module, Hook::BeforeStatus).await?;
    }

    let rows = engine.status(module).await?;
    if json {
        let json = serde_json::to_string_pretty(&rows).map_err(std::io::Error::from)?;
        println!("{json}");
    } else {
        println!("{}", table(&rows));
    }
    Ok(())
}

fn table(rows: &[ServiceStatusRow]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["MODULE", "SERVICE", "STATUS"]);

    for row in rows {
        let color = match row.status {
            ServiceStatus::Running => Color::Green,
            ServiceStatus::Starting | ServiceStatus::Stopping => Color::Yellow,
            ServiceStatus::NotRunning => Color::DarkGrey,
            ServiceStatus::Unknown => Color::Red,
        };
        table.add_row(vec![
            Cell::new(&row.module),
            Cell::new(&row.service),
            Cell::new(row.status.to_string()).fg(color),
        ]);
    }

    table
}
