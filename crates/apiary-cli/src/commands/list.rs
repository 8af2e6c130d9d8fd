//! List command - list the alveoli found in the bundles

use apiary_core::ManifestSource;
use console::style;

use crate::context::Context;
use crate::error::Result;

/// Run the list command
pub fn run(ctx: &Context) -> Result<()> {
    let ids = ctx.source.list()?;
    if ids.is_empty() {
        println!("No alveolus found");
        return Ok(());
    }

    println!(
        "{:<40} {:<12} {:<12} {}",
        style("NAME").bold(),
        style("VERSION").bold(),
        style("DESCRIPTORS").bold(),
        style("DEPENDENCIES").bold()
    );

    for id in ids {
        let alveolus = ctx.source.load(&id.name, id.version.as_deref())?;
        let dependencies: Vec<&str> = alveolus.dependencies.iter().map(|d| d.name.as_str()).collect();
        println!(
            "{:<40} {:<12} {:<12} {}",
            alveolus.name,
            id.version.as_deref().unwrap_or("-"),
            alveolus.descriptors.len(),
            if dependencies.is_empty() {
                "-".to_string()
            } else {
                dependencies.join(", ")
            }
        );
    }

    Ok(())
}
