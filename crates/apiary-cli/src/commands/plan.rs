//! Plan command - resolve and print the apply order without touching a cluster

use serde_json::json;

use super::Selection;
use crate::context::Context;
use crate::display;
use crate::error::{CliError, Result};

/// Run the plan command
pub fn run(ctx: &Context, selection: &Selection, output_json: bool) -> Result<()> {
    let plan = selection.request(ctx)?.resolve(ctx.source.as_ref())?;

    if output_json {
        let entries: Vec<_> = plan
            .entries
            .iter()
            .map(|entry| {
                json!({
                    "alveolus": entry.alveolus.to_string(),
                    "descriptor": entry.descriptor.name,
                    "root": entry.root.to_string(),
                    "placeholders": entry.placeholders,
                    "skip": entry.descriptor.skip,
                    "patches": entry.patches.len(),
                })
            })
            .collect();
        let document = json!({ "entries": entries, "warnings": plan.warnings });
        let rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| CliError::internal(e.to_string()))?;
        println!("{}", rendered);
        return Ok(());
    }

    display::print_plan(&plan);
    Ok(())
}
