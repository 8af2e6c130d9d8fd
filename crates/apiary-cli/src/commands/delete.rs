//! Delete command - remove a plan's objects in reverse apply order

use apiary_kube::Command;
use std::path::Path;

use super::Selection;
use super::apply::{Target, run_pipeline};
use crate::error::Result;

/// Run the delete command
pub async fn run(config: Option<&Path>, selection: &Selection, target: &Target) -> Result<()> {
    run_pipeline(config, selection, target, Command::Delete).await
}
