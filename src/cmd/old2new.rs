//! The old2new command: bring an older database layout up to date
//!
//! Older databases predate the subgroup table.  This creates the default
//! single-group subgroup table and the empty node_cov table when they are
//! missing, so the other commands can assume the current layout.

use log::info;

use crate::error::Result;
use crate::table::types::{NodeCovRow, SubgroupRow};
use crate::table::Database;

pub fn run(db: &Database) -> Result<()> {
    if !db.table_exists("subgroup") {
        let rows = vec![SubgroupRow {
            subgroup_id: 0,
            subgroup_name: "world".to_string(),
            group_id: 0,
            group_name: "world".to_string(),
        }];
        db.write_table("subgroup", &rows)?;
        info!("old2new: created the default subgroup table");
    }
    if !db.table_exists("node_cov") {
        let rows: Vec<NodeCovRow> = Vec::new();
        db.write_table("node_cov", &rows)?;
        info!("old2new: created the empty node_cov table");
    }
    Ok(())
}
