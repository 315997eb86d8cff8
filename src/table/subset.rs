//! Parent/child bookkeeping and the data subset
//!
//! A fit concerns one parent node and its immediate children.  Each data or
//! avgint row maps to the child whose subtree contains the row's node, or
//! to the parent itself (encoded by the sentinel index `n_child`).  Rows
//! outside the parent's subtree, and rows whose covariates stray beyond
//! their `max_difference`, are excluded from the subset.

use super::loader::DbInput;
use super::types::{DataSubsetRow, NodeRow};
use crate::error::{Error, Result};

/// Mapping from node ids to child indices for one parent node.
#[derive(Debug, Clone)]
pub struct ChildInfo {
    parent_node_id: usize,
    /// Node id of each child, in node-id order.
    child_node_ids: Vec<usize>,
    /// For every node: the child index whose subtree contains it,
    /// `n_child` for the parent itself, `n_child + 1` for unrelated nodes.
    node2child: Vec<usize>,
}

impl ChildInfo {
    pub fn new(parent_node_id: usize, node_table: &[NodeRow]) -> ChildInfo {
        let child_node_ids: Vec<usize> = node_table
            .iter()
            .filter(|n| n.parent == Some(parent_node_id))
            .map(|n| n.node_id)
            .collect();
        let n_child = child_node_ids.len();

        let mut node2child = vec![n_child + 1; node_table.len()];
        for (node_id, _) in node_table.iter().enumerate() {
            // walk up the parent chain
            let mut ancestor = Some(node_id);
            while let Some(a) = ancestor {
                if a == parent_node_id {
                    node2child[node_id] = n_child;
                    break;
                }
                if let Some(c) = child_node_ids.iter().position(|&id| id == a) {
                    node2child[node_id] = c;
                    break;
                }
                ancestor = node_table[a].parent;
            }
        }
        ChildInfo {
            parent_node_id,
            child_node_ids,
            node2child,
        }
    }

    pub fn n_child(&self) -> usize {
        self.child_node_ids.len()
    }

    pub fn parent_node_id(&self) -> usize {
        self.parent_node_id
    }

    pub fn child_node_id(&self, child: usize) -> usize {
        self.child_node_ids[child]
    }

    /// Child index for a node: `Some(c)` with `c < n_child` for a child
    /// subtree, `Some(n_child)` for the parent, `None` when unrelated.
    pub fn node_to_child(&self, node_id: usize) -> Option<usize> {
        let c = self.node2child[node_id];
        if c <= self.n_child() {
            Some(c)
        } else {
            None
        }
    }
}

/// One data row admitted to the fit, with covariates stored as reference
/// offsets.
#[derive(Debug, Clone)]
pub struct SubsetDataPoint {
    pub original_id: usize,
    pub integrand_id: usize,
    pub density_id: usize,
    pub node_id: usize,
    pub subgroup_id: usize,
    pub weight_id: Option<usize>,
    pub hold_out: bool,
    pub meas_value: f64,
    pub meas_std: f64,
    pub eta: Option<f64>,
    pub nu: Option<f64>,
    pub sample_size: Option<u64>,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    /// Child index, `n_child` for the parent node.
    pub child: usize,
    /// Covariate offsets from reference.
    pub x: Vec<f64>,
    /// Simulated measurement substituted by `replace_like`, when fitting
    /// simulated data.
    pub data_sim_value: Option<f64>,
}

/// Select the data rows that enter the fit.
pub fn subset_data(input: &DbInput, child_info: &ChildInfo) -> Result<Vec<SubsetDataPoint>> {
    let mut subset = Vec::new();
    for row in &input.data {
        let child = match child_info.node_to_child(row.node_id) {
            Some(c) => c,
            None => continue,
        };
        let x = input.data_covariates(row.data_id);
        let mut out_of_range = false;
        for (j, cov) in input.covariate.iter().enumerate() {
            if let Some(max_diff) = cov.max_difference {
                if x[j].abs() > max_diff {
                    out_of_range = true;
                    break;
                }
            }
        }
        if out_of_range {
            continue;
        }
        if row.density_id >= input.density.len() {
            return Err(Error::table("data", row.data_id, "invalid density_id"));
        }
        subset.push(SubsetDataPoint {
            original_id: row.data_id,
            integrand_id: row.integrand_id,
            density_id: row.density_id,
            node_id: row.node_id,
            subgroup_id: row.subgroup_id,
            weight_id: row.weight_id,
            hold_out: row.hold_out != 0,
            meas_value: row.meas_value,
            meas_std: row.meas_std,
            eta: row.eta,
            nu: row.nu,
            sample_size: row.sample_size,
            age_lower: row.age_lower,
            age_upper: row.age_upper,
            time_lower: row.time_lower,
            time_upper: row.time_upper,
            child,
            x,
            data_sim_value: None,
        });
    }
    Ok(subset)
}

/// Rows for the `data_subset` table, in subset order.
pub fn data_subset_rows(subset: &[SubsetDataPoint]) -> Vec<DataSubsetRow> {
    subset
        .iter()
        .enumerate()
        .map(|(id, point)| DataSubsetRow {
            data_subset_id: id,
            data_id: point.original_id,
            hold_out: point.hold_out as u8,
            density_id: point.density_id,
            eta: point.eta,
            nu: point.nu,
            sample_size: point.sample_size,
        })
        .collect()
}

/// One avgint row admitted to prediction (same node and covariate rules
/// as data).
#[derive(Debug, Clone)]
pub struct SubsetAvgintPoint {
    pub original_id: usize,
    pub integrand_id: usize,
    pub subgroup_id: usize,
    pub weight_id: Option<usize>,
    pub age_lower: f64,
    pub age_upper: f64,
    pub time_lower: f64,
    pub time_upper: f64,
    pub child: usize,
    pub x: Vec<f64>,
}

/// Select the avgint rows inside the parent subtree whose covariates are
/// within range.
pub fn subset_avgint(input: &DbInput, child_info: &ChildInfo) -> Vec<SubsetAvgintPoint> {
    let mut subset = Vec::new();
    for row in &input.avgint {
        let child = match child_info.node_to_child(row.node_id) {
            Some(c) => c,
            None => continue,
        };
        let x = input.avgint_covariates(row.avgint_id);
        let out_of_range = input.covariate.iter().enumerate().any(|(j, cov)| {
            cov.max_difference
                .map_or(false, |max_diff| x[j].abs() > max_diff)
        });
        if out_of_range {
            continue;
        }
        subset.push(SubsetAvgintPoint {
            original_id: row.avgint_id,
            integrand_id: row.integrand_id,
            subgroup_id: row.subgroup_id,
            weight_id: row.weight_id,
            age_lower: row.age_lower,
            age_upper: row.age_upper,
            time_lower: row.time_lower,
            time_upper: row.time_upper,
            child,
            x,
        });
    }
    subset
}
