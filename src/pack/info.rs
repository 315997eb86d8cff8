//! Packed variable vector layout
//!
//! Maps between logical tensor slots (rate grids, covariate multiplier
//! grids, standard deviation multipliers) and the flat variable vector the
//! optimizer sees.  Random-effect blocks come first so that indices
//! `[0, random_size)` are random effects and `[random_size, size)` are
//! fixed effects.
//!
//! Age/time order inside every block is time-major:
//! `offset + i * n_time + j` for age index `i` and time index `j`.

use crate::error::{Error, Result};
use crate::table::loader::Mulcov;
use crate::table::types::{MulcovType, NslistPairRow, RateRow, SmoothRow, SubgroupRow, N_RATE};

/// Location of one block of variables in the packed vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubvecInfo {
    pub mulcov_id: Option<usize>,
    pub covariate_id: Option<usize>,
    pub group_id: Option<usize>,
    pub smooth_id: usize,
    pub n_var: usize,
    pub offset: usize,
}

/// The packed-vector layout for one model.
#[derive(Debug, Clone)]
pub struct PackInfo {
    n_smooth: usize,
    n_integrand: usize,
    n_child: usize,
    n_random: usize,
    size: usize,
    first_subgroup_id: Vec<usize>,
    subgroup_size: Vec<usize>,
    /// `3 * smooth_id + k` for k in {value, dage, dtime}.
    mulstd_offset: Vec<Option<usize>>,
    /// `[rate][j]` with `j == n_child` meaning the parent.
    node_rate_value: Vec<Vec<Option<SubvecInfo>>>,
    group_rate_value: Vec<Vec<SubvecInfo>>,
    /// `[rate][j][k]` where `k` indexes subgroups of the multiplier's group.
    subgroup_rate_value: Vec<Vec<Vec<SubvecInfo>>>,
    group_meas_value: Vec<Vec<SubvecInfo>>,
    group_meas_noise: Vec<Vec<SubvecInfo>>,
    subgroup_meas_value: Vec<Vec<Vec<SubvecInfo>>>,
}

impl PackInfo {
    pub fn new(
        n_integrand: usize,
        child_id2node_id: &[usize],
        subgroup_table: &[SubgroupRow],
        smooth_table: &[SmoothRow],
        mulcov_table: &[Mulcov],
        rate_table: &[RateRow],
        nslist_pair: &[NslistPairRow],
    ) -> Result<PackInfo> {
        let n_child = child_id2node_id.len();
        let n_smooth = smooth_table.len();

        // groups are contiguous blocks of subgroups
        let mut first_subgroup_id = vec![0usize];
        let mut subgroup_size = Vec::new();
        let mut previous_group = subgroup_table[0].group_id;
        let mut previous_first = 0usize;
        for (subgroup_id, row) in subgroup_table.iter().enumerate().skip(1) {
            if row.group_id != previous_group {
                subgroup_size.push(subgroup_id - previous_first);
                first_subgroup_id.push(subgroup_id);
                previous_group = row.group_id;
                previous_first = subgroup_id;
            }
        }
        subgroup_size.push(subgroup_table.len() - previous_first);

        let grid_size = |smooth_id: usize| -> usize {
            smooth_table[smooth_id].n_age * smooth_table[smooth_id].n_time
        };

        let mut offset = 0usize;
        let mut node_rate_value: Vec<Vec<Option<SubvecInfo>>> =
            vec![vec![None; n_child + 1]; N_RATE];
        let mut group_rate_value: Vec<Vec<SubvecInfo>> = vec![Vec::new(); N_RATE];
        let mut subgroup_rate_value: Vec<Vec<Vec<SubvecInfo>>> = vec![Vec::new(); N_RATE];
        let mut group_meas_value: Vec<Vec<SubvecInfo>> = vec![Vec::new(); n_integrand];
        let mut group_meas_noise: Vec<Vec<SubvecInfo>> = vec![Vec::new(); n_integrand];
        let mut subgroup_meas_value: Vec<Vec<Vec<SubvecInfo>>> = vec![Vec::new(); n_integrand];

        // -------------------------------------------------------------------
        // random effects
        // -------------------------------------------------------------------

        // child node rate grids
        for rate_id in 0..N_RATE {
            for j in 0..n_child {
                let mut smooth_id = rate_table[rate_id].child_smooth_id;
                if let Some(nslist_id) = rate_table[rate_id].child_nslist_id {
                    // per-child smoothing list
                    let child_node_id = child_id2node_id[j];
                    smooth_id = nslist_pair
                        .iter()
                        .find(|p| p.nslist_id == nslist_id && p.node_id == child_node_id)
                        .map(|p| p.smooth_id);
                    if smooth_id.is_none() {
                        return Err(Error::table(
                            "nslist_pair",
                            None,
                            format!(
                                "nslist {nslist_id} has no smoothing for child node {child_node_id}"
                            ),
                        ));
                    }
                }
                if let Some(smooth_id) = smooth_id {
                    let n_var = grid_size(smooth_id);
                    node_rate_value[rate_id][j] = Some(SubvecInfo {
                        mulcov_id: None,
                        covariate_id: None,
                        group_id: None,
                        smooth_id,
                        n_var,
                        offset,
                    });
                    offset += n_var;
                }
            }
        }

        // subgroup rate value covariate grids
        for rate_id in 0..N_RATE {
            for (mulcov_id, m) in mulcov_table.iter().enumerate() {
                let matches = m.mulcov_type == MulcovType::RateValue
                    && m.rate_id == Some(rate_id)
                    && m.subgroup_smooth_id.is_some();
                if matches {
                    let smooth_id = m.subgroup_smooth_id.unwrap();
                    let n_var = grid_size(smooth_id);
                    let n_sub = subgroup_size[m.group_id];
                    let mut info_vec = Vec::with_capacity(n_sub);
                    for _ in 0..n_sub {
                        info_vec.push(SubvecInfo {
                            mulcov_id: Some(mulcov_id),
                            covariate_id: Some(m.covariate_id),
                            group_id: Some(m.group_id),
                            smooth_id,
                            n_var,
                            offset,
                        });
                        offset += n_var;
                    }
                    subgroup_rate_value[rate_id].push(info_vec);
                }
            }
        }

        // subgroup measurement value covariate grids
        for integrand_id in 0..n_integrand {
            for (mulcov_id, m) in mulcov_table.iter().enumerate() {
                let matches = m.mulcov_type == MulcovType::MeasValue
                    && m.integrand_id == Some(integrand_id)
                    && m.subgroup_smooth_id.is_some();
                if matches {
                    let smooth_id = m.subgroup_smooth_id.unwrap();
                    let n_var = grid_size(smooth_id);
                    let n_sub = subgroup_size[m.group_id];
                    let mut info_vec = Vec::with_capacity(n_sub);
                    for _ in 0..n_sub {
                        info_vec.push(SubvecInfo {
                            mulcov_id: Some(mulcov_id),
                            covariate_id: Some(m.covariate_id),
                            group_id: Some(m.group_id),
                            smooth_id,
                            n_var,
                            offset,
                        });
                        offset += n_var;
                    }
                    subgroup_meas_value[integrand_id].push(info_vec);
                }
            }
        }

        let n_random = offset;

        // -------------------------------------------------------------------
        // fixed effects
        // -------------------------------------------------------------------

        // smoothing standard deviation multipliers
        let mut mulstd_offset = vec![None; 3 * n_smooth];
        for (smooth_id, smooth) in smooth_table.iter().enumerate() {
            let prior_ids = [
                smooth.mulstd_value_prior_id,
                smooth.mulstd_dage_prior_id,
                smooth.mulstd_dtime_prior_id,
            ];
            for (k, prior_id) in prior_ids.iter().enumerate() {
                if prior_id.is_some() {
                    mulstd_offset[3 * smooth_id + k] = Some(offset);
                    offset += 1;
                }
            }
        }

        // parent node rate grids
        for rate_id in 0..N_RATE {
            if let Some(smooth_id) = rate_table[rate_id].parent_smooth_id {
                let n_var = grid_size(smooth_id);
                node_rate_value[rate_id][n_child] = Some(SubvecInfo {
                    mulcov_id: None,
                    covariate_id: None,
                    group_id: None,
                    smooth_id,
                    n_var,
                    offset,
                });
                offset += n_var;
            }
        }

        // group measurement value and noise covariate grids
        for integrand_id in 0..n_integrand {
            for (mulcov_id, m) in mulcov_table.iter().enumerate() {
                let is_meas = matches!(
                    m.mulcov_type,
                    MulcovType::MeasValue | MulcovType::MeasNoise
                );
                let matches = is_meas
                    && m.integrand_id == Some(integrand_id)
                    && m.group_smooth_id.is_some();
                if matches {
                    let info_vec = match m.mulcov_type {
                        MulcovType::MeasValue => &mut group_meas_value[integrand_id],
                        MulcovType::MeasNoise => &mut group_meas_noise[integrand_id],
                        MulcovType::RateValue => unreachable!(),
                    };
                    if info_vec
                        .iter()
                        .any(|info| info.covariate_id == Some(m.covariate_id))
                    {
                        return Err(Error::table(
                            "mulcov",
                            mulcov_id,
                            format!(
                                "covariate_id appears twice with mulcov_type '{}'",
                                m.mulcov_type.name()
                            ),
                        ));
                    }
                    let smooth_id = m.group_smooth_id.unwrap();
                    let n_var = grid_size(smooth_id);
                    info_vec.push(SubvecInfo {
                        mulcov_id: Some(mulcov_id),
                        covariate_id: Some(m.covariate_id),
                        group_id: Some(m.group_id),
                        smooth_id,
                        n_var,
                        offset,
                    });
                    offset += n_var;
                }
            }
        }

        // group rate value covariate grids
        for rate_id in 0..N_RATE {
            for (mulcov_id, m) in mulcov_table.iter().enumerate() {
                let matches = m.mulcov_type == MulcovType::RateValue
                    && m.rate_id == Some(rate_id)
                    && m.group_smooth_id.is_some();
                if matches {
                    if group_rate_value[rate_id]
                        .iter()
                        .any(|info| info.covariate_id == Some(m.covariate_id))
                    {
                        return Err(Error::table(
                            "mulcov",
                            mulcov_id,
                            "covariate_id appears twice with mulcov_type 'rate_value'",
                        ));
                    }
                    let smooth_id = m.group_smooth_id.unwrap();
                    let n_var = grid_size(smooth_id);
                    group_rate_value[rate_id].push(SubvecInfo {
                        mulcov_id: Some(mulcov_id),
                        covariate_id: Some(m.covariate_id),
                        group_id: Some(m.group_id),
                        smooth_id,
                        n_var,
                        offset,
                    });
                    offset += n_var;
                }
            }
        }

        Ok(PackInfo {
            n_smooth,
            n_integrand,
            n_child,
            n_random,
            size: offset,
            first_subgroup_id,
            subgroup_size,
            mulstd_offset,
            node_rate_value,
            group_rate_value,
            subgroup_rate_value,
            group_meas_value,
            group_meas_noise,
            subgroup_meas_value,
        })
    }

    /// Total number of model variables.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of random effects (the packed prefix), counting those
    /// constrained to constants.
    pub fn random_size(&self) -> usize {
        self.n_random
    }

    pub fn integrand_size(&self) -> usize {
        self.n_integrand
    }

    pub fn child_size(&self) -> usize {
        self.n_child
    }

    pub fn smooth_size(&self) -> usize {
        self.n_smooth
    }

    pub fn group_size(&self) -> usize {
        self.subgroup_size.len()
    }

    pub fn subgroup_size(&self, group_id: usize) -> usize {
        self.subgroup_size[group_id]
    }

    pub fn first_subgroup_id(&self, group_id: usize) -> usize {
        self.first_subgroup_id[group_id]
    }

    /// Offset of the standard deviation multiplier for smoothing
    /// `smooth_id` and prior kind `k` (0 value, 1 dage, 2 dtime); `None`
    /// when the multiplier is fixed at one.
    pub fn mulstd_offset(&self, smooth_id: usize, k: usize) -> Option<usize> {
        self.mulstd_offset[3 * smooth_id + k]
    }

    /// Rate grid block for child `j`, or the parent when `j == n_child`.
    /// `None` when the rate has no smoothing (identically zero).
    pub fn node_rate_value_info(&self, rate_id: usize, j: usize) -> Option<SubvecInfo> {
        self.node_rate_value[rate_id][j]
    }

    pub fn group_rate_value_n_cov(&self, rate_id: usize) -> usize {
        self.group_rate_value[rate_id].len()
    }

    pub fn group_rate_value_info(&self, rate_id: usize, j: usize) -> SubvecInfo {
        self.group_rate_value[rate_id][j]
    }

    pub fn subgroup_rate_value_n_cov(&self, rate_id: usize) -> usize {
        self.subgroup_rate_value[rate_id].len()
    }

    pub fn subgroup_rate_value_n_sub(&self, rate_id: usize, j: usize) -> usize {
        self.subgroup_rate_value[rate_id][j].len()
    }

    pub fn subgroup_rate_value_info(&self, rate_id: usize, j: usize, k: usize) -> SubvecInfo {
        self.subgroup_rate_value[rate_id][j][k]
    }

    pub fn group_meas_value_n_cov(&self, integrand_id: usize) -> usize {
        self.group_meas_value[integrand_id].len()
    }

    pub fn group_meas_value_info(&self, integrand_id: usize, j: usize) -> SubvecInfo {
        self.group_meas_value[integrand_id][j]
    }

    pub fn group_meas_noise_n_cov(&self, integrand_id: usize) -> usize {
        self.group_meas_noise[integrand_id].len()
    }

    pub fn group_meas_noise_info(&self, integrand_id: usize, j: usize) -> SubvecInfo {
        self.group_meas_noise[integrand_id][j]
    }

    pub fn subgroup_meas_value_n_cov(&self, integrand_id: usize) -> usize {
        self.subgroup_meas_value[integrand_id].len()
    }

    pub fn subgroup_meas_value_n_sub(&self, integrand_id: usize, j: usize) -> usize {
        self.subgroup_meas_value[integrand_id][j].len()
    }

    pub fn subgroup_meas_value_info(&self, integrand_id: usize, j: usize, k: usize) -> SubvecInfo {
        self.subgroup_meas_value[integrand_id][j][k]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::types::RateId;

    fn smooth(smooth_id: usize, n_age: usize, n_time: usize) -> SmoothRow {
        SmoothRow {
            smooth_id,
            smooth_name: format!("s{smooth_id}"),
            n_age,
            n_time,
            mulstd_value_prior_id: None,
            mulstd_dage_prior_id: None,
            mulstd_dtime_prior_id: None,
        }
    }

    fn rate_rows(parent: &[(RateId, usize)], child: &[(RateId, usize)]) -> Vec<RateRow> {
        RateId::ALL
            .iter()
            .enumerate()
            .map(|(i, r)| RateRow {
                rate_id: i,
                rate_name: r.name().to_string(),
                parent_smooth_id: parent
                    .iter()
                    .find(|(pr, _)| pr == r)
                    .map(|(_, s)| *s),
                child_smooth_id: child.iter().find(|(cr, _)| cr == r).map(|(_, s)| *s),
                child_nslist_id: None,
            })
            .collect()
    }

    fn one_group() -> Vec<SubgroupRow> {
        vec![SubgroupRow {
            subgroup_id: 0,
            subgroup_name: "world".to_string(),
            group_id: 0,
            group_name: "world".to_string(),
        }]
    }

    #[test]
    fn test_random_prefix_then_fixed() {
        // iota: parent 2x2 grid, child 1x1 grid, two children
        let smooths = vec![smooth(0, 2, 2), smooth(1, 1, 1)];
        let rates = rate_rows(&[(RateId::Iota, 0)], &[(RateId::Iota, 1)]);
        let pack = PackInfo::new(1, &[1, 2], &one_group(), &smooths, &[], &rates, &[]).unwrap();

        assert_eq!(pack.random_size(), 2); // one var per child
        assert_eq!(pack.size(), 2 + 4); // plus the 2x2 parent grid

        let child0 = pack.node_rate_value_info(RateId::Iota.index(), 0).unwrap();
        let child1 = pack.node_rate_value_info(RateId::Iota.index(), 1).unwrap();
        let parent = pack.node_rate_value_info(RateId::Iota.index(), 2).unwrap();
        assert_eq!(child0.offset, 0);
        assert_eq!(child1.offset, 1);
        assert_eq!(parent.offset, 2);
        assert_eq!(parent.n_var, 4);
        // rho has no smoothing at all
        assert!(pack.node_rate_value_info(RateId::Rho.index(), 2).is_none());
    }

    #[test]
    fn test_mulstd_offsets() {
        let mut s = smooth(0, 1, 1);
        s.mulstd_value_prior_id = Some(0);
        s.mulstd_dtime_prior_id = Some(1);
        let rates = rate_rows(&[(RateId::Iota, 0)], &[]);
        let pack = PackInfo::new(1, &[], &one_group(), &[s], &[], &rates, &[]).unwrap();

        assert_eq!(pack.random_size(), 0);
        // mulstd value, mulstd dtime, then the parent grid
        assert_eq!(pack.mulstd_offset(0, 0), Some(0));
        assert_eq!(pack.mulstd_offset(0, 1), None);
        assert_eq!(pack.mulstd_offset(0, 2), Some(1));
        let parent = pack.node_rate_value_info(RateId::Iota.index(), 0).unwrap();
        assert_eq!(parent.offset, 2);
        assert_eq!(pack.size(), 3);
    }

    #[test]
    fn test_duplicate_mulcov_covariate_is_fatal() {
        let smooths = vec![smooth(0, 1, 1)];
        let rates = rate_rows(&[(RateId::Iota, 0)], &[]);
        let m = Mulcov {
            mulcov_type: MulcovType::MeasValue,
            rate_id: None,
            integrand_id: Some(0),
            covariate_id: 0,
            group_id: 0,
            group_smooth_id: Some(0),
            subgroup_smooth_id: None,
        };
        let mulcovs = vec![m.clone(), m];
        let result = PackInfo::new(1, &[], &one_group(), &smooths, &mulcovs, &rates, &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_packing_is_a_bijection() {
        // every variable id is covered by exactly one block
        let smooths = vec![smooth(0, 2, 3), smooth(1, 1, 1), smooth(2, 1, 2)];
        let mut s0 = smooths[0].clone();
        s0.mulstd_value_prior_id = Some(5);
        let rates = rate_rows(
            &[(RateId::Iota, 0), (RateId::Chi, 2)],
            &[(RateId::Iota, 1)],
        );
        let mulcovs = vec![Mulcov {
            mulcov_type: MulcovType::MeasValue,
            rate_id: None,
            integrand_id: Some(0),
            covariate_id: 0,
            group_id: 0,
            group_smooth_id: Some(2),
            subgroup_smooth_id: None,
        }];
        let pack = PackInfo::new(
            1,
            &[1, 2, 3],
            &one_group(),
            &[s0, smooths[1].clone(), smooths[2].clone()],
            &mulcovs,
            &rates,
            &[],
        )
        .unwrap();

        let mut covered = vec![0usize; pack.size()];
        let mut cover = |offset: usize, n_var: usize| {
            for var_id in offset..offset + n_var {
                covered[var_id] += 1;
            }
        };
        for smooth_id in 0..pack.smooth_size() {
            for k in 0..3 {
                if let Some(offset) = pack.mulstd_offset(smooth_id, k) {
                    cover(offset, 1);
                }
            }
        }
        for rate_id in 0..N_RATE {
            for j in 0..=pack.child_size() {
                if let Some(info) = pack.node_rate_value_info(rate_id, j) {
                    cover(info.offset, info.n_var);
                }
            }
            for j in 0..pack.group_rate_value_n_cov(rate_id) {
                let info = pack.group_rate_value_info(rate_id, j);
                cover(info.offset, info.n_var);
            }
        }
        for integrand_id in 0..pack.integrand_size() {
            for j in 0..pack.group_meas_value_n_cov(integrand_id) {
                let info = pack.group_meas_value_info(integrand_id, j);
                cover(info.offset, info.n_var);
            }
            for j in 0..pack.group_meas_noise_n_cov(integrand_id) {
                let info = pack.group_meas_noise_info(integrand_id, j);
                cover(info.offset, info.n_var);
            }
        }
        assert!(covered.iter().all(|&count| count == 1));
        // the random prefix is exactly the child grids
        assert_eq!(pack.random_size(), 3 * 1 * 1);
    }

    #[test]
    fn test_subgroup_blocks_per_mulcov() {
        // one group with two subgroups; a subgroup rate_value multiplier
        // gets one grid per subgroup, all random effects
        let subgroups = vec![
            SubgroupRow {
                subgroup_id: 0,
                subgroup_name: "a".to_string(),
                group_id: 0,
                group_name: "g".to_string(),
            },
            SubgroupRow {
                subgroup_id: 1,
                subgroup_name: "b".to_string(),
                group_id: 0,
                group_name: "g".to_string(),
            },
        ];
        let smooths = vec![smooth(0, 1, 1), smooth(1, 1, 2)];
        let rates = rate_rows(&[(RateId::Iota, 0)], &[]);
        let mulcovs = vec![Mulcov {
            mulcov_type: MulcovType::RateValue,
            rate_id: Some(RateId::Iota.index()),
            integrand_id: None,
            covariate_id: 0,
            group_id: 0,
            group_smooth_id: None,
            subgroup_smooth_id: Some(1),
        }];
        let pack = PackInfo::new(1, &[], &subgroups, &smooths, &mulcovs, &rates, &[]).unwrap();
        assert_eq!(pack.random_size(), 4); // 2 subgroups x (1x2) grid
        assert_eq!(pack.subgroup_rate_value_n_cov(RateId::Iota.index()), 1);
        assert_eq!(pack.subgroup_rate_value_n_sub(RateId::Iota.index(), 0), 2);
        let info = pack.subgroup_rate_value_info(RateId::Iota.index(), 0, 1);
        assert_eq!(info.offset, 2);
        assert_eq!(pack.first_subgroup_id(0), 0);
        assert_eq!(pack.subgroup_size(0), 2);
    }
}
