//! Cache-page distribution for one graph.
//!
//! Given every stream's `(min, opt, accuracy)`, the reference amount
//! (`min(available, per-graph cap)`) and what is currently available, decide
//! how many pages each stream gets:
//!
//! 1. summed minimum above availability: fail
//! 2. summed minimum at or above the reference: minimums
//! 3. summed optimum above the reference: minimum plus a share of
//!    `reference - total_min` weighted by `sqrt(opt - min)`; accurate streams
//!    never get more than their optimum
//! 4. optimums fit and all are accurate: optimums
//! 5. optimums fit, some estimated: optimums, and the estimated streams split
//!    `reference - total_opt` by the same weights
//!
//! Unbounded streams use `min + reference` as their optimum. Fractions are
//! settled by largest remainder so the grants in cases 3 and 5 add up to the
//! reference exactly.

use xflow_core::resource::{ResourceRequirements, ResourceSettingType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDemand {
    pub min: u32,
    pub opt: u32,
    pub setting: ResourceSettingType,
}

impl PageDemand {
    pub const fn new(min: u32, opt: u32, setting: ResourceSettingType) -> Self {
        Self { min, opt, setting }
    }
}

impl From<&ResourceRequirements> for PageDemand {
    fn from(req: &ResourceRequirements) -> Self {
        Self {
            min: req.min.cache_pages,
            opt: req.opt.cache_pages,
            setting: req.setting,
        }
    }
}

/// Summed minimum could not be covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub required: u64,
    pub available: u64,
}

pub fn distribute_pages(
    demands: &[PageDemand],
    reference: u32,
    available: u32,
) -> Result<Vec<u32>, Shortfall> {
    let reference = u64::from(reference);
    let available = u64::from(available);

    let mins: Vec<u64> = demands.iter().map(|d| u64::from(d.min)).collect();
    let opts: Vec<u64> = demands
        .iter()
        .map(|d| match d.setting {
            ResourceSettingType::Unbounded => u64::from(d.min) + reference,
            _ => u64::from(d.opt.max(d.min)),
        })
        .collect();
    let total_min: u64 = mins.iter().sum();
    let total_opt: u64 = opts.iter().sum();

    if total_min > available {
        return Err(Shortfall {
            required: total_min,
            available,
        });
    }
    if total_min >= reference {
        return Ok(narrow(&mins));
    }

    if total_opt > reference {
        let extra = water_fill(demands, &mins, &opts, reference - total_min);
        let grants: Vec<u64> = mins.iter().zip(&extra).map(|(m, e)| m + e).collect();
        return Ok(narrow(&grants));
    }

    let all_accurate = demands
        .iter()
        .all(|d| d.setting == ResourceSettingType::Accurate);
    if all_accurate {
        return Ok(narrow(&opts));
    }

    let eligible: Vec<usize> = (0..demands.len())
        .filter(|&i| demands[i].setting != ResourceSettingType::Accurate)
        .collect();
    let weights: Vec<f64> = eligible
        .iter()
        .map(|&i| ((opts[i] - mins[i]) as f64).sqrt())
        .collect();
    let shares = apportion(reference - total_opt, &weights);

    let mut grants = opts;
    for (&i, share) in eligible.iter().zip(shares) {
        grants[i] += share;
    }
    Ok(narrow(&grants))
}

/// Split `extra` pages among streams by `sqrt(opt - min)`, fixing accurate
/// streams at their optimum whenever their share would reach it.
fn water_fill(demands: &[PageDemand], mins: &[u64], opts: &[u64], extra: u64) -> Vec<u64> {
    let n = demands.len();
    let gap: Vec<u64> = (0..n).map(|i| opts[i] - mins[i]).collect();
    let mut fixed: Vec<Option<u64>> = vec![None; n];
    let mut remaining = extra;

    loop {
        let active: Vec<usize> = (0..n).filter(|&i| fixed[i].is_none()).collect();
        if active.is_empty() {
            break;
        }
        let weights: Vec<f64> = active.iter().map(|&i| (gap[i] as f64).sqrt()).collect();
        let sum: f64 = weights.iter().sum();

        let mut capped = false;
        for (k, &i) in active.iter().enumerate() {
            if demands[i].setting != ResourceSettingType::Accurate {
                continue;
            }
            let share = if sum > 0.0 {
                remaining as f64 * weights[k] / sum
            } else {
                remaining as f64 / active.len() as f64
            };
            if share >= gap[i] as f64 {
                fixed[i] = Some(gap[i]);
                remaining -= gap[i].min(remaining);
                capped = true;
            }
        }
        if !capped {
            break;
        }
    }

    let active: Vec<usize> = (0..n).filter(|&i| fixed[i].is_none()).collect();
    let weights: Vec<f64> = active.iter().map(|&i| (gap[i] as f64).sqrt()).collect();
    let shares = apportion(remaining, &weights);

    let mut out: Vec<u64> = fixed.iter().map(|f| f.unwrap_or(0)).collect();
    for (&i, share) in active.iter().zip(shares) {
        out[i] = share;
    }
    out
}

/// Largest-remainder apportionment of `total` by `weights`; equal weights if
/// they are all zero. Ties go to the earlier stream.
fn apportion(total: u64, weights: &[f64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: f64 = weights.iter().sum();
    let exact: Vec<f64> = if sum > 0.0 {
        weights.iter().map(|w| total as f64 * w / sum).collect()
    } else {
        vec![total as f64 / weights.len() as f64; weights.len()]
    };

    let mut shares: Vec<u64> = exact.iter().map(|x| x.floor() as u64).collect();
    let handed: u64 = shares.iter().sum();
    let mut leftover = total.saturating_sub(handed);

    let mut order: Vec<usize> = (0..exact.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.partial_cmp(&fa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    for &i in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }
    shares
}

fn narrow(v: &[u64]) -> Vec<u32> {
    v.iter().map(|&x| u32::try_from(x).unwrap_or(u32::MAX)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResourceSettingType::{Accurate, Estimate, Unbounded};

    fn d(min: u32, opt: u32, setting: ResourceSettingType) -> PageDemand {
        PageDemand::new(min, opt, setting)
    }

    #[test]
    fn optimums_fit_all_accurate() {
        let got = distribute_pages(&[d(10, 15, Accurate), d(20, 40, Accurate)], 95, 95).unwrap();
        assert_eq!(got, vec![15, 40]);
    }

    #[test]
    fn estimates_absorb_surplus() {
        let demands = [
            d(10, 11, Accurate),
            d(15, 17, Accurate),
            d(20, 23, Estimate),
            d(25, 29, Accurate),
        ];
        assert_eq!(distribute_pages(&demands, 95, 95).unwrap(), vec![11, 17, 38, 29]);
    }

    #[test]
    fn optimums_exactly_at_reference() {
        let demands = [
            d(10, 20, Estimate),
            d(15, 17, Accurate),
            d(20, 23, Accurate),
            d(25, 35, Estimate),
        ];
        assert_eq!(distribute_pages(&demands, 95, 95).unwrap(), vec![20, 17, 23, 35]);
    }

    #[test]
    fn proportional_branch_with_unbounded() {
        let demands = [
            d(10, 25, Accurate),
            d(15, 31, Estimate),
            d(20, 0, Unbounded),
            d(25, 42, Estimate),
        ];
        let got = distribute_pages(&demands, 95, 95).unwrap();
        assert_eq!(got, vec![14, 20, 31, 30]);
        assert_eq!(got.iter().sum::<u32>(), 95);
    }

    #[test]
    fn equal_weights_split_evenly() {
        let demands = [d(10, 20, Accurate); 3];
        let got = distribute_pages(&demands, 50, 100).unwrap();
        assert_eq!(got, vec![17, 17, 16]);
    }

    #[test]
    fn accurate_stream_is_capped_at_optimum() {
        // sqrt(1) vs sqrt(100): the small gap would get 50/11 > 1 page.
        let demands = [d(5, 6, Accurate), d(5, 105, Estimate)];
        let got = distribute_pages(&demands, 60, 100).unwrap();
        assert_eq!(got, vec![6, 54]);
    }

    #[test]
    fn minimums_when_reference_is_small() {
        let demands = [d(45, 50, Accurate), d(60, 70, Estimate)];
        assert_eq!(distribute_pages(&demands, 95, 190).unwrap(), vec![45, 60]);
    }

    #[test]
    fn shortfall_reports_totals() {
        let demands = [d(50, 50, Accurate), d(46, 46, Accurate)];
        assert_eq!(
            distribute_pages(&demands, 95, 95),
            Err(Shortfall {
                required: 96,
                available: 95
            })
        );
    }

    #[test]
    fn zero_weight_estimates_share_equally() {
        let demands = [d(1, 1, Estimate), d(1, 1, Estimate), d(2, 3, Accurate)];
        assert_eq!(distribute_pages(&demands, 10, 10).unwrap(), vec![4, 3, 3]);
    }

    #[test]
    fn empty_graph_gets_nothing() {
        assert_eq!(distribute_pages(&[], 10, 10).unwrap(), Vec::<u32>::new());
    }
}
