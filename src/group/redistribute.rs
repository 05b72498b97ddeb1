use std::collections::HashMap;

/// Iteration cap for the redistribution loop. On miss, the closest
/// intermediate result wins.
const MAX_ROUNDS: usize = 150;

/// Acceptable distance between the achieved mean and the target.
const TOLERANCE: f64 = 0.01;

/// Lower bound for the weight sum, so a fully saturated group cannot
/// divide by zero.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Spread `target` mean brightness over the members, scaled by each
/// member's headroom (when raising) or its current level (when lowering).
///
/// `seed` holds the per-member levels the spread starts from. Members
/// seeded at or below zero take no part and come back as 0; members with
/// identical seeds always come back with identical values. The returned
/// values are whole brightness steps in 0..=255, rounded only after the
/// loop settles.
#[must_use]
pub fn redistribute(seed: &HashMap<String, f64>, target: f64) -> HashMap<String, u8> {
    let mut result: HashMap<String, u8> = seed
        .iter()
        .filter(|(_, value)| **value <= 0.0)
        .map(|(id, _)| (id.clone(), 0))
        .collect();

    let active: Vec<(&str, f64)> = seed
        .iter()
        .filter(|(_, value)| **value > 0.0)
        .map(|(id, value)| (id.as_str(), *value))
        .collect();

    if active.is_empty() {
        return result;
    }

    let target = target.clamp(0.0, 255.0);

    if target >= 255.0 {
        for (id, _) in active {
            result.insert(id.to_string(), 255);
        }
        return result;
    }

    // Members sharing a seed form a cohort and move in lockstep, so a
    // row of identical spots can never drift apart over many rounds.
    let mut cohorts: HashMap<u64, Vec<&str>> = HashMap::new();
    for &(id, value) in &active {
        cohorts.entry(value.to_bits()).or_default().push(id);
    }

    let mut levels: HashMap<u64, f64> = cohorts
        .keys()
        .map(|bits| (*bits, f64::from_bits(*bits)))
        .collect();

    let mut best: Option<(f64, HashMap<u64, f64>)> = None;
    let mut converged = false;

    for _ in 0..MAX_ROUNDS {
        let current = member_mean(&cohorts, &levels);
        let deviation = (current - target).abs();

        if best.as_ref().is_none_or(|(dev, _)| deviation < *dev) {
            best = Some((deviation, levels.clone()));
        }

        if deviation <= TOLERANCE {
            converged = true;
            break;
        }

        let raising = target > current;
        let total_weight = cohorts
            .iter()
            .map(|(bits, members)| weight(levels[bits], raising) * cohort_size(members))
            .sum::<f64>()
            .max(WEIGHT_EPSILON);
        let scaling = (target - current) / total_weight;

        for bits in cohorts.keys() {
            let level = levels[bits];
            let adjusted = (level + weight(level, raising) * scaling).clamp(0.0, 255.0);
            levels.insert(*bits, adjusted);
        }
    }

    if !converged {
        log::warn!(
            "Brightness redistribution missed target {target:.1} after {MAX_ROUNDS} rounds, \
             using closest attempt"
        );
        if let Some((_, closest)) = best {
            levels = closest;
        }
    }

    for (id, value) in &active {
        result.insert((*id).to_string(), round_u8(levels[&value.to_bits()]));
    }

    result
}

/// A member low on brightness has little to give when dimming down and
/// much room when dimming up; the weight encodes that.
fn weight(level: f64, raising: bool) -> f64 {
    if raising {
        1.0 - level / 255.0
    } else {
        level / 255.0
    }
}

fn member_mean(cohorts: &HashMap<u64, Vec<&str>>, levels: &HashMap<u64, f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0.0;
    for (bits, members) in cohorts {
        let size = cohort_size(members);
        sum += levels[bits] * size;
        count += size;
    }
    sum / count.max(1.0)
}

fn cohort_size(members: &[&str]) -> f64 {
    u32::try_from(members.len()).map_or(1.0, f64::from)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
