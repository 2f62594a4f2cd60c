//! Probability normalization.
//!
//! Users type win/place percentages that rarely add up. Win estimates are
//! rescaled to a 100% book and place estimates to 100% times the number of
//! paid places, with every place probability kept within `[win, 1]`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{AdvisorError, ProbabilityInput, Race};

/// Runners at or below this count get no place payout.
const NO_PLACE_MAX_RUNNERS: usize = 4;
/// Runners at or below this count pay two places instead of three.
const TWO_PLACE_MAX_RUNNERS: usize = 7;

/// Bisection steps; enough to exhaust f64 precision.
const FIT_ITERATIONS: usize = 200;

/// Number of finishing positions a place ticket pays on.
pub fn paid_places(runners: usize) -> usize {
    if runners <= NO_PLACE_MAX_RUNNERS {
        0
    } else if runners <= TWO_PLACE_MAX_RUNNERS {
        2
    } else {
        3
    }
}

/// Normalized win/place probabilities (fractions, not percent) for every
/// starter, in race-card order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProbabilities {
    pub horses: Vec<u8>,
    pub win: Vec<f64>,
    pub place: Vec<f64>,
    pub paid_places: usize,
}

impl NormalizedProbabilities {
    fn index_of(&self, horse: u8) -> Option<usize> {
        self.horses.iter().position(|&h| h == horse)
    }

    /// Win probability for `horse` (0 for non-runners).
    pub fn win(&self, horse: u8) -> f64 {
        self.index_of(horse).map(|i| self.win[i]).unwrap_or(0.0)
    }

    /// Place probability for `horse` (0 for non-runners or no place pool).
    pub fn place(&self, horse: u8) -> f64 {
        self.index_of(horse).map(|i| self.place[i]).unwrap_or(0.0)
    }

    pub fn runner_count(&self) -> usize {
        self.horses.len()
    }

    /// Horse with the highest win probability.
    pub fn favourite(&self) -> Option<(u8, f64)> {
        self.horses
            .iter()
            .copied()
            .zip(self.win.iter().copied())
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    /// Back to percentages, e.g. for echoing to a client.
    pub fn as_inputs(&self) -> Vec<ProbabilityInput> {
        self.horses
            .iter()
            .enumerate()
            .map(|(i, &horse)| ProbabilityInput {
                horse,
                win_pct: self.win[i] * 100.0,
                place_pct: self.place[i] * 100.0,
            })
            .collect()
    }
}

/// Normalize raw user estimates against the race card.
///
/// Horses the user left out get 0%. A column that is entirely zero falls
/// back to a uniform distribution.
pub fn normalize(
    inputs: &[ProbabilityInput],
    race: &Race,
) -> Result<NormalizedProbabilities, AdvisorError> {
    let horses: Vec<u8> = race.runners().map(|h| h.number).collect();
    let n = horses.len();
    if n < 2 {
        return Err(AdvisorError::Validation(format!(
            "Race {} has {n} runner(s); at least 2 are needed",
            race.id
        )));
    }

    let mut raw_win = vec![0.0; n];
    let mut raw_place = vec![0.0; n];
    let mut seen = vec![false; n];

    for input in inputs {
        if !input.win_pct.is_finite() || !input.place_pct.is_finite() {
            return Err(AdvisorError::Validation(format!(
                "Probability for horse {} is not a number",
                input.horse
            )));
        }
        let idx = horses.iter().position(|&h| h == input.horse).ok_or_else(|| {
            AdvisorError::Validation(format!(
                "Horse {} is not a starter in race {}",
                input.horse, race.id
            ))
        })?;
        if seen[idx] {
            return Err(AdvisorError::Validation(format!(
                "Duplicate probability entry for horse {}",
                input.horse
            )));
        }
        seen[idx] = true;
        raw_win[idx] = input.win_pct.max(0.0);
        raw_place[idx] = input.place_pct.max(0.0);
    }

    let win = scale_to_total(&raw_win, 1.0);
    let places = paid_places(n);

    let place = if places == 0 {
        vec![0.0; n]
    } else {
        // Place can't be below win: a winner is always placed.
        fit_to_total(&raw_place, &win, places as f64)
    };

    debug!(
        race_id = %race.id,
        runners = n,
        paid_places = places,
        raw_win_total = raw_win.iter().sum::<f64>(),
        raw_place_total = raw_place.iter().sum::<f64>(),
        "Probabilities normalized"
    );

    Ok(NormalizedProbabilities {
        horses,
        win,
        place,
        paid_places: places,
    })
}

/// Scale `values` proportionally so they sum to `total`.
fn scale_to_total(values: &[f64], total: f64) -> Vec<f64> {
    let sum: f64 = values.iter().sum();
    if sum <= 0.0 {
        return vec![total / values.len() as f64; values.len()];
    }
    values.iter().map(|v| v / sum * total).collect()
}

/// Fit `values` to sum to `total` with each entry kept within
/// `[lower[i], 1.0]`. Requires `sum(lower) <= total <= values.len()`.
///
/// Entries follow `clamp(t · v, lower, 1)` for the scale `t` that hits the
/// total. When even saturating every positive entry falls short, the rest
/// is spread evenly over the entries the user left at zero.
fn fit_to_total(values: &[f64], lower: &[f64], total: f64) -> Vec<f64> {
    let scaled = |t: f64| -> Vec<f64> {
        values
            .iter()
            .zip(lower)
            .map(|(&v, &l)| {
                let l = l.min(1.0);
                if v > 0.0 {
                    (t * v).clamp(l, 1.0)
                } else {
                    l
                }
            })
            .collect()
    };

    // Past `t_max` every positive entry sits at its cap.
    let min_positive = values.iter().copied().filter(|&v| v > 0.0).fold(f64::INFINITY, f64::min);
    let t_max = if min_positive.is_finite() { (1.0 / min_positive).min(f64::MAX) } else { 0.0 };

    let saturated = scaled(t_max);
    if saturated.iter().sum::<f64>() >= total {
        let t = bisect(0.0, t_max, |t| scaled(t).iter().sum::<f64>() >= total);
        return scaled(t);
    }

    let lifted = |u: f64| -> Vec<f64> { saturated.iter().map(|&x| (x + u).min(1.0)).collect() };
    let u = bisect(0.0, 1.0, |u| lifted(u).iter().sum::<f64>() >= total);
    lifted(u)
}

/// Smallest `x` in `[lo, hi]` (to float precision) where the monotone
/// predicate `reached` holds. `reached(hi)` must hold.
fn bisect(mut lo: f64, mut hi: f64, reached: impl Fn(f64) -> bool) -> f64 {
    for _ in 0..FIT_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if reached(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn input(horse: u8, win_pct: f64, place_pct: f64) -> ProbabilityInput {
        ProbabilityInput { horse, win_pct, place_pct }
    }

    fn sum(v: &[f64]) -> f64 {
        v.iter().sum()
    }

    #[test]
    fn test_paid_places() {
        assert_eq!(paid_places(4), 0);
        assert_eq!(paid_places(5), 2);
        assert_eq!(paid_places(7), 2);
        assert_eq!(paid_places(8), 3);
        assert_eq!(paid_places(18), 3);
    }

    #[test]
    fn test_win_sums_to_one() {
        let race = Race::sample(8);
        let inputs: Vec<_> = (1..=8).map(|h| input(h, 20.0, 40.0)).collect();
        let p = normalize(&inputs, &race).unwrap();
        assert!((sum(&p.win) - 1.0).abs() < 1e-9);
        assert!((p.win(1) - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_place_sums_to_paid_places() {
        let race = Race::sample(10);
        let inputs: Vec<_> = (1..=10)
            .map(|h| input(h, (11 - h) as f64, (11 - h) as f64 * 2.0))
            .collect();
        let p = normalize(&inputs, &race).unwrap();
        assert_eq!(p.paid_places, 3);
        assert!((sum(&p.place) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_place_capped_at_one_and_redistributed() {
        let race = Race::sample(8);
        // Horse 1 asks for far more than its share.
        let mut inputs = vec![input(1, 50.0, 1000.0)];
        inputs.extend((2..=8).map(|h| input(h, 7.0, 10.0)));
        let p = normalize(&inputs, &race).unwrap();
        assert!((p.place(1) - 1.0).abs() < 1e-9);
        assert!(p.place.iter().all(|&x| x <= 1.0 + 1e-12));
        assert!((sum(&p.place) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_place_never_below_win() {
        let race = Race::sample(8);
        // Horse 1 gets a big win share but a tiny place estimate.
        let mut inputs = vec![input(1, 60.0, 1.0)];
        inputs.extend((2..=8).map(|h| input(h, 5.0, 50.0)));
        let p = normalize(&inputs, &race).unwrap();
        for (w, pl) in p.win.iter().zip(&p.place) {
            assert!(pl + 1e-12 >= *w, "place {pl} < win {w}");
        }
        assert!((sum(&p.place) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_place_estimates_lifted_to_win() {
        let race = Race::sample(5);
        // One horse asks for a certain place, the rest give no place view.
        let mut inputs: Vec<_> = (1..=4).map(|h| input(h, 20.0, 0.0)).collect();
        inputs.push(input(5, 20.0, 100.0));
        let p = normalize(&inputs, &race).unwrap();
        assert_eq!(p.paid_places, 2);
        assert!((sum(&p.place) - 2.0).abs() < 1e-9, "place {:?}", p.place);
        assert!((p.place(5) - 1.0).abs() < 1e-9);
        for h in 1..=4 {
            assert!((p.place(h) - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn test_place_with_some_zero_estimates() {
        let race = Race::sample(8);
        let inputs = vec![
            input(1, 40.0, 0.0),
            input(2, 30.0, 0.0),
            input(3, 10.0, 90.0),
            input(4, 10.0, 80.0),
            input(5, 10.0, 0.0),
        ];
        let p = normalize(&inputs, &race).unwrap();
        assert!((sum(&p.place) - 3.0).abs() < 1e-9, "place {:?}", p.place);
        assert!(p.place(1) >= 0.4 - 1e-12);
        assert!(p.place(2) >= 0.3 - 1e-12);
        assert!(p.place(3) <= 1.0 + 1e-12);
    }

    #[test]
    fn test_random_inputs_keep_place_bounds() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let runners: u8 = rng.gen_range(5..=18);
            let race = Race::sample(runners);
            let mut inputs = Vec::new();
            for h in 1..=runners {
                if !rng.gen_bool(0.8) {
                    continue;
                }
                let win = if rng.gen_bool(0.2) { 0.0 } else { rng.gen_range(0.0..60.0) };
                let place = if rng.gen_bool(0.3) { 0.0 } else { rng.gen_range(0.0..150.0) };
                inputs.push(input(h, win, place));
            }
            let p = normalize(&inputs, &race).unwrap();

            assert!((sum(&p.win) - 1.0).abs() < 1e-9);
            assert!(
                (sum(&p.place) - p.paid_places as f64).abs() < 1e-9,
                "runners {runners}, place {:?}",
                p.place
            );
            for (w, pl) in p.win.iter().zip(&p.place) {
                assert!(*pl + 1e-12 >= *w && *pl <= 1.0 + 1e-12, "win {w}, place {pl}");
            }
        }
    }

    #[test]
    fn test_missing_horses_get_zero() {
        let race = Race::sample(6);
        let inputs = vec![input(1, 30.0, 60.0), input(2, 10.0, 20.0)];
        let p = normalize(&inputs, &race).unwrap();
        assert!((p.win(1) - 0.75).abs() < 1e-9);
        assert_eq!(p.win(5), 0.0);
        assert_eq!(p.place(5), 0.0);
        assert!((sum(&p.place) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_zero_falls_back_to_uniform() {
        let race = Race::sample(5);
        let p = normalize(&[], &race).unwrap();
        assert!(p.win.iter().all(|&w| (w - 0.2).abs() < 1e-9));
        assert!(p.place.iter().all(|&x| (x - 0.4).abs() < 1e-9));
    }

    #[test]
    fn test_negative_values_clamped() {
        let race = Race::sample(5);
        let inputs = vec![input(1, -10.0, -5.0), input(2, 50.0, 50.0)];
        let p = normalize(&inputs, &race).unwrap();
        assert_eq!(p.win(1), 0.0);
        assert!((p.win(2) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_field_has_no_place_pool() {
        let race = Race::sample(4);
        let inputs: Vec<_> = (1..=4).map(|h| input(h, 25.0, 50.0)).collect();
        let p = normalize(&inputs, &race).unwrap();
        assert_eq!(p.paid_places, 0);
        assert!(p.place.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_unknown_and_duplicate_horses_rejected() {
        let race = Race::sample(6);
        assert!(normalize(&[input(9, 10.0, 10.0)], &race).is_err());
        assert!(normalize(&[input(1, 10.0, 10.0), input(1, 5.0, 5.0)], &race).is_err());
        assert!(normalize(&[input(1, f64::NAN, 10.0)], &race).is_err());
    }

    #[test]
    fn test_scratched_horse_is_not_a_runner() {
        let mut race = Race::sample(8);
        race.horses[7].scratched = true;
        assert!(normalize(&[input(8, 10.0, 10.0)], &race).is_err());
        let p = normalize(&[], &race).unwrap();
        assert_eq!(p.runner_count(), 7);
        assert_eq!(p.paid_places, 2);
    }

    #[test]
    fn test_too_few_runners() {
        let race = Race::sample(1);
        assert!(normalize(&[], &race).is_err());
    }

    #[test]
    fn test_favourite_and_as_inputs() {
        let race = Race::sample(5);
        let inputs = vec![input(3, 50.0, 80.0), input(1, 25.0, 60.0), input(2, 25.0, 60.0)];
        let p = normalize(&inputs, &race).unwrap();
        assert_eq!(p.favourite().map(|(h, _)| h), Some(3));
        let back = p.as_inputs();
        assert_eq!(back.len(), 5);
        assert!((back[2].win_pct - 50.0).abs() < 1e-9);
    }
}
