//! Mutation operations for sequences.
//!
//! A [`MutationModel`] combines a per-site, per-generation mutation rate `mu`
//! with a 4x4 matrix of substitution weights. Each generation the number of
//! mutation events on a sequence of length `L` is Poisson(`mu * L`). Every
//! event then picks a site and a destination base:
//!
//! 1. **Site**: a site is drawn uniformly and accepted with probability
//!    `site_total / max_total`, where `site_total` is the row total of the
//!    site's current base (times the site's rate multiplier, if any) and
//!    `max_total` is the largest value `site_total` can take. Rejected draws
//!    are repeated. This samples sites proportionally to their instantaneous
//!    rate without building a cumulative table over the sequence.
//! 2. **Base**: the destination is chosen by scanning the current base's row,
//!    weighted by its substitution weights.
//!
//! Row totals are memoized and only recomputed when the matrix changes.
//!
//! [`MutationModel::mutate_and_score_delta`] applies the same events but also
//! hands them to a [`SiteFitnessModel`] which turns them into a log-fitness
//! delta, so fitness never has to be recomputed from the whole sequence.

use std::sync::Arc;

use rand::Rng;
use rand_distr::{Distribution, Poisson};

use crate::base::{Nucleotide, Sequence};
pub use crate::errors::MutationError;
use crate::evolution::SiteFitnessModel;

/// Consecutive rejections after which site selection is abandoned.
pub const MAX_REJECTIONS: usize = 500;

/// Substitution process applied to sequences once per generation.
#[derive(Debug, Clone)]
pub struct MutationModel {
    /// Per-site, per-generation mutation rate.
    mu: f64,
    /// `matrix[from][to]` is the relative weight of `from -> to`.
    matrix: [[f64; 4]; 4],
    /// Row sums of `matrix` (memoized).
    row_totals: [f64; 4],
    /// Largest entry of `row_totals`.
    max_row_total: f64,
    /// Optional per-site rate multipliers.
    site_rates: Option<Arc<[f64]>>,
    /// Largest entry of `site_rates` (1.0 without multipliers).
    max_site_rate: f64,
}

impl MutationModel {
    /// Create a model from a mutation rate and a substitution weight matrix.
    ///
    /// The matrix does not need to be symmetric and its rows do not need to
    /// sum to one; rows with a larger total make their base more mutable.
    ///
    /// # Errors
    /// Returns an error if `mu` or any weight is negative or not finite, if
    /// the diagonal is not zero, or if `mu > 0` while every row is zero.
    pub fn new(mu: f64, matrix: [[f64; 4]; 4]) -> Result<Self, MutationError> {
        check_rate(mu)?;
        let (row_totals, max_row_total) = validate_matrix(&matrix)?;
        if mu > 0.0 && max_row_total <= 0.0 {
            return Err(MutationError::DegenerateMatrix);
        }
        Ok(Self {
            mu,
            matrix,
            row_totals,
            max_row_total,
            site_rates: None,
            max_site_rate: 1.0,
        })
    }

    /// Jukes-Cantor model: every substitution equally likely.
    pub fn jc69(mu: f64) -> Result<Self, MutationError> {
        let w = 1.0 / 3.0;
        Self::new(
            mu,
            [
                [0.0, w, w, w],
                [w, 0.0, w, w],
                [w, w, 0.0, w],
                [w, w, w, 0.0],
            ],
        )
    }

    /// Kimura two-parameter model with transition/transversion ratio `kappa`.
    ///
    /// Rows are normalized to one, so `mu` stays the per-site rate.
    pub fn k2p(mu: f64, kappa: f64) -> Result<Self, MutationError> {
        check_rate(kappa)?;
        let norm = kappa + 2.0;
        let mut matrix = [[0.0; 4]; 4];
        for from in Nucleotide::ALL {
            for to in Nucleotide::ALL {
                if from != to {
                    let weight = if from.is_transition_to(to) { kappa } else { 1.0 };
                    matrix[from.to_index() as usize][to.to_index() as usize] = weight / norm;
                }
            }
        }
        Self::new(mu, matrix)
    }

    /// Attach per-site rate multipliers.
    ///
    /// The vector length must match the sequences this model is applied to;
    /// this is checked on every call.
    pub fn with_site_rates(mut self, rates: Vec<f64>) -> Result<Self, MutationError> {
        let mut max = 0.0f64;
        for &rate in &rates {
            check_rate(rate)?;
            max = max.max(rate);
        }
        if self.mu > 0.0 && max <= 0.0 {
            return Err(MutationError::DegenerateMatrix);
        }
        self.site_rates = Some(rates.into());
        self.max_site_rate = max;
        Ok(self)
    }

    /// Replace the substitution matrix and recompute the memoized row totals.
    pub fn set_substitution_matrix(&mut self, matrix: [[f64; 4]; 4]) -> Result<(), MutationError> {
        let (row_totals, max_row_total) = validate_matrix(&matrix)?;
        if self.mu > 0.0 && max_row_total <= 0.0 {
            return Err(MutationError::DegenerateMatrix);
        }
        self.matrix = matrix;
        self.row_totals = row_totals;
        self.max_row_total = max_row_total;
        Ok(())
    }

    /// Per-site mutation rate.
    #[inline]
    pub fn mu(&self) -> f64 {
        self.mu
    }

    /// The substitution weight matrix.
    pub fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.matrix
    }

    /// Sum of the outgoing weights of `base`.
    #[inline]
    pub fn row_total(&self, base: Nucleotide) -> f64 {
        self.row_totals[base.to_index() as usize]
    }

    /// Largest row total over all bases.
    #[inline]
    pub fn max_row_total(&self) -> f64 {
        self.max_row_total
    }

    /// Per-site rate multipliers, if any.
    pub fn site_rates(&self) -> Option<&[f64]> {
        self.site_rates.as_deref()
    }

    /// Apply one generation of mutation to `sequence`.
    ///
    /// Returns the number of mutation events applied. If site selection
    /// gives up, every event of this call is undone before the error is
    /// returned, so the sequence is left as it was.
    pub fn mutate<R: Rng + ?Sized>(
        &self,
        sequence: &mut Sequence,
        rng: &mut R,
    ) -> Result<usize, MutationError> {
        self.check_site_rates(sequence.len())?;
        let events = self.draw_event_count(sequence.len(), rng);
        let mut log = Vec::with_capacity(events);
        self.apply_events(sequence, events, &mut log, rng)?;
        Ok(events)
    }

    /// Apply one generation of mutation and score it incrementally.
    ///
    /// Returns the log-fitness delta computed by `site_model`, `0.0` when no
    /// event happened, or NaN when the site model cannot attribute the delta
    /// locally and the caller must recompute fitness from scratch. Failure
    /// leaves the sequence untouched, as in [`mutate`](Self::mutate).
    pub fn mutate_and_score_delta<R: Rng + ?Sized>(
        &self,
        sequence: &mut Sequence,
        master: &Sequence,
        site_model: &dyn SiteFitnessModel,
        rng: &mut R,
    ) -> Result<f64, MutationError> {
        if sequence.len() != master.len() {
            return Err(MutationError::LengthMismatch {
                sequence: sequence.len(),
                reference: master.len(),
            });
        }
        self.check_site_rates(sequence.len())?;

        let events = self.draw_event_count(sequence.len(), rng);
        if events == 0 {
            return Ok(0.0);
        }

        let mut log = Vec::with_capacity(events);
        self.apply_events(sequence, events, &mut log, rng)?;
        let (sites, originals): (Vec<usize>, Vec<Nucleotide>) = log.into_iter().unzip();
        Ok(site_model.fitness_delta(&sites, &originals, sequence, master))
    }

    /// Apply `events` substitutions, recording `(site, original)` for each.
    fn apply_events<R: Rng + ?Sized>(
        &self,
        sequence: &mut Sequence,
        events: usize,
        log: &mut Vec<(usize, Nucleotide)>,
        rng: &mut R,
    ) -> Result<(), MutationError> {
        for _ in 0..events {
            let site = match self.select_site(sequence, rng) {
                Ok(site) => site,
                Err(err) => {
                    for &(site, original) in log.iter().rev() {
                        sequence.set(site, original);
                    }
                    log.clear();
                    return Err(err);
                }
            };
            let from = sequence.get(site);
            let to = self.select_destination(from, rng);
            sequence.set(site, to);
            log.push((site, from));
        }
        Ok(())
    }

    fn check_site_rates(&self, len: usize) -> Result<(), MutationError> {
        match &self.site_rates {
            Some(rates) if rates.len() != len => Err(MutationError::LengthMismatch {
                sequence: len,
                reference: rates.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Draw the number of events for a sequence of `len` sites.
    fn draw_event_count<R: Rng + ?Sized>(&self, len: usize, rng: &mut R) -> usize {
        let expected = self.mu * len as f64;
        if expected <= 0.0 {
            return 0;
        }
        match Poisson::new(expected) {
            Ok(poisson) => poisson.sample(rng) as usize,
            Err(_) => 0,
        }
    }

    /// Two-stage rejection sampling of a site proportional to its rate.
    fn select_site<R: Rng + ?Sized>(
        &self,
        sequence: &Sequence,
        rng: &mut R,
    ) -> Result<usize, MutationError> {
        let ceiling = self.max_row_total * self.max_site_rate;
        for _ in 0..MAX_REJECTIONS {
            let site = rng.random_range(0..sequence.len());
            let r: f64 = rng.random();
            let multiplier = self.site_rates.as_ref().map_or(1.0, |rates| rates[site]);
            let site_total = self.row_total(sequence.get(site)) * multiplier;
            if r * ceiling < site_total {
                return Ok(site);
            }
        }
        Err(MutationError::RejectionBoundExceeded {
            iterations: MAX_REJECTIONS,
        })
    }

    /// Pick the destination base from the row of `from`.
    fn select_destination<R: Rng + ?Sized>(&self, from: Nucleotide, rng: &mut R) -> Nucleotide {
        let row = &self.matrix[from.to_index() as usize];
        let r = rng.random::<f64>() * self.row_total(from);

        let mut cumulative = 0.0;
        let mut fallback = from;
        for to in Nucleotide::ALL {
            let weight = row[to.to_index() as usize];
            if weight <= 0.0 {
                continue;
            }
            cumulative += weight;
            fallback = to;
            if r < cumulative {
                return to;
            }
        }

        // Rounding can leave r just above the final cumulative sum.
        fallback
    }
}

#[inline]
fn check_rate(rate: f64) -> Result<(), MutationError> {
    if rate.is_finite() && rate >= 0.0 {
        Ok(())
    } else {
        Err(MutationError::InvalidMutationRate(rate))
    }
}

fn validate_matrix(matrix: &[[f64; 4]; 4]) -> Result<([f64; 4], f64), MutationError> {
    let mut totals = [0.0; 4];
    for (i, row) in matrix.iter().enumerate() {
        if row[i] != 0.0 {
            return Err(MutationError::InvalidMutationRate(row[i]));
        }
        for &weight in row {
            check_rate(weight)?;
        }
        totals[i] = row.iter().sum();
    }
    let max = totals.iter().fold(0.0f64, |a, &b| a.max(b));
    Ok((totals, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolution::IndependentSites;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;
    use std::str::FromStr;

    #[test]
    fn test_jc69_row_totals() {
        let model = MutationModel::jc69(0.01).unwrap();
        for base in Nucleotide::ALL {
            assert!((model.row_total(base) - 1.0).abs() < 1e-12);
        }
        assert!((model.max_row_total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_k2p_favours_transitions() {
        let model = MutationModel::k2p(0.01, 4.0).unwrap();
        let m = model.matrix();
        let (a, c, g) = (0, 1, 2);
        assert!(m[a][g] > m[a][c]);
        assert!((model.row_total(Nucleotide::A) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(MutationModel::jc69(-0.1).is_err());
        assert!(MutationModel::jc69(f64::NAN).is_err());

        let mut diag = [[0.0; 4]; 4];
        diag[1][1] = 0.5;
        assert!(MutationModel::new(0.1, diag).is_err());

        assert_eq!(
            MutationModel::new(0.1, [[0.0; 4]; 4]).unwrap_err(),
            MutationError::DegenerateMatrix
        );
        // A zero matrix is fine when nothing ever mutates.
        assert!(MutationModel::new(0.0, [[0.0; 4]; 4]).is_ok());
    }

    #[test]
    fn test_zero_rate_leaves_sequence_untouched() {
        let model = MutationModel::jc69(0.0).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mut seq = Sequence::from_str("ACGTACGT").unwrap();

        assert_eq!(model.mutate(&mut seq, &mut rng).unwrap(), 0);
        assert_eq!(seq.to_string(), "ACGTACGT");
    }

    #[test]
    fn test_mutation_count_matches_poisson_mean() {
        let model = MutationModel::jc69(0.01).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let mut total = 0;
        for _ in 0..200 {
            let mut seq = Sequence::uniform(Nucleotide::A, 1000);
            total += model.mutate(&mut seq, &mut rng).unwrap();
        }
        // Expected 10 events per sequence.
        let mean = total as f64 / 200.0;
        assert!((mean - 10.0).abs() < 1.5, "mean events {mean}");
    }

    #[test]
    fn test_substitutions_never_keep_the_base() {
        let model = MutationModel::jc69(1.0).unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        for _ in 0..500 {
            let to = model.select_destination(Nucleotide::G, &mut rng);
            assert_ne!(to, Nucleotide::G);
        }
    }

    #[test]
    fn test_site_selection_follows_row_totals() {
        // Only A can mutate, so every accepted site must hold an A.
        let mut matrix = [[0.0; 4]; 4];
        matrix[0] = [0.0, 1.0, 0.0, 0.0];
        let model = MutationModel::new(0.5, matrix).unwrap();
        let seq = Sequence::from_str("CCCCCCCACCCCCCCC").unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(11);

        for _ in 0..20 {
            let site = model.select_site(&seq, &mut rng).unwrap();
            assert_eq!(site, 7);
        }
    }

    #[test]
    fn test_rejection_bound_reports_error() {
        // Only A can mutate but the sequence holds none.
        let mut matrix = [[0.0; 4]; 4];
        matrix[0] = [0.0, 1.0, 0.0, 0.0];
        let model = MutationModel::new(1.0, matrix).unwrap();
        let mut seq = Sequence::uniform(Nucleotide::T, 50);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(5);

        let err = model.mutate(&mut seq, &mut rng).unwrap_err();
        assert_eq!(
            err,
            MutationError::RejectionBoundExceeded {
                iterations: MAX_REJECTIONS
            }
        );
    }

    #[test]
    fn test_failed_generation_is_undone() {
        // A single A: the first event mutates it away, later events find
        // nothing mutable and the whole call is rolled back.
        let mut matrix = [[0.0; 4]; 4];
        matrix[0] = [0.0, 1.0, 0.0, 0.0];
        let model = MutationModel::new(2.0, matrix).unwrap();
        let original = Sequence::from_str("TTTTATTTTT").unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);

        for _ in 0..20 {
            let mut seq = original.clone();
            if model.mutate(&mut seq, &mut rng).is_err() {
                assert_eq!(seq, original);
            }
        }
    }

    #[test]
    fn test_site_rates_restrict_mutable_sites() {
        let mut rates = vec![0.0; 100];
        rates[10] = 1.0;
        rates[90] = 1.0;
        let model = MutationModel::jc69(0.05)
            .unwrap()
            .with_site_rates(rates)
            .unwrap();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(9);
        let original = Sequence::uniform(Nucleotide::C, 100);
        let mut seq = original.clone();
        for _ in 0..20 {
            model.mutate(&mut seq, &mut rng).unwrap();
        }
        for site in 0..100 {
            if site != 10 && site != 90 {
                assert_eq!(seq.get(site), Nucleotide::C);
            }
        }

        let mut short = Sequence::uniform(Nucleotide::C, 99);
        assert!(matches!(
            model.mutate(&mut short, &mut rng),
            Err(MutationError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_set_substitution_matrix_recomputes_totals() {
        let mut model = MutationModel::jc69(0.1).unwrap();
        let mut matrix = [[0.0; 4]; 4];
        matrix[2] = [0.5, 0.5, 0.0, 1.0];
        model.set_substitution_matrix(matrix).unwrap();
        assert_eq!(model.row_total(Nucleotide::G), 2.0);
        assert_eq!(model.row_total(Nucleotide::A), 0.0);
        assert_eq!(model.max_row_total(), 2.0);
    }

    #[test]
    fn test_delta_tracks_full_recompute() {
        let model = MutationModel::jc69(0.01).unwrap();
        let sites = IndependentSites::uniform(500, 0.02).unwrap();
        let master = Sequence::uniform(Nucleotide::A, 500);
        let mut seq = master.clone();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(21);

        let mut log_fitness = 0.0;
        for _ in 0..50 {
            let delta = model
                .mutate_and_score_delta(&mut seq, &master, &sites, &mut rng)
                .unwrap();
            assert!(!delta.is_nan());
            log_fitness += delta;
        }
        let full = sites.recompute_fitness(&seq, &master);
        assert!((log_fitness.exp() - full).abs() < 1e-9);
    }

    #[test]
    fn test_mutate_deterministic_for_seed() {
        let model = MutationModel::k2p(0.02, 2.0).unwrap();
        let mut a = Sequence::uniform(Nucleotide::A, 300);
        let mut b = a.clone();
        let mut rng1 = Xoshiro256PlusPlus::seed_from_u64(123);
        let mut rng2 = Xoshiro256PlusPlus::seed_from_u64(123);
        for _ in 0..10 {
            model.mutate(&mut a, &mut rng1).unwrap();
            model.mutate(&mut b, &mut rng2).unwrap();
        }
        assert_eq!(a, b);
    }
}
