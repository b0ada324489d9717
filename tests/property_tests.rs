//! Property-based tests for wfgen.
//!
//! Uses proptest to verify invariants of sequences and incremental scoring.

use std::sync::Arc;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use wfgen::base::{Nucleotide, Sequence};
use wfgen::evolution::{
    FitnessProvider, IndependentSites, MutationModel, SequenceProvider, SiteFitnessModel,
};
use wfgen::simulation::{DemographicModel, SizePolicy};

fn nucleotides(len: std::ops::Range<usize>) -> impl Strategy<Value = Vec<Nucleotide>> {
    prop::collection::vec((0u8..4).prop_map(|i| Nucleotide::ALL[i as usize]), len)
}

proptest! {
    #[test]
    fn sequence_clone_is_independent(bases in nucleotides(1..200), site in any::<prop::sample::Index>()) {
        let original = Sequence::from_nucleotides(&bases);
        let mut copy = original.clone();
        prop_assert_eq!(&copy, &original);

        let i = site.index(bases.len());
        let flipped = Nucleotide::ALL[(bases[i].to_index() as usize + 1) % 4];
        copy.set(i, flipped);
        prop_assert_eq!(original.get(i), bases[i]);
        prop_assert_eq!(copy.get(i), flipped);
        prop_assert_eq!(original.to_nucleotides(), bases);
    }

    #[test]
    fn sequence_text_round_trip(bases in nucleotides(1..200)) {
        let seq = Sequence::from_nucleotides(&bases);
        let parsed: Sequence = seq.to_string().parse().unwrap();
        prop_assert_eq!(parsed, seq);
    }

    #[test]
    fn incremental_fitness_matches_full_recompute(
        master in nucleotides(30..120),
        effect in 0.0f64..0.5,
        seed in any::<u64>(),
        generations in 1usize..40,
    ) {
        let len = master.len();
        let master = Arc::new(Sequence::from_nucleotides(&master));
        let mutation = Arc::new(MutationModel::jc69(0.02).unwrap());
        let model: Arc<dyn SiteFitnessModel> = Arc::new(IndependentSites::uniform(len, effect).unwrap());
        let mut provider = SequenceProvider::new(
            (*master).clone(),
            Arc::clone(&master),
            mutation,
            Some(Arc::clone(&model)),
        )
        .unwrap();

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        for _ in 0..generations {
            provider.mutate(&mut rng).unwrap();
            let full = model.recompute_fitness(provider.sequence(), &master);
            prop_assert!((provider.fitness() - full).abs() < 1e-9);
        }
    }

    #[test]
    fn size_policies_never_return_zero(
        base_size in 1usize..1000,
        rate in -1.0f64..0.1,
        generation in 0usize..10_000,
    ) {
        let policy = SizePolicy::ExponentialGrowth {
            base_size,
            rate,
            period: None,
            delay: 0,
            max_generation: Some(100),
        };
        prop_assert!(policy.size_at(generation) >= 1);
        let model = DemographicModel::Single { policy };
        prop_assert!(model.validate().is_ok());
    }
}
