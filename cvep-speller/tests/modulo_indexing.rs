mod common;

use proptest::prelude::*;

use cvep_core::TrialOutcome;
use cvep_speller::PresentationConfig;

use common::harness;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn shown_state_is_code_at_frame_mod_len(
        a in prop::collection::vec(0u8..3, 1..8),
        b in prop::collection::vec(0u8..3, 1..8),
        frames in 0u64..40,
    ) {
        let mut h = harness(PresentationConfig::default(), None);
        let duration = frames as f64 / 60.0;
        let outcome = h
            .scheduler
            .present(vec![("A", a.clone()), ("B", b.clone())], Some(duration), None, None)
            .unwrap();

        prop_assert_eq!(outcome, TrialOutcome::Completed);
        prop_assert_eq!(h.presents(), frames + 1);

        let shown_a = h.shown(0);
        let shown_b = h.shown(1);
        for i in 0..frames as usize {
            prop_assert_eq!(shown_a[i], Some(a[i % a.len()]));
            prop_assert_eq!(shown_b[i], Some(b[i % b.len()]));
        }
    }
}
