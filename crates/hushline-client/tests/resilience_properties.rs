//! Property tests for the per-peer resilience state machine.

use hushline_client::{FallbackPolicy, FetchDecision, KeyState, ResilienceLayer};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Step {
    Fetch { forced: bool },
    Found,
    Missing,
    Confirm,
    Disable,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<bool>().prop_map(|forced| Step::Fetch { forced }),
        Just(Step::Found),
        Just(Step::Missing),
        Just(Step::Confirm),
        Just(Step::Disable),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn fallback_is_never_entered_without_confirmation(
        threshold in 1u32..6,
        steps in prop::collection::vec(step(), 0..60),
    ) {
        let mut layer = ResilienceLayer::new(FallbackPolicy { failure_threshold: threshold });
        let peer = 7;
        let mut offers_this_streak = 0;
        let mut confirmed = false;

        for step in steps {
            match step {
                Step::Fetch { forced } => {
                    let failures = layer.failures(peer);
                    let pending = layer.state(peer) == KeyState::KeyFetchPending;
                    let decision = layer.begin_fetch(peer, forced);

                    let expected = if pending {
                        FetchDecision::AlreadyPending
                    } else if !forced && failures >= threshold {
                        FetchDecision::Suppressed
                    } else {
                        FetchDecision::Fetch
                    };
                    prop_assert_eq!(decision, expected);
                },
                Step::Found => {
                    layer.key_available(peer);
                    offers_this_streak = 0;
                    confirmed = false;
                    prop_assert_eq!(layer.failures(peer), 0);
                },
                Step::Missing => {
                    if layer.key_unavailable(peer) {
                        offers_this_streak += 1;
                        prop_assert_eq!(layer.failures(peer), threshold);
                    }
                    prop_assert!(offers_this_streak <= 1);
                },
                Step::Confirm => {
                    let result = layer.confirm_fallback(peer);
                    prop_assert_eq!(result.is_ok(), offers_this_streak == 1);
                    confirmed |= result.is_ok();
                },
                Step::Disable => {
                    layer.disable_fallback(peer);
                    confirmed = false;
                },
            }

            prop_assert_eq!(layer.is_fallback(peer), confirmed);
        }
    }
}
