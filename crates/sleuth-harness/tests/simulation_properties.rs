//! Property-based tests over random intent and delivery interleavings.
//!
//! Each case boots a session against the fake backend, then applies a
//! generated sequence of steps: player intents, answers delivered in a
//! seeded order, pushes and clock advances.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use proptest::prelude::*;
use sleuth_core::{DropTarget, SelectionMode, SelectionState, SessionEvent, SessionView};
use sleuth_harness::{FakeServer, SimEnv, SimWorld};
use sleuth_proto::ApiRequest;

const GAME: u64 = 1;
const VIEWER: u64 = 1;

/// One step of a generated run.
#[derive(Debug, Clone)]
enum Step {
    /// Drop the hand card at this position (modulo hand size).
    Drop { slot: usize, action_zone: bool },
    /// Answer one pending call, picked by the seeded RNG.
    DeliverOne,
    /// Answer everything.
    DeliverAll,
    /// Push current server state.
    Push,
    /// Ask for a refetch.
    Refresh,
    /// Advance the clock.
    Advance { millis: u16 },
    /// Click a player.
    PickPlayer { player: u64 },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0usize..8, any::<bool>())
            .prop_map(|(slot, action_zone)| Step::Drop { slot, action_zone }),
        3 => Just(Step::DeliverOne),
        1 => Just(Step::DeliverAll),
        1 => Just(Step::Push),
        1 => Just(Step::Refresh),
        2 => (0u16..3000).prop_map(|millis| Step::Advance { millis }),
        1 => (1u64..4).prop_map(|player| Step::PickPlayer { player }),
    ]
}

fn apply(world: &mut SimWorld, step: &Step) {
    match *step {
        Step::Drop { slot, action_zone } => {
            let hand = world.view().private.map(|p| p.hand).unwrap_or_default();
            if hand.is_empty() {
                return;
            }
            let card_id = hand[slot % hand.len()].id;
            let target = if action_zone { DropTarget::ActionZone } else { DropTarget::DiscardPile };
            world.intent(SessionEvent::DropCard { card_id, target });
        },
        Step::DeliverOne => {
            let count = world.pending().count();
            if count > 0 {
                let index = world.env().pick(count);
                world.deliver(index).unwrap();
            }
        },
        Step::DeliverAll => {
            world.deliver_all().unwrap();
        },
        Step::Push => world.push_state().unwrap(),
        Step::Refresh => world.handle(SessionEvent::Refresh).unwrap(),
        Step::Advance { millis } => {
            world
                .advance(Duration::from_millis(u64::from(millis)), Duration::from_millis(250))
                .unwrap();
        },
        Step::PickPlayer { player } => {
            world.intent(SessionEvent::PickPlayer { player });
        },
    }
}

fn run(seed: u64, steps: &[Step], disgrace: bool) -> (SessionView, Vec<ApiRequest>) {
    let mut server = FakeServer::standard(GAME);
    server.set_disgrace(VIEWER, disgrace);
    let mut world = SimWorld::boot(SimEnv::with_seed(seed), server, VIEWER).unwrap();
    for step in steps {
        apply(&mut world, step);
    }
    (world.view(), world.issued().to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// PROPERTY: same seed and steps produce the same view and traffic.
    #[test]
    fn prop_runs_are_deterministic(
        seed in any::<u64>(),
        steps in prop::collection::vec(step_strategy(), 0..40),
    ) {
        let first = run(seed, &steps, false);
        let second = run(seed, &steps, false);
        prop_assert_eq!(first, second);
    }

    /// PROPERTY: in disgrace, at most one discard reaches the network while
    /// the viewer keeps the turn.
    #[test]
    fn prop_disgrace_discards_at_most_once(
        seed in any::<u64>(),
        steps in prop::collection::vec(step_strategy(), 0..60),
    ) {
        let (_, issued) = run(seed, &steps, true);
        let discards = issued.iter().filter(|r| matches!(r, ApiRequest::Discard { .. })).count();
        prop_assert!(discards <= 1, "{} discards in disgrace", discards);
    }

    /// PROPERTY: once loaded, a session never reports itself unloaded.
    #[test]
    fn prop_loaded_stays_loaded(
        seed in any::<u64>(),
        steps in prop::collection::vec(step_strategy(), 0..40),
    ) {
        let mut world =
            SimWorld::boot(SimEnv::with_seed(seed), FakeServer::standard(GAME), VIEWER).unwrap();
        for step in &steps {
            apply(&mut world, step);
            prop_assert!(world.view().has_loaded_once);
        }
    }

    /// PROPERTY: a fired selection leaves nothing behind.
    #[test]
    fn prop_fired_selection_is_fully_cleared(
        tag in prop::sample::select(vec!["Point", "point", "POINT", "point your suspicions"]),
        target in 2u64..4,
    ) {
        let mut world =
            SimWorld::boot(SimEnv::new(), FakeServer::standard(GAME), VIEWER).unwrap();
        let armed = world.intent(SessionEvent::ArmSelection {
            mode: SelectionMode::SelectOtherPlayer,
            qualifier: Some(tag.to_string()),
        });
        prop_assert!(armed);
        let picked = world.intent(SessionEvent::PickPlayer { player: target });
        prop_assert!(picked);
        prop_assert_eq!(world.view().selection, SelectionState::default());
        prop_assert_eq!(
            world.issued().last(),
            Some(&ApiRequest::VoteSuspicion { suspect: target })
        );
    }
}
