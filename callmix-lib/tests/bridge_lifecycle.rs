mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use callmix_lib::audio::{Format, Frame, FrameKind};
use callmix_lib::bridge::{BuiltinFeature, HookAction, IntervalAction};
use callmix_lib::technology::Capabilities;
use callmix_lib::{Bridge, BridgeChannel, BridgeError, BridgeFeatures, BridgeFlags, ChannelState};

use common::{collect, core, is_dtmf, party, send_digits, wait_until};

const WAIT: Duration = Duration::from_secs(3);

#[test]
fn two_party_bridges_relay_audio() {
    for technology in ["multiplexed_bridge", "simple_bridge"] {
        let core = core();
        if technology == "simple_bridge" {
            core.suspend_technology("multiplexed_bridge").unwrap();
        }
        let bridge = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
        assert_eq!(bridge.technology_name(), technology);

        let (alice, alice_far) = party("SIP/alice");
        let (bob, bob_far) = party("SIP/bob");
        let alice_bc = bridge.impart(alice.clone(), None, BridgeFeatures::new()).unwrap();
        let bob_bc = bridge.impart(bob.clone(), None, BridgeFeatures::new()).unwrap();

        alice_far.send(Frame::voice(8000, vec![42; 160]));
        let heard = collect(&bob_far, 1, |frame| frame.is_voice());
        assert_eq!(heard.len(), 1, "{} relayed nothing", technology);
        assert!(heard[0].linear().unwrap().iter().all(|s| *s == 42));

        bob_far.send(Frame::voice(8000, vec![-7; 160]));
        let heard = collect(&alice_far, 1, |frame| frame.is_voice());
        assert!(heard[0].linear().unwrap().iter().all(|s| *s == -7));

        assert_eq!(bridge.depart(&alice_bc).unwrap(), ChannelState::Depart);
        assert_eq!(bridge.depart(&bob_bc).unwrap(), ChannelState::Depart);
        assert!(!alice.is_hung_up());
        assert!(!bob.is_hung_up());
        assert_eq!(bridge.num_channels(), 0);
    }
}

#[test]
fn pushing_into_an_emptied_bridge_fails() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::DISSOLVE_EMPTY).unwrap();
    let (alice, _alice_far) = party("SIP/alice");
    let alice_bc = bridge.impart(alice, None, BridgeFeatures::new()).unwrap();
    bridge.depart(&alice_bc).unwrap();
    assert!(bridge.is_dissolved());

    let (bob, _bob_far) = party("SIP/bob");
    let result = bridge.impart(bob.clone(), None, BridgeFeatures::new());
    assert!(matches!(result, Err(BridgeError::Dissolved(_))));
    assert!(!bob.is_hung_up());
    assert!(core.find_bridge(bridge.id()).is_none());
}

#[test]
fn rejected_join_leaves_channel_untouched() {
    let core = core();
    core.suspend_technology("multiplexed_bridge").unwrap();
    let bridge = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    let joins = Arc::new(AtomicUsize::new(0));
    let counted = joins.clone();
    bridge.update_features(|features| {
        features.add_join_hook(move |_: &Arc<BridgeChannel>| {
            counted.fetch_add(1, Ordering::SeqCst);
            HookAction::Keep
        })
    });

    let (alice, _a) = party("SIP/alice");
    let (bob, _b) = party("SIP/bob");
    let (carol, _c) = party("SIP/carol");
    let alice_bc = bridge.impart(alice, None, BridgeFeatures::new()).unwrap();
    let bob_bc = bridge.impart(bob, None, BridgeFeatures::new()).unwrap();
    let result = bridge.impart(carol.clone(), None, BridgeFeatures::new());

    assert!(matches!(result, Err(BridgeError::Rejected { .. })));
    assert_eq!(bridge.num_channels(), 2);
    assert_eq!(joins.load(Ordering::SeqCst), 2);
    assert_eq!(carol.read_format(), Format::slin(8000));
    assert!(!carol.is_hung_up());

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&bob_bc).unwrap();
}

#[test]
fn smart_bridge_follows_party_size() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::SMART).unwrap();
    let (alice, _a) = party("SIP/alice");
    let (bob, _b) = party("SIP/bob");
    let (carol, _c) = party("SIP/carol");

    let alice_bc = bridge.impart(alice, None, BridgeFeatures::new()).unwrap();
    let bob_bc = bridge.impart(bob, None, BridgeFeatures::new()).unwrap();
    assert_eq!(bridge.technology_name(), "multiplexed_bridge");

    let carol_bc = bridge.impart(carol, None, BridgeFeatures::new()).unwrap();
    assert_eq!(bridge.technology_name(), "softmix");
    assert!(bridge.capabilities().contains(Capabilities::MULTI_MIX));

    bridge.depart(&carol_bc).unwrap();
    assert_eq!(bridge.technology_name(), "multiplexed_bridge");
    assert_eq!(bridge.num_channels(), 2);

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&bob_bc).unwrap();
}

#[test]
fn merge_moves_every_participant() {
    let core = core();
    let into = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let from = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::DISSOLVE_EMPTY).unwrap();
    let (alice, _a) = party("SIP/alice");
    let (bob, _b) = party("SIP/bob");
    let (carol, _c) = party("SIP/carol");
    let alice_bc = into.impart(alice, None, BridgeFeatures::new()).unwrap();
    let bob_bc = from.impart(bob.clone(), None, BridgeFeatures::new()).unwrap();
    let carol_bc = from.impart(carol, None, BridgeFeatures::new()).unwrap();

    into.merge(&from).unwrap();
    assert_eq!(into.num_channels(), 3);
    assert_eq!(from.num_channels(), 0);
    assert!(from.is_dissolved());
    assert!(Arc::ptr_eq(&bob_bc.bridge().unwrap(), &into));
    assert!(into.find(&bob).is_some());

    for bridge_channel in [&alice_bc, &bob_bc, &carol_bc] {
        assert_eq!(into.depart(bridge_channel).unwrap(), ChannelState::Depart);
    }
}

#[test]
fn merge_refuses_to_overfill_two_party_bridges() {
    let core = core();
    let into = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    let from = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    let (alice, _a) = party("SIP/alice");
    let (bob, _b) = party("SIP/bob");
    let (carol, _c) = party("SIP/carol");
    let alice_bc = into.impart(alice, None, BridgeFeatures::new()).unwrap();
    let bob_bc = into.impart(bob, None, BridgeFeatures::new()).unwrap();
    let carol_bc = from.impart(carol, None, BridgeFeatures::new()).unwrap();

    assert!(matches!(into.merge(&from), Err(BridgeError::MergeRefused { .. })));
    assert!(matches!(into.merge(&into), Err(BridgeError::MergeRefused { .. })));
    assert_eq!(from.num_channels(), 1);

    into.depart(&alice_bc).unwrap();
    into.depart(&bob_bc).unwrap();
    from.depart(&carol_bc).unwrap();
}

#[test]
fn dtmf_feature_runs_and_is_not_relayed() {
    let core = core();
    core.suspend_technology("multiplexed_bridge").unwrap();
    let bridge = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counted = fired.clone();
    let mut features = BridgeFeatures::new();
    features
        .add_dtmf_hook("*5", move |_: &Arc<BridgeChannel>| {
            counted.fetch_add(1, Ordering::SeqCst);
            HookAction::Keep
        })
        .unwrap();

    let (alice, alice_far) = party("SIP/alice");
    let (bob, bob_far) = party("SIP/bob");
    let alice_bc = bridge.impart(alice, None, features).unwrap();
    let bob_bc = bridge.impart(bob, None, BridgeFeatures::new()).unwrap();

    send_digits(&alice_far, "*5");
    assert!(wait_until(WAIT, || fired.load(Ordering::SeqCst) == 1));

    send_digits(&alice_far, "#");
    let relayed = collect(&bob_far, 2, is_dtmf);
    assert_eq!(relayed.len(), 2);
    assert_eq!(relayed[0].kind, FrameKind::DtmfBegin('#'));
    assert_eq!(relayed[1].kind, FrameKind::DtmfEnd('#'));

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&bob_bc).unwrap();
}

#[test]
fn unmatched_feature_digits_are_streamed_to_others() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let mut features = BridgeFeatures::new();
    features
        .add_dtmf_hook("*9", |_: &Arc<BridgeChannel>| HookAction::Keep)
        .unwrap();

    let (alice, alice_far) = party("SIP/alice");
    let (bob, bob_far) = party("SIP/bob");
    let alice_bc = bridge.impart(alice, None, features).unwrap();
    let bob_bc = bridge.impart(bob, None, BridgeFeatures::new()).unwrap();

    send_digits(&alice_far, "*1");
    let streamed = collect(&bob_far, 4, is_dtmf);
    let kinds: Vec<FrameKind> = streamed.into_iter().map(|frame| frame.kind).collect();
    assert_eq!(
        kinds,
        vec![
            FrameKind::DtmfBegin('*'),
            FrameKind::DtmfEnd('*'),
            FrameKind::DtmfBegin('1'),
            FrameKind::DtmfEnd('1'),
        ]
    );

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&bob_bc).unwrap();
}

#[test]
fn hangup_feature_dissolves_hangup_bridges() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::DISSOLVE_HANGUP).unwrap();
    let mut features = BridgeFeatures::new();
    features
        .enable_builtin(&core, BuiltinFeature::Hangup, None)
        .unwrap();
    let hangups = Arc::new(AtomicUsize::new(0));
    let counted = hangups.clone();
    features.add_hangup_hook(move |_: &Arc<BridgeChannel>| {
        counted.fetch_add(1, Ordering::SeqCst);
        HookAction::Keep
    });

    let (alice, alice_far) = party("SIP/alice");
    let (bob, bob_far) = party("SIP/bob");
    bridge.impart(alice, None, features).unwrap();
    bridge.impart(bob, None, BridgeFeatures::new()).unwrap();

    send_digits(&alice_far, "*");
    assert!(wait_until(WAIT, || alice_far.is_hung_up()));
    assert!(wait_until(WAIT, || bob_far.is_hung_up()));
    assert!(bridge.is_dissolved());
    assert_eq!(hangups.load(Ordering::SeqCst), 1);
    assert!(wait_until(WAIT, || bridge.num_channels() == 0));
}

#[test]
fn simultaneous_hangups_dissolve_once_and_eject_the_rest() {
    for _ in 0..10 {
        let core = core();
        let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::DISSOLVE_HANGUP).unwrap();
        let hangups = Arc::new(AtomicUsize::new(0));
        let leaves = Arc::new(AtomicUsize::new(0));

        let mut parties = Vec::new();
        for name in ["SIP/alice", "SIP/bob", "SIP/carol", "SIP/dave"] {
            let mut features = BridgeFeatures::new();
            let counted = hangups.clone();
            features.add_hangup_hook(move |_: &Arc<BridgeChannel>| {
                counted.fetch_add(1, Ordering::SeqCst);
                HookAction::Keep
            });
            let counted = leaves.clone();
            features.add_leave_hook(move |_: &Arc<BridgeChannel>| {
                counted.fetch_add(1, Ordering::SeqCst);
                HookAction::Keep
            });
            let (channel, far) = party(name);
            let bridge_channel = bridge.impart(channel, None, features).unwrap();
            parties.push((bridge_channel, far));
        }

        let barrier = Barrier::new(3);
        thread::scope(|scope| {
            for (_, far) in &parties[..3] {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    far.hangup();
                });
            }
        });

        let (dave, dave_far) = &parties[3];
        assert!(wait_until(WAIT, || dave_far.is_hung_up()));
        assert!(wait_until(WAIT, || bridge.num_channels() == 0));
        assert!(bridge.is_dissolved());
        assert_eq!(dave.state(), ChannelState::Hangup);
        assert!(wait_until(WAIT, || leaves.load(Ordering::SeqCst) == 4));
        let hung_up = hangups.load(Ordering::SeqCst);
        assert!((1..=3).contains(&hung_up), "{} hangup hooks ran", hung_up);
        assert!(matches!(
            bridge.impart(party("SIP/late").0, None, BridgeFeatures::new()),
            Err(BridgeError::Dissolved(_))
        ));
    }
}

#[test]
fn interval_hooks_fire_until_removed() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counted = ticks.clone();
    let mut features = BridgeFeatures::new();
    features
        .add_interval_hook(Duration::from_millis(20), move |_: &Arc<BridgeChannel>| {
            if counted.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                IntervalAction::Remove
            } else {
                IntervalAction::Keep
            }
        })
        .unwrap();

    let (alice, _alice_far) = party("SIP/alice");
    let alice_bc = bridge.impart(alice, None, features).unwrap();
    assert!(wait_until(WAIT, || ticks.load(Ordering::SeqCst) == 3));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert_eq!(alice_bc.features().hook_count(), 0);

    bridge.depart(&alice_bc).unwrap();
}

#[test]
fn suspend_tracks_active_count() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let (alice, _a) = party("SIP/alice");
    let (bob, _b) = party("SIP/bob");
    let alice_bc = bridge.impart(alice.clone(), None, BridgeFeatures::new()).unwrap();
    let bob_bc = bridge.impart(bob, None, BridgeFeatures::new()).unwrap();
    assert_eq!(bridge.num_active(), 2);

    bridge.suspend(&alice).unwrap();
    bridge.suspend(&alice).unwrap();
    assert_eq!(bridge.num_active(), 1);
    assert_eq!(bridge.num_channels(), 2);
    assert!(alice_bc.is_suspended());

    bridge.unsuspend(&alice).unwrap();
    assert_eq!(bridge.num_active(), 2);

    let (stranger, _s) = party("SIP/stranger");
    assert!(matches!(bridge.suspend(&stranger), Err(BridgeError::NotInBridge { .. })));

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&bob_bc).unwrap();
}

#[test]
fn swap_replaces_a_participant() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let (alice, _a) = party("SIP/alice");
    let (bob, bob_far) = party("SIP/bob");
    let (carol, _c) = party("SIP/carol");
    let alice_bc = bridge.impart(alice, None, BridgeFeatures::new()).unwrap();
    bridge.impart(bob.clone(), None, BridgeFeatures::new()).unwrap();
    let carol_bc = bridge.impart(carol, Some(&bob), BridgeFeatures::new()).unwrap();

    assert_eq!(bridge.num_channels(), 2);
    assert!(bridge.find(&bob).is_none());
    assert!(wait_until(WAIT, || bob_far.is_hung_up()));

    let (dave, _d) = party("SIP/dave");
    let result = bridge.impart(dave, Some(&bob), BridgeFeatures::new());
    assert!(matches!(result, Err(BridgeError::SwapNotWaiting(_))));

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&carol_bc).unwrap();
}

#[test]
fn remove_hangs_up_the_channel() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let (alice, alice_far) = party("SIP/alice");
    bridge.impart(alice.clone(), None, BridgeFeatures::new()).unwrap();
    bridge.remove(&alice).unwrap();
    assert!(wait_until(WAIT, || alice_far.is_hung_up()));
    assert!(wait_until(WAIT, || bridge.num_channels() == 0));
    assert!(bridge.remove(&alice).is_err());
}

#[test]
fn queued_callbacks_run_suspended_on_the_participant_thread() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let (alice, _a) = party("SIP/alice");
    let alice_bc = bridge.impart(alice, None, BridgeFeatures::new()).unwrap();

    let seen = Arc::new(AtomicUsize::new(0));
    let observed = seen.clone();
    let thread_name = Arc::new(std::sync::Mutex::new(String::new()));
    let name_slot = thread_name.clone();
    alice_bc.queue_callback(move |bridge_channel| {
        if bridge_channel.is_suspended() {
            observed.fetch_add(1, Ordering::SeqCst);
        }
        *name_slot.lock().unwrap() = std::thread::current().name().unwrap_or_default().to_string();
    });
    assert!(wait_until(WAIT, || !thread_name.lock().unwrap().is_empty()));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(*thread_name.lock().unwrap(), "bridge-SIP/alice");
    assert!(wait_until(WAIT, || !alice_bc.is_suspended()));

    bridge.depart(&alice_bc).unwrap();
}

#[test]
fn queued_frames_reach_everyone_else() {
    let core = core();
    core.suspend_technology("multiplexed_bridge").unwrap();
    let bridge = Bridge::new(&core, Capabilities::ONE_TO_ONE_MIX, BridgeFlags::empty()).unwrap();
    let (alice, alice_far) = party("SIP/alice");
    let (bob, bob_far) = party("SIP/bob");
    let alice_bc = bridge.impart(alice.clone(), None, BridgeFeatures::new()).unwrap();
    let bob_bc = bridge.impart(bob, None, BridgeFeatures::new()).unwrap();

    bridge.queue_everyone_else(Some(alice.as_ref()), &Frame::dtmf_end('7'));
    let frames = collect(&bob_far, 1, is_dtmf);
    assert_eq!(frames[0].kind, FrameKind::DtmfEnd('7'));
    assert!(alice_far.try_recv().is_none());

    bridge.depart(&alice_bc).unwrap();
    bridge.depart(&bob_bc).unwrap();
}

#[test]
fn departing_twice_is_an_error() {
    let core = core();
    let bridge = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let (alice, _a) = party("SIP/alice");
    let alice_bc = bridge.impart(alice, None, BridgeFeatures::new()).unwrap();
    bridge.depart(&alice_bc).unwrap();
    assert!(matches!(bridge.depart(&alice_bc), Err(BridgeError::NotInBridge { .. })));
}

#[test]
fn core_tracks_live_bridges() {
    let core = core();
    assert!(Bridge::check(&core, Capabilities::MULTI_MIX));
    let first = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    let second = Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()).unwrap();
    assert_eq!(core.bridges().len(), 2);
    assert!(core.find_bridge(first.id()).is_some());

    second.destroy();
    assert_eq!(core.bridges().len(), 1);
    drop(second);

    core.shutdown();
    assert!(first.is_dissolved());
    assert!(core.bridges().is_empty());
    assert!(!Bridge::check(&core, Capabilities::MULTI_MIX));
    assert!(matches!(
        Bridge::new(&core, Capabilities::MULTI_MIX, BridgeFlags::empty()),
        Err(BridgeError::NoTechnology(_))
    ));
}
