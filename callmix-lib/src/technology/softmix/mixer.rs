//! Softmix mixing thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::channel::SoftmixChannel;
use crate::alert::Alert;
use crate::audio::saturate::{accumulate, mix_minus};
use crate::config::SoftmixSettings;

/// Membership and mixing parameters shared with the instance.
pub(super) struct Members {
    pub(super) channels: Vec<Arc<SoftmixChannel>>,
    pub(super) rate: u32,
    pub(super) interval_ms: u32,
}

/// State shared between a softmix instance and its thread.
pub(super) struct SoftmixShared {
    pub(super) members: Mutex<Members>,
    pub(super) wake: Alert,
    pub(super) stop: AtomicBool,
    pub(super) running: Arc<AtomicBool>,
}

/// Captured at spawn time and moved into the mixing thread.
pub(super) struct MixerContext {
    pub(super) shared: Arc<SoftmixShared>,
    pub(super) talk: SoftmixSettings,
    pub(super) bridge_id: String,
}

/// Keeps `running` in sync with the mixing thread's lifetime.
struct MixerThreadGuard {
    running: Arc<AtomicBool>,
}

impl MixerThreadGuard {
    fn new(running: Arc<AtomicBool>) -> Self {
        running.store(true, Ordering::Relaxed);
        Self { running }
    }
}

impl Drop for MixerThreadGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// Mix every interval until asked to stop.
pub(super) fn run_mixing_thread(context: MixerContext) {
    let _guard = MixerThreadGuard::new(context.shared.running.clone());
    let shared = &context.shared;
    log::debug!("softmix thread for bridge {} started", context.bridge_id);

    #[cfg(feature = "debug")]
    let mut avg_mix_time_ms = 0.0_f64;
    #[cfg(feature = "debug")]
    let mut max_mix_time_ms = 0.0_f64;
    #[cfg(feature = "debug")]
    let mut ticks = 0_u64;

    let mut last_tick = Instant::now();
    loop {
        let seen = shared.wake.generation();
        if shared.stop.load(Ordering::Acquire) {
            break;
        }
        let (channels, rate, interval_ms) = {
            let members = shared.members.lock().unwrap();
            (members.channels.clone(), members.rate, members.interval_ms)
        };
        let interval = Duration::from_millis(interval_ms as u64);
        let deadline = last_tick + interval;
        let now = Instant::now();
        if now < deadline {
            // Membership and reconfiguration changes land here; re-read them.
            shared.wake.wait_since(seen, Some(deadline - now));
            continue;
        }

        #[cfg(feature = "debug")]
        let mix_start = Instant::now();
        let samples = (rate as usize * interval_ms as usize) / 1000;
        mix_tick(&channels, samples);
        if context.talk.talk_detection {
            detect_talking(&channels, interval_ms as u64, &context.talk);
        }
        #[cfg(feature = "debug")]
        {
            let mix_time_ms = mix_start.elapsed().as_secs_f64() * 1000.0;
            avg_mix_time_ms = if avg_mix_time_ms == 0.0 {
                mix_time_ms
            } else {
                (avg_mix_time_ms * 0.9) + (mix_time_ms * 0.1)
            };
            max_mix_time_ms = max_mix_time_ms.max(mix_time_ms);
            ticks += 1;
            if ticks % 250 == 0 {
                log::info!(
                    "softmix bridge {}: {} channels @ {}Hz, mix avg {:.3}ms max {:.3}ms",
                    context.bridge_id,
                    channels.len(),
                    rate,
                    avg_mix_time_ms,
                    max_mix_time_ms
                );
            }
        }

        last_tick = if deadline + interval < now {
            log::debug!("softmix bridge {} fell behind, resynchronising", context.bridge_id);
            now
        } else {
            deadline
        };
    }
    log::debug!("softmix thread for bridge {} stopped", context.bridge_id);
}

/// One mixing pass.
///
/// Every non-suspended channel with a full interval queued contributes it to
/// the mix. Each non-suspended channel then receives the mix minus its own
/// contribution, saturated once, and its participant thread is woken to
/// write it.
pub(super) fn mix_tick(channels: &[Arc<SoftmixChannel>], samples: usize) {
    let mut mixed = vec![0i32; samples];
    for channel in channels {
        let mut state = channel.lock();
        state.have_audio = false;
        if state.suspended {
            continue;
        }
        let state = &mut *state;
        state.our_buf.resize(samples, 0);
        if state.factory.available() >= samples {
            state.factory.read(&mut state.our_buf);
            accumulate(&mut mixed, &state.our_buf);
            state.have_audio = true;
        }
    }

    for channel in channels {
        {
            let mut state = channel.lock();
            if state.suspended {
                continue;
            }
            let state = &mut *state;
            let own = state.have_audio.then_some(state.our_buf.as_slice());
            mix_minus(&mixed, own, &mut state.final_buf);
            state.have_frame = true;
        }
        channel.notify();
    }
}

/// Update talk detection and tell participants whose state changed.
fn detect_talking(channels: &[Arc<SoftmixChannel>], interval_ms: u64, settings: &SoftmixSettings) {
    let mut changes = Vec::new();
    for channel in channels {
        let mut state = channel.lock();
        if state.suspended {
            continue;
        }
        let state = &mut *state;
        let heard = state.have_audio.then_some(state.our_buf.as_slice());
        if let Some(talking) = state.talk.update(heard, interval_ms, settings) {
            changes.push((channel.clone(), talking));
        }
    }
    for (channel, talking) in changes {
        if let Some(bridge_channel) = channel.bridge_channel() {
            bridge_channel.notify_talking(talking);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{default_translation, Frame};
    use std::sync::Weak;

    fn member(id: u64) -> Arc<SoftmixChannel> {
        Arc::new(SoftmixChannel::with_parts(
            id,
            Weak::new(),
            Arc::new(Alert::new()),
            8000,
            default_translation(),
        ))
    }

    fn output(channel: &SoftmixChannel) -> Vec<i16> {
        channel.take_output().expect("mixed frame").linear().unwrap().to_vec()
    }

    #[test]
    fn each_party_hears_everyone_but_itself() {
        let a = member(1);
        let b = member(2);
        let c = member(3);
        a.feed(&Frame::voice(8000, vec![1000; 160]));
        b.feed(&Frame::voice(8000, vec![3000; 160]));
        let channels = vec![a.clone(), b.clone(), c.clone()];
        mix_tick(&channels, 160);

        assert!(output(&a).iter().all(|s| *s == 3000));
        assert!(output(&b).iter().all(|s| *s == 1000));
        assert!(output(&c).iter().all(|s| *s == 4000));
    }

    #[test]
    fn lone_talker_hears_silence() {
        let channels: Vec<_> = (1..=4).map(member).collect();
        channels[0].feed(&Frame::voice(8000, vec![2500; 160]));
        mix_tick(&channels, 160);
        assert!(output(&channels[0]).iter().all(|s| *s == 0));
        for other in &channels[1..] {
            assert!(output(other).iter().all(|s| *s == 2500));
        }
    }

    #[test]
    fn short_input_waits_for_a_full_interval() {
        let a = member(1);
        let b = member(2);
        a.feed(&Frame::voice(8000, vec![500; 80]));
        let channels = vec![a.clone(), b.clone()];
        mix_tick(&channels, 160);
        assert!(output(&b).iter().all(|s| *s == 0));

        a.feed(&Frame::voice(8000, vec![500; 80]));
        mix_tick(&channels, 160);
        assert!(output(&b).iter().all(|s| *s == 500));
    }

    #[test]
    fn suspended_channels_neither_feed_nor_receive() {
        let a = member(1);
        let b = member(2);
        a.feed(&Frame::voice(8000, vec![700; 160]));
        a.lock().suspended = true;
        let channels = vec![a.clone(), b.clone()];
        mix_tick(&channels, 160);
        assert!(a.take_output().is_none());
        assert!(output(&b).iter().all(|s| *s == 0));
    }

    #[test]
    fn loud_mixes_saturate() {
        let a = member(1);
        let b = member(2);
        let c = member(3);
        a.feed(&Frame::voice(8000, vec![30000; 160]));
        b.feed(&Frame::voice(8000, vec![30000; 160]));
        mix_tick(&[a.clone(), b.clone(), c.clone()], 160);
        assert!(output(&c).iter().all(|s| *s == i16::MAX));
        assert!(output(&a).iter().all(|s| *s == 30000));
        assert!(output(&b).iter().all(|s| *s == 30000));
    }

    #[test]
    fn clipped_mix_still_removes_the_listener_exactly() {
        let a = member(1);
        let b = member(2);
        let c = member(3);
        a.feed(&Frame::voice(8000, vec![-25000; 160]));
        b.feed(&Frame::voice(8000, vec![-25000; 160]));
        c.feed(&Frame::voice(8000, vec![4000; 160]));
        mix_tick(&[a.clone(), b.clone(), c.clone()], 160);
        assert!(output(&a).iter().all(|s| *s == -21000));
        assert!(output(&b).iter().all(|s| *s == -21000));
        assert!(output(&c).iter().all(|s| *s == i16::MIN));
    }

    #[test]
    fn reconfigure_wakes_a_sleeping_mixer() {
        let a = member(1);
        let b = member(2);
        a.feed(&Frame::voice(8000, vec![900; 160 * 20]));
        let shared = Arc::new(SoftmixShared {
            members: Mutex::new(Members {
                channels: vec![a.clone(), b.clone()],
                rate: 8000,
                interval_ms: 60_000,
            }),
            wake: Alert::new(),
            stop: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
        });
        let context = MixerContext {
            shared: shared.clone(),
            talk: SoftmixSettings::default(),
            bridge_id: "wake-test".to_string(),
        };
        let handle = std::thread::spawn(move || run_mixing_thread(context));
        std::thread::sleep(Duration::from_millis(30));
        assert!(b.take_output().is_none());

        shared.members.lock().unwrap().interval_ms = 20;
        shared.wake.notify();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut heard = None;
        while heard.is_none() && Instant::now() < deadline {
            heard = b.take_output();
            std::thread::sleep(Duration::from_millis(2));
        }

        shared.stop.store(true, Ordering::Release);
        shared.wake.notify();
        handle.join().unwrap();
        let heard = heard.expect("mix after reconfigure");
        assert!(heard.linear().unwrap().iter().all(|s| *s == 900));
    }
}
