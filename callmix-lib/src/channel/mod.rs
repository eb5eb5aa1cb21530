//! Call legs as seen by the bridging core.
//!
//! A [`Channel`] is the core's side of a call leg: frames arriving from the
//! far end are read from it and frames for the far end are written to it.
//! Both directions run through the channel's audiohook list. The matching
//! [`ChannelEndpoint`] is the far side and is what tests and the companion
//! binary use to inject and collect media.

mod datastore;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::alert::Alert;
use crate::audio::{default_translation, ControlFrame, Format, Frame, FrameKind, TranslationFactory, Translator};
use crate::audiohook::{AudiohookList, Direction};
use crate::error::ChannelError;

pub use datastore::Datastores;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Result of a non-blocking channel read.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelRead {
    Frame(Frame),
    /// Nothing queued right now.
    Empty,
    /// The far end hung up.
    Hangup,
}

/// Result of waiting for a DTMF digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigitWait {
    Digit(char),
    Timeout,
    Hangup,
}

#[derive(Default)]
struct IoState {
    inbound: VecDeque<Frame>,
    /// Frames already read once and handed back; they skip the audiohooks.
    returned: VecDeque<Frame>,
    outbound: VecDeque<Frame>,
    hung_up: bool,
    waiter: Option<Arc<Alert>>,
}

/// Queues shared between a channel and its endpoint.
#[derive(Default)]
struct ChannelIo {
    state: Mutex<IoState>,
    inbound_ready: Condvar,
    outbound_ready: Condvar,
}

impl ChannelIo {
    fn wake_reader(&self, state: &IoState) {
        self.inbound_ready.notify_all();
        if let Some(waiter) = &state.waiter {
            waiter.notify();
        }
    }
}

struct TranslationPath {
    src: Format,
    dst: Format,
    translator: Box<dyn Translator>,
}

struct Formats {
    native: Format,
    read: Format,
    write: Format,
    read_path: Option<TranslationPath>,
    write_path: Option<TranslationPath>,
}

/// The core's view of one call leg.
pub struct Channel {
    id: u64,
    name: String,
    io: Arc<ChannelIo>,
    formats: Mutex<Formats>,
    audiohooks: Mutex<Option<AudiohookList>>,
    datastores: Datastores,
    roles: Mutex<HashMap<String, HashMap<String, String>>>,
    translation: Arc<dyn TranslationFactory>,
}

/// Far side of a [`Channel`].
pub struct ChannelEndpoint {
    io: Arc<ChannelIo>,
}

impl Channel {
    /// Create a channel speaking `native` together with its far end.
    pub fn pair(name: &str, native: Format) -> (Arc<Channel>, ChannelEndpoint) {
        Self::pair_with_translation(name, native, default_translation())
    }

    /// Like [`Channel::pair`] with a caller-supplied translation factory.
    pub fn pair_with_translation(
        name: &str,
        native: Format,
        translation: Arc<dyn TranslationFactory>,
    ) -> (Arc<Channel>, ChannelEndpoint) {
        let io = Arc::new(ChannelIo::default());
        let channel = Arc::new(Channel {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            io: io.clone(),
            formats: Mutex::new(Formats {
                native,
                read: native,
                write: native,
                read_path: None,
                write_path: None,
            }),
            audiohooks: Mutex::new(None),
            datastores: Datastores::new(),
            roles: Mutex::new(HashMap::new()),
            translation,
        });
        (channel, ChannelEndpoint { io })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn native_format(&self) -> Format {
        self.formats.lock().unwrap().native
    }

    pub fn read_format(&self) -> Format {
        self.formats.lock().unwrap().read
    }

    pub fn write_format(&self) -> Format {
        self.formats.lock().unwrap().write
    }

    /// Format frames returned by [`Channel::read`] are converted to.
    pub fn set_read_format(&self, format: Format) {
        let mut formats = self.formats.lock().unwrap();
        if formats.read != format {
            formats.read = format;
            formats.read_path = None;
        }
    }

    /// Format the bridge writes in; kept for restoring on leave.
    pub fn set_write_format(&self, format: Format) {
        let mut formats = self.formats.lock().unwrap();
        if formats.write != format {
            formats.write = format;
            formats.write_path = None;
        }
    }

    pub fn translation(&self) -> &Arc<dyn TranslationFactory> {
        &self.translation
    }

    pub fn datastores(&self) -> &Datastores {
        &self.datastores
    }

    pub fn is_hung_up(&self) -> bool {
        self.io.state.lock().unwrap().hung_up
    }

    /// Hang up from the core side.
    pub fn hangup(&self) {
        let mut state = self.io.state.lock().unwrap();
        if !state.hung_up {
            log::debug!("channel {} hung up", self.name);
            state.hung_up = true;
        }
        self.io.wake_reader(&state);
        self.io.outbound_ready.notify_all();
    }

    /// Alert notified whenever input arrives or the far end hangs up.
    pub(crate) fn set_waiter(&self, waiter: Option<Arc<Alert>>) {
        self.io.state.lock().unwrap().waiter = waiter;
    }

    pub fn has_pending_input(&self) -> bool {
        let state = self.io.state.lock().unwrap();
        state.hung_up || !state.inbound.is_empty() || !state.returned.is_empty()
    }

    /// Hand a frame obtained from [`Channel::read`] back to the next reader.
    ///
    /// Returned frames are delivered before newer input, in the order they
    /// were handed back, and do not pass the audiohooks a second time.
    pub(crate) fn unread(&self, frame: Frame) {
        let mut state = self.io.state.lock().unwrap();
        state.returned.push_back(frame);
        self.io.wake_reader(&state);
    }

    /// Take the next frame from the far end without blocking.
    ///
    /// The frame passes the audiohook list (read direction) and is then
    /// converted to the read format.
    pub fn read(&self) -> ChannelRead {
        let frame = {
            let mut state = self.io.state.lock().unwrap();
            if state.hung_up {
                return ChannelRead::Hangup;
            }
            if let Some(frame) = state.returned.pop_front() {
                return ChannelRead::Frame(frame);
            }
            match state.inbound.pop_front() {
                Some(frame) => frame,
                None => return ChannelRead::Empty,
            }
        };
        if frame.kind == FrameKind::Control(ControlFrame::Hangup) {
            self.hangup();
            return ChannelRead::Hangup;
        }

        let frame = self.run_audiohooks(Direction::Read, frame);
        if !frame.is_voice() {
            return ChannelRead::Frame(frame);
        }
        let mut formats = self.formats.lock().unwrap();
        let target = formats.read;
        match translate(&self.translation, &mut formats.read_path, frame, target) {
            Some(frame) => ChannelRead::Frame(frame),
            None => ChannelRead::Frame(Frame::null()),
        }
    }

    /// Block up to `timeout` until input is queued or the far end hangs up.
    ///
    /// Returns `false` on timeout.
    pub fn wait_for_input(&self, timeout: Duration) -> bool {
        let state = self.io.state.lock().unwrap();
        let (state, result) = self
            .io
            .inbound_ready
            .wait_timeout_while(state, timeout, |state| {
                !state.hung_up && state.inbound.is_empty() && state.returned.is_empty()
            })
            .unwrap();
        drop(state);
        !result.timed_out()
    }

    /// Read until a DTMF digit ends, discarding anything else.
    pub fn wait_for_digit(&self, timeout: Duration) -> DigitWait {
        let deadline = Instant::now() + timeout;
        loop {
            match self.read() {
                ChannelRead::Frame(frame) => {
                    if let FrameKind::DtmfEnd(digit) = frame.kind {
                        return DigitWait::Digit(digit);
                    }
                    continue;
                }
                ChannelRead::Hangup => return DigitWait::Hangup,
                ChannelRead::Empty => {}
            }
            let now = Instant::now();
            if now >= deadline || !self.wait_for_input(deadline - now) {
                return DigitWait::Timeout;
            }
        }
    }

    /// Send a frame towards the far end.
    ///
    /// The frame passes the audiohook list (write direction) and voice is
    /// converted to the native format. Untranslatable voice is dropped.
    pub fn write(&self, frame: &Frame) -> Result<(), ChannelError> {
        if self.is_hung_up() {
            return Err(ChannelError::HungUp(self.name.clone()));
        }
        let mut frame = self.run_audiohooks(Direction::Write, frame.clone());
        if frame.kind == FrameKind::Null {
            return Ok(());
        }
        if frame.is_voice() {
            let mut formats = self.formats.lock().unwrap();
            let target = formats.native;
            frame = match translate(&self.translation, &mut formats.write_path, frame, target) {
                Some(frame) => frame,
                None => {
                    log::debug!("channel {} dropping untranslatable voice", self.name);
                    return Ok(());
                }
            };
        }
        let mut state = self.io.state.lock().unwrap();
        state.outbound.push_back(frame);
        self.io.outbound_ready.notify_all();
        Ok(())
    }

    /// Write each digit of `digits` as a begin/end DTMF pair.
    pub fn write_dtmf_stream(&self, digits: &str) -> Result<(), ChannelError> {
        for digit in digits.chars() {
            self.write(&Frame::dtmf_begin(digit))?;
            self.write(&Frame::dtmf_end(digit))?;
        }
        Ok(())
    }

    fn run_audiohooks(&self, direction: Direction, frame: Frame) -> Frame {
        let mut hooks = self.audiohooks.lock().unwrap();
        match hooks.as_mut() {
            Some(list) if !list.is_empty() => list.write_list(direction, frame, &self.translation),
            _ => frame,
        }
    }

    /// The channel's audiohook list, created on first use.
    pub(crate) fn audiohooks(&self) -> MutexGuard<'_, Option<AudiohookList>> {
        self.audiohooks.lock().unwrap()
    }

    pub fn add_role(&self, role: &str) {
        self.roles
            .lock()
            .unwrap()
            .entry(role.to_string())
            .or_default();
    }

    pub fn remove_role(&self, role: &str) {
        self.roles.lock().unwrap().remove(role);
    }

    pub fn set_role_option(&self, role: &str, option: &str, value: &str) {
        self.roles
            .lock()
            .unwrap()
            .entry(role.to_string())
            .or_default()
            .insert(option.to_string(), value.to_string());
    }

    pub(crate) fn roles_snapshot(&self) -> HashMap<String, HashMap<String, String>> {
        self.roles.lock().unwrap().clone()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Ok(hooks) = self.audiohooks.get_mut() {
            if let Some(mut list) = hooks.take() {
                list.detach_all();
            }
        }
    }
}

/// Run `frame` through a cached path towards `target`.
fn translate(
    translation: &Arc<dyn TranslationFactory>,
    path: &mut Option<TranslationPath>,
    frame: Frame,
    target: Format,
) -> Option<Frame> {
    if frame.format == target {
        return Some(frame);
    }
    let stale = match path {
        Some(existing) => existing.src != frame.format || existing.dst != target,
        None => true,
    };
    if stale {
        *path = translation
            .build_path(target, frame.format)
            .map(|translator| TranslationPath {
                src: frame.format,
                dst: target,
                translator,
            });
    }
    path.as_mut()?.translator.translate(&frame)
}

impl ChannelEndpoint {
    /// Queue a frame as if it arrived from the network.
    pub fn send(&self, frame: Frame) {
        let mut state = self.io.state.lock().unwrap();
        state.inbound.push_back(frame);
        self.io.wake_reader(&state);
    }

    /// Next frame the core wrote, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        let state = self.io.state.lock().unwrap();
        let (mut state, _) = self
            .io
            .outbound_ready
            .wait_timeout_while(state, timeout, |state| state.outbound.is_empty() && !state.hung_up)
            .unwrap();
        state.outbound.pop_front()
    }

    pub fn try_recv(&self) -> Option<Frame> {
        self.io.state.lock().unwrap().outbound.pop_front()
    }

    /// Everything written so far.
    pub fn drain(&self) -> Vec<Frame> {
        self.io.state.lock().unwrap().outbound.drain(..).collect()
    }

    /// Hang up from the far end.
    pub fn hangup(&self) {
        let mut state = self.io.state.lock().unwrap();
        state.hung_up = true;
        self.io.wake_reader(&state);
        self.io.outbound_ready.notify_all();
    }

    pub fn is_hung_up(&self) -> bool {
        self.io.state.lock().unwrap().hung_up
    }
}
