#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use callmix_lib::audio::{Format, Frame, FrameKind};
use callmix_lib::{BridgeCore, Channel, ChannelEndpoint, CoreConfig};

pub fn core() -> Arc<BridgeCore> {
    BridgeCore::with_default_technologies(CoreConfig::default())
}

pub fn party(name: &str) -> (Arc<Channel>, ChannelEndpoint) {
    Channel::pair(name, Format::slin(8000))
}

/// Poll `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Collect frames written to `endpoint` until `want` of them match `keep`.
pub fn collect(endpoint: &ChannelEndpoint, want: usize, keep: impl Fn(&Frame) -> bool) -> Vec<Frame> {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut frames = Vec::new();
    while frames.len() < want && Instant::now() < deadline {
        if let Some(frame) = endpoint.recv_timeout(Duration::from_millis(20)) {
            if keep(&frame) {
                frames.push(frame);
            }
        }
    }
    frames
}

pub fn is_dtmf(frame: &Frame) -> bool {
    matches!(frame.kind, FrameKind::DtmfBegin(_) | FrameKind::DtmfEnd(_))
}

pub fn send_digits(endpoint: &ChannelEndpoint, digits: &str) {
    for digit in digits.chars() {
        endpoint.send(Frame::dtmf_begin(digit));
        endpoint.send(Frame::dtmf_end(digit));
    }
}
