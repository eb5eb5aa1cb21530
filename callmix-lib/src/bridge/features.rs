//! Per-participant feature hooks and flags.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::interval::{IntervalAction, IntervalCallback, IntervalHooks};
use super::{BridgeChannel, BridgeCore};
use crate::constants::MAXIMUM_DTMF_FEATURE_STRING;
use crate::error::BridgeError;

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

fn next_hook_id() -> u64 {
    NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed)
}

/// What a hook callback wants done with itself afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Keep,
    Remove,
}

pub type HookCallback = Arc<dyn Fn(&Arc<BridgeChannel>) -> HookAction + Send + Sync>;

/// Called with `true` when a participant starts talking, `false` when it stops.
pub type TalkCallback = Arc<dyn Fn(&Arc<BridgeChannel>, bool) + Send + Sync>;

/// Builtin DTMF features that can be enabled on a participant by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFeature {
    BlindTransfer,
    AttendedTransfer,
    Hangup,
}

impl BuiltinFeature {
    /// Digits used when a feature is enabled without an explicit sequence.
    pub fn default_dtmf(&self) -> &'static str {
        match self {
            BuiltinFeature::BlindTransfer => "#1",
            BuiltinFeature::AttendedTransfer => "*2",
            BuiltinFeature::Hangup => "*",
        }
    }
}

impl fmt::Display for BuiltinFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuiltinFeature::BlindTransfer => "blind transfer",
            BuiltinFeature::AttendedTransfer => "attended transfer",
            BuiltinFeature::Hangup => "hangup",
        };
        f.write_str(name)
    }
}

#[derive(Clone)]
pub(crate) struct Hook {
    pub(crate) id: u64,
    pub(crate) callback: HookCallback,
    remove_on_pull: bool,
}

#[derive(Clone)]
pub(crate) struct DtmfHook {
    pub(crate) id: u64,
    pub(crate) code: String,
    pub(crate) callback: HookCallback,
    remove_on_pull: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookKind {
    Hangup,
    Join,
    Leave,
}

/// Result of matching collected digits against the DTMF hooks.
pub(crate) enum DtmfMatch {
    Exact(DtmfHook),
    /// Some hook starts with the digits; keep collecting.
    Partial,
    None,
}

/// Hooks and flags of one participant.
///
/// A bridge keeps one of these as a template; its hooks are copied into
/// every participant that joins and removed again when it is pulled.
#[derive(Clone)]
pub struct BridgeFeatures {
    pub(crate) dtmf: Vec<DtmfHook>,
    pub(crate) hangup: Vec<Hook>,
    pub(crate) join: Vec<Hook>,
    pub(crate) leave: Vec<Hook>,
    pub(crate) talker: Option<TalkCallback>,
    pub(crate) intervals: IntervalHooks,
    /// Audio read from the participant is not passed to the bridge.
    pub mute: bool,
    /// DTMF not consumed by a feature is passed to the bridge.
    pub dtmf_passthrough: bool,
    /// Dissolve the bridge when this participant hangs up.
    pub dissolve_hangup: bool,
}

impl Default for BridgeFeatures {
    fn default() -> Self {
        Self {
            dtmf: Vec::new(),
            hangup: Vec::new(),
            join: Vec::new(),
            leave: Vec::new(),
            talker: None,
            intervals: IntervalHooks::new(),
            mute: false,
            dtmf_passthrough: true,
            dissolve_hangup: false,
        }
    }
}

impl fmt::Debug for BridgeFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeFeatures")
            .field("dtmf", &self.dtmf.iter().map(|hook| hook.code.as_str()).collect::<Vec<_>>())
            .field("hangup", &self.hangup.len())
            .field("join", &self.join.len())
            .field("leave", &self.leave.len())
            .field("intervals", &self.intervals.len())
            .field("mute", &self.mute)
            .field("dtmf_passthrough", &self.dtmf_passthrough)
            .field("dissolve_hangup", &self.dissolve_hangup)
            .finish()
    }
}

impl BridgeFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` when the participant dials `code`.
    ///
    /// # Arguments
    ///
    /// * `code` - DTMF sequence, 1 to 11 digits.
    /// * `callback` - Runs on the participant's thread while it is suspended
    ///   from mixing.
    ///
    /// # Returns
    ///
    /// The hook id, usable with [`BridgeFeatures::remove_hook`].
    pub fn add_dtmf_hook<F>(&mut self, code: &str, callback: F) -> Result<u64, BridgeError>
    where
        F: Fn(&Arc<BridgeChannel>) -> HookAction + Send + Sync + 'static,
    {
        self.push_dtmf_hook(code, Arc::new(callback), false)
    }

    fn push_dtmf_hook(&mut self, code: &str, callback: HookCallback, remove_on_pull: bool) -> Result<u64, BridgeError> {
        if code.is_empty() || code.chars().count() > MAXIMUM_DTMF_FEATURE_STRING {
            return Err(BridgeError::InvalidHook(format!(
                "DTMF sequence '{}' must be 1 to {} digits",
                code, MAXIMUM_DTMF_FEATURE_STRING
            )));
        }
        let id = next_hook_id();
        self.dtmf.push(DtmfHook {
            id,
            code: code.to_string(),
            callback,
            remove_on_pull,
        });
        Ok(id)
    }

    pub fn add_hangup_hook<F>(&mut self, callback: F) -> u64
    where
        F: Fn(&Arc<BridgeChannel>) -> HookAction + Send + Sync + 'static,
    {
        push_hook(&mut self.hangup, Arc::new(callback))
    }

    pub fn add_join_hook<F>(&mut self, callback: F) -> u64
    where
        F: Fn(&Arc<BridgeChannel>) -> HookAction + Send + Sync + 'static,
    {
        push_hook(&mut self.join, Arc::new(callback))
    }

    pub fn add_leave_hook<F>(&mut self, callback: F) -> u64
    where
        F: Fn(&Arc<BridgeChannel>) -> HookAction + Send + Sync + 'static,
    {
        push_hook(&mut self.leave, Arc::new(callback))
    }

    /// Run `callback` whenever talk detection changes state.
    pub fn set_talk_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Arc<BridgeChannel>, bool) + Send + Sync + 'static,
    {
        self.talker = Some(Arc::new(callback));
    }

    /// Run `callback` every `period` on the participant's thread.
    pub fn add_interval_hook<F>(&mut self, period: Duration, callback: F) -> Result<u64, BridgeError>
    where
        F: Fn(&Arc<BridgeChannel>) -> IntervalAction + Send + Sync + 'static,
    {
        self.push_interval_hook(period, Arc::new(callback), false)
    }

    fn push_interval_hook(
        &mut self,
        period: Duration,
        callback: IntervalCallback,
        remove_on_pull: bool,
    ) -> Result<u64, BridgeError> {
        if period.is_zero() {
            return Err(BridgeError::InvalidHook("interval period must be non-zero".to_string()));
        }
        let id = next_hook_id();
        self.intervals
            .add(id, period, Instant::now(), callback, remove_on_pull);
        Ok(id)
    }

    /// Attach a registered builtin feature as a DTMF hook.
    ///
    /// `dtmf` overrides the feature's default sequence.
    pub fn enable_builtin(
        &mut self,
        core: &BridgeCore,
        feature: BuiltinFeature,
        dtmf: Option<&str>,
    ) -> Result<u64, BridgeError> {
        let callback = core
            .builtin_feature(feature)
            .ok_or_else(|| BridgeError::UnknownBuiltin(feature.to_string()))?;
        self.push_dtmf_hook(dtmf.unwrap_or(feature.default_dtmf()), callback, false)
    }

    /// Remove a hook of any kind by id.
    pub fn remove_hook(&mut self, id: u64) -> bool {
        let before = self.hook_count();
        self.dtmf.retain(|hook| hook.id != id);
        for hooks in [&mut self.hangup, &mut self.join, &mut self.leave] {
            hooks.retain(|hook| hook.id != id);
        }
        self.intervals.remove_where(|hook| hook.id == id);
        self.hook_count() != before
    }

    /// Hooks of every kind, talk callback excluded.
    pub fn hook_count(&self) -> usize {
        self.dtmf.len() + self.hangup.len() + self.join.len() + self.leave.len() + self.intervals.len()
    }

    pub(crate) fn hooks(&self, kind: HookKind) -> Vec<Hook> {
        match kind {
            HookKind::Hangup => self.hangup.clone(),
            HookKind::Join => self.join.clone(),
            HookKind::Leave => self.leave.clone(),
        }
    }

    /// Whether a DTMF begin for `digit` may start a feature sequence.
    pub(crate) fn starts_feature(&self, digit: char) -> bool {
        self.dtmf.iter().any(|hook| hook.code.starts_with(digit))
    }

    pub(crate) fn match_dtmf(&self, digits: &str) -> DtmfMatch {
        if let Some(hook) = self.dtmf.iter().find(|hook| hook.code == digits) {
            return DtmfMatch::Exact(hook.clone());
        }
        if self.dtmf.iter().any(|hook| hook.code.starts_with(digits)) {
            DtmfMatch::Partial
        } else {
            DtmfMatch::None
        }
    }

    /// Copy the hooks of `template` in, marked for removal on pull.
    pub(crate) fn inherit(&mut self, template: &BridgeFeatures) {
        for hook in &template.dtmf {
            let _ = self.push_dtmf_hook(&hook.code, hook.callback.clone(), true);
        }
        for (ours, theirs) in [
            (&mut self.hangup, &template.hangup),
            (&mut self.join, &template.join),
            (&mut self.leave, &template.leave),
        ] {
            for hook in theirs {
                ours.push(Hook {
                    id: next_hook_id(),
                    callback: hook.callback.clone(),
                    remove_on_pull: true,
                });
            }
        }
        for hook in template.intervals.iter() {
            let _ = self.push_interval_hook(hook.period, hook.callback.clone(), true);
        }
        if self.talker.is_none() {
            self.talker = template.talker.clone();
        }
    }

    /// Drop everything inherited from the bridge.
    pub(crate) fn remove_on_pull(&mut self) {
        self.dtmf.retain(|hook| !hook.remove_on_pull);
        for hooks in [&mut self.hangup, &mut self.join, &mut self.leave] {
            hooks.retain(|hook| !hook.remove_on_pull);
        }
        self.intervals.remove_where(|hook| hook.remove_on_pull);
    }
}

fn push_hook(hooks: &mut Vec<Hook>, callback: HookCallback) -> u64 {
    let id = next_hook_id();
    hooks.push(Hook {
        id,
        callback,
        remove_on_pull: false,
    });
    id
}
