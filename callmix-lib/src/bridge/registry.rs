//! Shared registries: technologies, builtin features and live bridges.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use super::features::{BuiltinFeature, HookAction, HookCallback};
use super::{Bridge, BridgeChannel, ChannelState};
use crate::config::CoreConfig;
use crate::error::BridgeError;
use crate::technology::{BridgeTechnology, Capabilities, MultiplexedBridge, SimpleBridge, SoftmixBridge};

struct RegisteredTechnology {
    technology: Arc<dyn BridgeTechnology>,
    suspended: bool,
}

/// Registries every bridge created from it shares.
///
/// Build one per process (or per test) and hand it to [`Bridge::new`].
pub struct BridgeCore {
    config: CoreConfig,
    technologies: Mutex<Vec<RegisteredTechnology>>,
    builtins: Mutex<HashMap<BuiltinFeature, HookCallback>>,
    bridges: Mutex<Vec<Weak<Bridge>>>,
}

impl BridgeCore {
    /// Empty core: no technologies, no builtin features.
    pub fn new(config: CoreConfig) -> Arc<Self> {
        Arc::new(Self {
            config: config.normalized(),
            technologies: Mutex::new(Vec::new()),
            builtins: Mutex::new(HashMap::new()),
            bridges: Mutex::new(Vec::new()),
        })
    }

    /// Core with softmix, simple and multiplexed technologies and the
    /// hangup builtin feature registered.
    pub fn with_default_technologies(config: CoreConfig) -> Arc<Self> {
        let core = Self::new(config);
        let per_thread = core.config.multiplexed_bridges_per_thread;
        let technologies: [Arc<dyn BridgeTechnology>; 3] = [
            Arc::new(SoftmixBridge),
            Arc::new(SimpleBridge),
            Arc::new(MultiplexedBridge::new(per_thread)),
        ];
        for technology in technologies {
            // Fresh core: names cannot collide.
            let _ = core.register_technology(technology);
        }
        let _ = core.register_builtin_feature(BuiltinFeature::Hangup, |bridge_channel: &Arc<BridgeChannel>| {
            bridge_channel.change_state(ChannelState::End);
            HookAction::Keep
        });
        core
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn register_technology(&self, technology: Arc<dyn BridgeTechnology>) -> Result<(), BridgeError> {
        let mut technologies = self.technologies.lock().unwrap();
        if technologies
            .iter()
            .any(|registered| registered.technology.name() == technology.name())
        {
            return Err(BridgeError::DuplicateTechnology(technology.name().to_string()));
        }
        log::debug!(
            "registered bridge technology {} ({:?}, {:?})",
            technology.name(),
            technology.capabilities(),
            technology.preference()
        );
        technologies.push(RegisteredTechnology {
            technology,
            suspended: false,
        });
        Ok(())
    }

    pub fn unregister_technology(&self, name: &str) -> Result<(), BridgeError> {
        let mut technologies = self.technologies.lock().unwrap();
        let before = technologies.len();
        technologies.retain(|registered| registered.technology.name() != name);
        if technologies.len() == before {
            return Err(BridgeError::UnknownTechnology(name.to_string()));
        }
        Ok(())
    }

    /// Skip `name` when choosing technologies for new bridges.
    pub fn suspend_technology(&self, name: &str) -> Result<(), BridgeError> {
        self.set_technology_suspended(name, true)
    }

    pub fn unsuspend_technology(&self, name: &str) -> Result<(), BridgeError> {
        self.set_technology_suspended(name, false)
    }

    fn set_technology_suspended(&self, name: &str, suspended: bool) -> Result<(), BridgeError> {
        let mut technologies = self.technologies.lock().unwrap();
        let registered = technologies
            .iter_mut()
            .find(|registered| registered.technology.name() == name)
            .ok_or_else(|| BridgeError::UnknownTechnology(name.to_string()))?;
        registered.suspended = suspended;
        Ok(())
    }

    /// Best unsuspended technology sharing a capability with `capabilities`.
    ///
    /// Preference decides between candidates; ties go to the earliest
    /// registered.
    pub fn find_best_technology(&self, capabilities: Capabilities) -> Option<Arc<dyn BridgeTechnology>> {
        let technologies = self.technologies.lock().unwrap();
        technologies
            .iter()
            .filter(|registered| !registered.suspended)
            .filter(|registered| registered.technology.capabilities().intersects(capabilities))
            .min_by_key(|registered| registered.technology.preference())
            .map(|registered| registered.technology.clone())
    }

    /// Whether a bridge with `capabilities` could be created right now.
    pub fn check(&self, capabilities: Capabilities) -> bool {
        self.find_best_technology(capabilities).is_some()
    }

    /// Make `feature` available to [`super::BridgeFeatures::enable_builtin`].
    pub fn register_builtin_feature<F>(&self, feature: BuiltinFeature, callback: F) -> Result<(), BridgeError>
    where
        F: Fn(&Arc<BridgeChannel>) -> HookAction + Send + Sync + 'static,
    {
        let mut builtins = self.builtins.lock().unwrap();
        if builtins.contains_key(&feature) {
            return Err(BridgeError::DuplicateBuiltin(feature.to_string()));
        }
        builtins.insert(feature, Arc::new(callback));
        Ok(())
    }

    pub fn unregister_builtin_feature(&self, feature: BuiltinFeature) -> Result<(), BridgeError> {
        self.builtins
            .lock()
            .unwrap()
            .remove(&feature)
            .map(|_| ())
            .ok_or_else(|| BridgeError::UnknownBuiltin(feature.to_string()))
    }

    pub(crate) fn builtin_feature(&self, feature: BuiltinFeature) -> Option<HookCallback> {
        self.builtins.lock().unwrap().get(&feature).cloned()
    }

    pub(crate) fn track(&self, bridge: &Arc<Bridge>) {
        let mut bridges = self.bridges.lock().unwrap();
        bridges.retain(|tracked| tracked.strong_count() > 0);
        bridges.push(Arc::downgrade(bridge));
    }

    /// Live, not yet dissolved bridges.
    pub fn bridges(&self) -> Vec<Arc<Bridge>> {
        self.bridges
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|bridge| !bridge.is_dissolved())
            .collect()
    }

    pub fn find_bridge(&self, id: &str) -> Option<Arc<Bridge>> {
        self.bridges().into_iter().find(|bridge| bridge.id() == id)
    }

    /// Dissolve every live bridge and drop the registries.
    pub fn shutdown(&self) {
        for bridge in self.bridges() {
            bridge.destroy();
        }
        self.bridges.lock().unwrap().clear();
        self.builtins.lock().unwrap().clear();
        self.technologies.lock().unwrap().clear();
        log::debug!("bridge core shut down");
    }
}

impl std::fmt::Debug for BridgeCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self
            .technologies
            .lock()
            .unwrap()
            .iter()
            .map(|registered| registered.technology.name())
            .collect();
        f.debug_struct("BridgeCore")
            .field("config", &self.config)
            .field("technologies", &names)
            .finish()
    }
}
