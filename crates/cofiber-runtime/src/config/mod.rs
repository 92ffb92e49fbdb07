//! Configuration registry
//!
//! Named, typed, observable variables shared by the whole process.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. `Config::apply_env()` - `COFIBER_<NAME>` environment variables
//! 2. `set_value` / `from_str` calls made by the program
//! 3. The default passed to the first `Config::lookup`, which for the
//!    runtime's own variables comes from `defaults` (build time)
//!
//! # Example
//!
//! ```rust,ignore
//! use cofiber_runtime::config::Config;
//!
//! let port = Config::lookup("server.port", 8080u16, "listen port")?;
//! port.add_listener(|old, new| println!("port {} -> {}", old, new));
//! port.set_value(9090);
//! ```
//!
//! Names are lower-cased and must then consist of `[a-z0-9._]` only.

pub mod defaults;

use crate::sync::RwMutex;
use cofiber_core::constants::MIN_STACK_SIZE;
use cofiber_core::env::{env_get_raw, env_key};
use cofiber_core::error::{ConfigError, FiberResult};
use cofiber_core::kprint::SYSTEM_LOGGER;
use cofiber_core::{kdebug, kerror, kinfo, kwarn};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Name of the variable that sizes fiber stacks
pub const FIBER_STACK_SIZE: &str = "fiber.stack_size";

/// Types a `ConfigVar` can hold
pub trait ConfigValue: Clone + PartialEq + Display + FromStr + Send + Sync + 'static {}

impl<T> ConfigValue for T where T: Clone + PartialEq + Display + FromStr + Send + Sync + 'static {}

/// Type-erased view of a registered variable
pub trait ConfigVarBase: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Current value rendered as a string
    fn to_string(&self) -> String;

    /// Parse `value` and assign it; false (and an error log) when parsing fails
    fn from_str(&self, value: &str) -> bool;

    /// Rust type name of the held value
    fn type_name(&self) -> &'static str;
}

/// Change callback, invoked with `(old, new)`
pub type Listener<T> = Arc<dyn Fn(&T, &T) + Send + Sync>;

/// A named, typed, observable configuration value
pub struct ConfigVar<T: ConfigValue> {
    name: String,
    description: String,
    value: RwMutex<T>,
    listeners: RwMutex<BTreeMap<u64, Listener<T>>>,
    next_listener: AtomicU64,
}

impl<T: ConfigValue> ConfigVar<T> {
    fn new(name: String, default: T, description: &str) -> Self {
        Self {
            name,
            description: description.to_string(),
            value: RwMutex::new(default),
            listeners: RwMutex::new(BTreeMap::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Snapshot of the current value
    pub fn value(&self) -> T {
        self.value.read().clone()
    }

    /// Assign a new value
    ///
    /// No-op when the value is unchanged. Listeners run while only the read
    /// lock is held, then the value is swapped under the write lock.
    pub fn set_value(&self, new: T) {
        {
            let current = self.value.read();
            if *current == new {
                return;
            }
            // Snapshot so listeners may add or remove listeners
            let listeners: Vec<Listener<T>> = self.listeners.read().values().cloned().collect();
            for cb in &listeners {
                cb(&current, &new);
            }
        }
        *self.value.write() = new;
    }

    /// Register a change listener; returns its key
    pub fn add_listener<F>(&self, cb: F) -> u64
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let key = self.next_listener.fetch_add(1, Ordering::Relaxed) + 1;
        self.listeners.write().insert(key, Arc::new(cb));
        key
    }

    /// Remove a listener; unknown keys are ignored
    pub fn del_listener(&self, key: u64) {
        self.listeners.write().remove(&key);
    }

    /// Look up a listener by key
    pub fn listener(&self, key: u64) -> Option<Listener<T>> {
        self.listeners.read().get(&key).cloned()
    }

    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
    }
}

impl<T: ConfigValue> ConfigVarBase for ConfigVar<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn to_string(&self) -> String {
        self.value.read().to_string()
    }

    fn from_str(&self, value: &str) -> bool {
        match value.trim().parse::<T>() {
            Ok(v) => {
                self.set_value(v);
                true
            }
            Err(_) => {
                kerror!(
                    target: SYSTEM_LOGGER,
                    "config '{}': cannot parse '{}' as {}",
                    self.name,
                    value,
                    std::any::type_name::<T>()
                );
                false
            }
        }
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl<T: ConfigValue + std::fmt::Debug> std::fmt::Debug for ConfigVar<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigVar")
            .field("name", &self.name)
            .field("value", &*self.value.read())
            .finish()
    }
}

/// One registry slot: the same variable seen two ways
struct Entry {
    base: Arc<dyn ConfigVarBase>,
    any: Arc<dyn Any + Send + Sync>,
}

type Registry = RwMutex<HashMap<String, Entry>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwMutex::new(HashMap::new()))
}

/// Lower-case `name` and check it against `[a-z0-9._]`
fn normalize_name(name: &str) -> FiberResult<String> {
    let name = name.to_ascii_lowercase();
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'_');
    if valid {
        Ok(name)
    } else {
        kerror!(target: SYSTEM_LOGGER, "config lookup: invalid name '{}'", name);
        Err(ConfigError::InvalidName(name).into())
    }
}

fn downcast<T: ConfigValue>(name: &str, entry: &Entry) -> FiberResult<Arc<ConfigVar<T>>> {
    entry.any.clone().downcast::<ConfigVar<T>>().map_err(|_| {
        kerror!(
            target: SYSTEM_LOGGER,
            "config lookup: '{}' exists with type {}, not {}",
            name,
            entry.base.type_name(),
            std::any::type_name::<T>()
        );
        ConfigError::TypeMismatch {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            actual: entry.base.type_name(),
        }
        .into()
    })
}

/// Process-wide registry of configuration variables
pub struct Config;

impl Config {
    /// Get `name`, registering it with `default` if absent
    ///
    /// Fails if the name is invalid or already registered with another type.
    pub fn lookup<T: ConfigValue>(
        name: &str,
        default: T,
        description: &str,
    ) -> FiberResult<Arc<ConfigVar<T>>> {
        let name = normalize_name(name)?;

        if let Some(entry) = registry().read().get(&name) {
            return downcast(&name, entry);
        }

        let mut map = registry().write();
        // Another thread may have registered it between the two locks
        if let Some(entry) = map.get(&name) {
            return downcast(&name, entry);
        }

        let var = Arc::new(ConfigVar::new(name.clone(), default, description));
        map.insert(
            name.clone(),
            Entry {
                base: var.clone(),
                any: var.clone(),
            },
        );
        kdebug!(target: SYSTEM_LOGGER, "config: registered '{}' = {}", name, var.value());
        Ok(var)
    }

    /// Get `name` only if it is registered with type `T`
    pub fn lookup_existing<T: ConfigValue>(name: &str) -> Option<Arc<ConfigVar<T>>> {
        let name = name.to_ascii_lowercase();
        let map = registry().read();
        let entry = map.get(&name)?;
        entry.any.clone().downcast::<ConfigVar<T>>().ok()
    }

    /// Get `name` without knowing its type
    pub fn lookup_base(name: &str) -> Option<Arc<dyn ConfigVarBase>> {
        let name = name.to_ascii_lowercase();
        registry().read().get(&name).map(|e| e.base.clone())
    }

    /// Call `f` for every registered variable, in name order
    pub fn visit<F: FnMut(&dyn ConfigVarBase)>(mut f: F) {
        // Snapshot so `f` may register or assign variables
        let mut vars: Vec<Arc<dyn ConfigVarBase>> =
            registry().read().values().map(|e| e.base.clone()).collect();
        vars.sort_by(|a, b| a.name().cmp(b.name()));
        for var in &vars {
            f(var.as_ref());
        }
    }

    /// Assign every registered variable whose `COFIBER_<NAME>` is set
    ///
    /// Returns how many variables were updated.
    pub fn apply_env() -> usize {
        let mut applied = 0;
        Self::visit(|var| {
            let key = env_key(var.name());
            if let Some(raw) = env_get_raw(&key) {
                if var.from_str(&raw) {
                    kinfo!(
                        target: SYSTEM_LOGGER,
                        "config: {} = {} (from {})",
                        var.name(),
                        ConfigVarBase::to_string(var),
                        key
                    );
                    applied += 1;
                }
            }
        });
        applied
    }
}

/// The `fiber.stack_size` variable, registered on first use
///
/// `None` only if something else registered the name with another type.
pub fn fiber_stack_size_var() -> Option<Arc<ConfigVar<u32>>> {
    static VAR: OnceLock<Option<Arc<ConfigVar<u32>>>> = OnceLock::new();
    VAR.get_or_init(|| {
        Config::lookup(
            FIBER_STACK_SIZE,
            defaults::FIBER_STACK_SIZE,
            "fiber stack size in bytes",
        )
        .ok()
    })
    .clone()
}

/// Stack size for fibers created without an explicit size
pub fn default_stack_size() -> usize {
    fiber_stack_size_var()
        .map(|v| v.value())
        .unwrap_or(defaults::FIBER_STACK_SIZE) as usize
}

/// Log every change of `fiber.stack_size`; warn when it drops below the floor
pub fn watch_stack_size() -> Option<u64> {
    let var = fiber_stack_size_var()?;
    Some(var.add_listener(|old, new| {
        if (*new as usize) < MIN_STACK_SIZE {
            kwarn!(
                target: SYSTEM_LOGGER,
                "{} changed {} -> {}: below minimum {}, new fibers will fail to allocate",
                FIBER_STACK_SIZE,
                old,
                new,
                MIN_STACK_SIZE
            );
        } else {
            kinfo!(target: SYSTEM_LOGGER, "{} changed {} -> {}", FIBER_STACK_SIZE, old, new);
        }
    }))
}
