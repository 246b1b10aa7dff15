// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scriptable fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use powerhub_lib::device::DeviceConfig;
use powerhub_lib::driver::DriverFactory;
use powerhub_lib::error::TransportError;
use powerhub_lib::event::EventBus;
use powerhub_lib::host::{HardwareState, ServiceAction, ServiceManager, SupervisedHardware};
use powerhub_lib::protocol::{ConnectionHandler, MessageBus, MessageHandler};
use powerhub_lib::{Driver, Initialization, PowerDevice, PowerManager, PowerState, StateReporter};

// ============================================================================
// Relay
// ============================================================================

/// Simulated relay shared between a test and the driver controlling it.
#[derive(Debug)]
pub struct Relay {
    state: Mutex<PowerState>,
    fail_refresh: AtomicBool,
    fail_set: AtomicBool,
    refresh_calls: AtomicUsize,
    set_calls: AtomicUsize,
    active: AtomicBool,
    overlapped: AtomicBool,
    delay: Mutex<Duration>,
    reporter: Mutex<Option<StateReporter>>,
}

impl Relay {
    pub fn new(state: PowerState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            fail_refresh: AtomicBool::new(false),
            fail_set: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
            reporter: Mutex::new(None),
        })
    }

    /// Changes the physical state without telling anyone.
    pub fn flip(&self, state: PowerState) {
        *self.state.lock() = state;
    }

    /// Changes the physical state and reports it like a push-capable device.
    pub fn report(&self, state: PowerState) {
        self.flip(state);
        if let Some(reporter) = self.reporter.lock().as_ref() {
            reporter.report(state);
        }
    }

    pub fn state(&self) -> PowerState {
        *self.state.lock()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.fail_refresh.store(unreachable, Ordering::SeqCst);
        self.fail_set.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Returns true if two driver calls ever ran at the same time.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn exit(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Driver controlling a [`Relay`].
pub struct FakeDriver {
    relay: Arc<Relay>,
    initialization: Initialization,
    polling: bool,
}

impl FakeDriver {
    pub fn new(relay: &Arc<Relay>) -> Self {
        Self {
            relay: Arc::clone(relay),
            initialization: Initialization::RetryUntilReady,
            polling: true,
        }
    }

    pub fn with_initialization(mut self, initialization: Initialization) -> Self {
        self.initialization = initialization;
        self
    }

    pub fn without_polling(mut self) -> Self {
        self.polling = false;
        self
    }

    pub fn boxed(self) -> Box<dyn Driver> {
        Box::new(self)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn refresh_status(&mut self, _current: PowerState) -> Result<PowerState, TransportError> {
        self.relay.enter().await;
        self.relay.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.relay.fail_refresh.load(Ordering::SeqCst) {
            Err(TransportError::ConnectionFailed("relay unreachable".to_string()))
        } else {
            Ok(self.relay.state())
        };
        self.relay.exit();
        result
    }

    async fn set_power(&mut self, state: PowerState) -> Result<PowerState, TransportError> {
        self.relay.enter().await;
        self.relay.set_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.relay.fail_set.load(Ordering::SeqCst) {
            Err(TransportError::Command("relay rejected command".to_string()))
        } else {
            self.relay.flip(state);
            Ok(state)
        };
        self.relay.exit();
        result
    }

    fn initialization(&self) -> Initialization {
        self.initialization
    }

    fn supports_polling(&self) -> bool {
        self.polling
    }

    fn attach(&mut self, reporter: StateReporter) {
        *self.relay.reporter.lock() = Some(reporter);
    }
}

// ============================================================================
// Host
// ============================================================================

#[derive(Debug)]
pub struct FakeHardware {
    state: Mutex<HardwareState>,
    printing: AtomicBool,
    restarts: AtomicUsize,
    state_delay: Mutex<Duration>,
}

impl FakeHardware {
    pub fn new(state: HardwareState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            printing: AtomicBool::new(false),
            restarts: AtomicUsize::new(0),
            state_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Makes every state query block the calling thread for `delay`.
    pub fn set_state_delay(&self, delay: Duration) {
        *self.state_delay.lock() = delay;
    }

    pub fn set_state(&self, state: HardwareState) {
        *self.state.lock() = state;
    }

    pub fn set_printing(&self, printing: bool) {
        self.printing.store(printing, Ordering::SeqCst);
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SupervisedHardware for FakeHardware {
    fn state(&self) -> HardwareState {
        let delay = *self.state_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        *self.state.lock()
    }

    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    async fn firmware_restart(&self) -> powerhub_lib::Result<()> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeServices {
    available: Vec<String>,
    own: Option<String>,
    failing: Mutex<Vec<String>>,
    actions: Mutex<Vec<(ServiceAction, String)>>,
}

impl FakeServices {
    pub fn new<I, S>(available: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            available: available.into_iter().map(Into::into).collect(),
            own: Some("moonraker".to_string()),
            failing: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
        })
    }

    /// Makes every action on `service` fail.
    pub fn fail_on(&self, service: &str) {
        self.failing.lock().push(service.to_string());
    }

    pub fn actions(&self) -> Vec<(ServiceAction, String)> {
        self.actions.lock().clone()
    }
}

#[async_trait]
impl ServiceManager for FakeServices {
    fn available_services(&self) -> Vec<String> {
        self.available.clone()
    }

    fn own_unit_name(&self) -> Option<String> {
        self.own.clone()
    }

    async fn service_action(&self, action: ServiceAction, service: &str) -> powerhub_lib::Result<()> {
        if self.failing.lock().iter().any(|s| s == service) {
            return Err(TransportError::Command(format!("{action} {service} failed")).into());
        }
        self.actions.lock().push((action, service.to_string()));
        Ok(())
    }
}

// ============================================================================
// Message bus
// ============================================================================

/// In-memory broker: keeps retained messages and can echo commands onto a
/// state topic the way a real relay would.
#[derive(Default)]
pub struct LoopbackBus {
    disconnected: AtomicBool,
    connection_handlers: Mutex<Vec<ConnectionHandler>>,
    handlers: Mutex<HashMap<String, Vec<MessageHandler>>>,
    retained: Mutex<HashMap<String, Vec<u8>>>,
    echo: Mutex<HashMap<String, String>>,
    published: Mutex<Vec<(String, String)>>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn retain(&self, topic: &str, payload: &str) {
        self.retained.lock().insert(topic.to_string(), payload.as_bytes().to_vec());
    }

    pub fn echo(&self, command_topic: &str, state_topic: &str) {
        self.echo.lock().insert(command_topic.to_string(), state_topic.to_string());
    }

    /// Changes the connection state, telling listeners when it changes.
    pub fn set_connected(&self, connected: bool) {
        let was_connected = !self.disconnected.swap(!connected, Ordering::SeqCst);
        if was_connected == connected {
            return;
        }
        let handlers = self.connection_handlers.lock().clone();
        for handler in handlers {
            handler(connected);
        }
    }

    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Delivers a message to every handler of `topic`.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let handlers = self.handlers.lock().get(topic).cloned().unwrap_or_default();
        for handler in handlers {
            handler(payload);
        }
    }
}

#[async_trait]
impl MessageBus for LoopbackBus {
    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }

    fn on_connection_change(&self, handler: ConnectionHandler) {
        self.connection_handlers.lock().push(handler);
    }

    async fn publish(&self, topic: &str, payload: &[u8], _qos: u8, retain: bool) -> Result<(), TransportError> {
        self.published
            .lock()
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
        if retain {
            self.retained.lock().insert(topic.to_string(), payload.to_vec());
        }
        self.deliver(topic, payload);
        let echo = self.echo.lock().get(topic).cloned();
        if let Some(state_topic) = echo {
            self.retained.lock().insert(state_topic.clone(), payload.to_vec());
            self.deliver(&state_topic, payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: u8, handler: MessageHandler) -> Result<(), TransportError> {
        self.handlers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Arc::clone(&handler));
        let retained = self.retained.lock().get(topic).cloned();
        if let Some(payload) = retained {
            handler(&payload);
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub struct Harness {
    pub manager: PowerManager,
    pub hardware: Arc<FakeHardware>,
    pub services: Arc<FakeServices>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_services(["klipper_mcu", "webcamd"])
    }

    pub fn with_services<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hardware = FakeHardware::new(HardwareState::Ready);
        let services = FakeServices::new(available);
        let manager = PowerManager::new(hardware.clone(), services.clone(), EventBus::new());
        Self {
            manager,
            hardware,
            services,
        }
    }

    /// Registers a device and lets its bring-up run.
    pub async fn add(&self, config: DeviceConfig, driver: FakeDriver) -> Arc<PowerDevice> {
        let device = self.manager.create_device(&config, driver.boxed()).unwrap();
        self.manager.add_device(Arc::clone(&device)).await.unwrap();
        settle().await;
        device
    }

    /// A factory building [`FakeDriver`]s for type `fake`, one relay per device.
    pub fn factory(relays: Arc<Mutex<HashMap<String, Arc<Relay>>>>) -> DriverFactory {
        let mut factory = DriverFactory::new();
        factory.register("fake", move |config| {
            let relay = Relay::new(PowerState::Off);
            relays.lock().insert(config.name.clone(), Arc::clone(&relay));
            Ok(FakeDriver::new(&relay).boxed())
        });
        factory
    }
}

/// Lets spawned tasks run; with paused time this also advances the clock a
/// little.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
