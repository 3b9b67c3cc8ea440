//! The grabber's side of the local socket.
//!
//! [`Receiver`] binds a Unix datagram socket, hands it to the console user
//! and runs a worker thread that decodes each datagram and dispatches it.
//! The worker owns the [`DeviceOwner`] and the console user server's
//! [`ProcessMonitor`]; all grab/ungrab decisions are made on that one
//! thread.
//!
//! # Ownership of the grab
//!
//! * `connect` from a console user server grabs all devices and starts
//!   monitoring that pid.  A later console user server replaces the
//!   monitor, so only the newest one is tracked.
//! * When the monitored process exits, the monitor posts an event to the
//!   worker, which releases the devices.  A monitor that was already
//!   replaced can still post an event while being torn down; events carry
//!   the monitor's generation and stale ones are dropped.
//! * [`Receiver::shutdown`] (or drop) removes the socket, joins the worker,
//!   stops the monitor, ungrabs and clears every rule table.

use crate::config::Config;
use crate::manipulator::SharedManipulator;
use crate::monitor::ProcessMonitor;
use crate::protocol::{self, Message, PeerClass, ProtocolError};
use crate::traits::{DeviceOwner, ProcessProbe, SessionIdentity};
use log::{debug, error, info, warn};
use std::fs::Permissions;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Largest datagram the worker reads in one go.
const RECEIVE_BUFFER_SIZE: usize = 1024 * 1024;

/// Errors that prevent the receiver from starting.
#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to restrict permissions of {path}: {source}")]
    Permissions {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Events posted to the worker from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerEvent {
    ConsoleUserServerExited { generation: u64 },
}

/// Protocol dispatch and the state it drives.
///
/// Kept separate from the socket so it can be exercised directly.
pub struct Dispatcher<D: DeviceOwner> {
    devices: D,
    manipulator: SharedManipulator,
    probe: Arc<dyn ProcessProbe>,
    monitor_interval: Duration,
    console_user_server_monitor: Option<ProcessMonitor>,
    generation: u64,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: mpsc::Receiver<PeerEvent>,
}

impl<D: DeviceOwner> Dispatcher<D> {
    pub fn new(
        devices: D,
        manipulator: SharedManipulator,
        probe: Arc<dyn ProcessProbe>,
        monitor_interval: Duration,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            devices,
            manipulator,
            probe,
            monitor_interval,
            console_user_server_monitor: None,
            generation: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn devices(&self) -> &D {
        &self.devices
    }

    /// Pid of the console user server currently monitored.
    pub fn monitored_pid(&self) -> Option<i32> {
        self.console_user_server_monitor.as_ref().map(ProcessMonitor::pid)
    }

    /// Decode and handle one datagram.
    ///
    /// Malformed messages are logged and dropped; unknown operation codes
    /// are ignored.
    pub fn dispatch(&mut self, datagram: &[u8]) {
        match protocol::decode(datagram) {
            Ok(message) => self.handle(message),
            Err(ProtocolError::UnknownOperation(op)) => {
                debug!("ignoring unknown operation {}", op);
            }
            Err(ProtocolError::Empty) => debug!("ignoring empty datagram"),
            Err(e) => error!("{}", e),
        }
    }

    /// Apply one decoded message.
    pub fn handle(&mut self, message: Message) {
        debug!("received {:?}", message);
        match message {
            Message::Connect { peer_class, pid } => self.connect(peer_class, pid),

            Message::SystemPreferencesValuesUpdated(values) => {
                self.manipulator.lock().set_system_preferences_values(values);
                info!("system_preferences_values_updated");
            }

            Message::SetCapsLockLedState(state) => {
                if let Err(e) = self.devices.set_caps_lock_led_state(state) {
                    error!("set_caps_lock_led_state failed: {}", e);
                }
            }

            Message::ClearSimpleModifications => {
                self.manipulator.lock().clear_simple_modifications();
            }
            Message::AddSimpleModification { from, to } => {
                self.manipulator.lock().add_simple_modification(from, to);
            }
            Message::ClearFnFunctionKeys => {
                self.manipulator.lock().clear_fn_function_keys();
            }
            Message::AddFnFunctionKey { from, to } => {
                self.manipulator.lock().add_fn_function_key(from, to);
            }
            Message::ClearStandaloneModifiers => {
                self.manipulator.lock().clear_standalone_modifiers();
            }
            Message::AddStandaloneModifier { from, to } => {
                self.manipulator.lock().add_standalone_modifier(from, to);
            }
        }
    }

    fn connect(&mut self, peer_class: PeerClass, pid: i32) {
        info!("{} is connected (pid:{})", peer_class, pid);
        match peer_class {
            PeerClass::EventDispatcher => {
                self.manipulator.lock().attach_event_dispatcher();
            }
            PeerClass::ConsoleUserServer => {
                if let Err(e) = self.devices.grab_all() {
                    error!("grab failed: {}", e);
                }

                // Stop watching the previous console user server before
                // watching the new one.
                self.console_user_server_monitor = None;
                self.generation += 1;

                let generation = self.generation;
                let events = self.events_tx.clone();
                let monitor = ProcessMonitor::spawn(
                    pid,
                    self.monitor_interval,
                    self.probe.clone(),
                    move || {
                        let _ = events.send(PeerEvent::ConsoleUserServerExited { generation });
                    },
                );
                match monitor {
                    Ok(monitor) => self.console_user_server_monitor = Some(monitor),
                    Err(e) => error!("failed to monitor pid {}: {}", pid, e),
                }
            }
        }
    }

    /// Handle every event posted since the last call.
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::ConsoleUserServerExited { generation } => {
                if generation != self.generation || self.console_user_server_monitor.is_none() {
                    debug!("dropping stale exit event (generation {})", generation);
                    return;
                }
                if let Some(monitor) = self.console_user_server_monitor.take() {
                    info!("console user server exited (pid:{})", monitor.pid());
                }
                if let Err(e) = self.devices.ungrab_all() {
                    error!("ungrab failed: {}", e);
                }
            }
        }
    }

    /// Return to an inert state: no monitor, nothing grabbed, empty rule
    /// tables.
    pub fn teardown(&mut self) {
        self.console_user_server_monitor = None;
        if let Err(e) = self.devices.ungrab_all() {
            error!("ungrab failed: {}", e);
        }
        self.manipulator.lock().clear_all();
    }
}

/// Owns the listening socket and the worker thread.
pub struct Receiver<D: DeviceOwner + 'static> {
    socket_path: PathBuf,
    exit: Arc<AtomicBool>,
    worker: Option<JoinHandle<Dispatcher<D>>>,
}

impl<D: DeviceOwner + 'static> Receiver<D> {
    /// Bind the socket and start the worker thread.
    ///
    /// Any stale socket file at the configured path is removed first.
    /// Failing to bind is fatal; failing to hand the socket to the console
    /// user is logged.
    pub fn start(
        config: &Config,
        devices: D,
        manipulator: SharedManipulator,
        session: &dyn SessionIdentity,
        probe: Arc<dyn ProcessProbe>,
    ) -> Result<Self, ReceiverError> {
        let socket = bind_endpoint(
            &config.socket_path,
            session.console_user_id(),
            config.socket_group_id,
        )?;
        let dispatcher = Dispatcher::new(devices, manipulator, probe, config.monitor_interval());
        let exit = Arc::new(AtomicBool::new(false));
        let worker_exit = exit.clone();
        let worker = socket
            .set_read_timeout(Some(config.receive_timeout()))
            .and_then(|()| {
                std::thread::Builder::new()
                    .name("keygrabd-receiver".into())
                    .spawn(move || run_worker(socket, worker_exit, dispatcher))
            });
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                let _ = std::fs::remove_file(&config.socket_path);
                return Err(e.into());
            }
        };

        Ok(Self {
            socket_path: config.socket_path.clone(),
            exit,
            worker: Some(worker),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop the worker and tear everything down.
    ///
    /// Blocks until the current receive wait (at most the configured
    /// timeout) and any message being handled have completed.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = std::fs::remove_file(&self.socket_path);
        self.exit.store(true, Ordering::SeqCst);
        match worker.join() {
            Ok(mut dispatcher) => {
                dispatcher.teardown();
                info!("receiver stopped");
            }
            Err(_) => error!("receiver thread panicked"),
        }
    }
}

impl<D: DeviceOwner + 'static> Drop for Receiver<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<D: DeviceOwner>(
    socket: UnixDatagram,
    exit: Arc<AtomicBool>,
    mut dispatcher: Dispatcher<D>,
) -> Dispatcher<D> {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
    while !exit.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(n) => dispatcher.dispatch(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => error!("receive error: {}", e),
        }
        dispatcher.drain_events();
    }
    dispatcher
}

/// Bind the datagram socket at `path`, readable and writable by its owner
/// only, owned by `owner` and `group`.
fn bind_endpoint(path: &Path, owner: Option<u32>, group: u32) -> Result<UnixDatagram, ReceiverError> {
    // Remove stale socket if present.
    let _ = std::fs::remove_file(path);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(|source| ReceiverError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    let socket = UnixDatagram::bind(path).map_err(|source| ReceiverError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    info!("listening on {}", path.display());

    std::fs::set_permissions(path, Permissions::from_mode(0o600)).map_err(|source| {
        ReceiverError::Permissions {
            path: path.to_path_buf(),
            source,
        }
    })?;

    match owner {
        Some(uid) => {
            if let Err(e) = std::os::unix::fs::chown(path, Some(uid), Some(group)) {
                warn!("failed to chown {} to {}:{}: {}", path.display(), uid, group, e);
            }
        }
        None => warn!("no console user, {} keeps its current owner", path.display()),
    }
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_code::KeyCode;
    use crate::manipulator::EventManipulator;
    use crate::protocol::{LedState, Operation, SystemPreferencesValues};
    use crate::session::StaticSession;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Grab,
        Ungrab,
        Led(LedState),
    }

    /// Records device calls into a log shared with the test.
    #[derive(Clone, Default)]
    struct RecordingDevices {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl RecordingDevices {
        fn count(&self, call: Call) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("mock error")]
    struct MockError;

    impl DeviceOwner for RecordingDevices {
        type Error = MockError;

        fn grab_all(&mut self) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::Grab);
            Ok(())
        }

        fn ungrab_all(&mut self) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::Ungrab);
            Ok(())
        }

        fn set_caps_lock_led_state(&mut self, state: LedState) -> Result<(), MockError> {
            self.calls.lock().unwrap().push(Call::Led(state));
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedProbe {
        alive: Mutex<HashSet<i32>>,
    }

    impl ScriptedProbe {
        fn spawn(&self, pid: i32) {
            self.alive.lock().unwrap().insert(pid);
        }

        fn kill(&self, pid: i32) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessProbe for ScriptedProbe {
        fn is_alive(&self, pid: i32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }

    const TICK: Duration = Duration::from_millis(10);

    struct Fixture {
        dispatcher: Dispatcher<RecordingDevices>,
        devices: RecordingDevices,
        manipulator: SharedManipulator,
        probe: Arc<ScriptedProbe>,
    }

    fn fixture() -> Fixture {
        let devices = RecordingDevices::default();
        let manipulator = EventManipulator::new().shared();
        let probe = Arc::new(ScriptedProbe::default());
        let dispatcher = Dispatcher::new(devices.clone(), manipulator.clone(), probe.clone(), TICK);
        Fixture {
            dispatcher,
            devices,
            manipulator,
            probe,
        }
    }

    fn key(name: &str) -> KeyCode {
        KeyCode::from_name(name).unwrap()
    }

    /// Poll `drain_events` until `cond` holds or a second passes.
    fn drain_until(d: &mut Dispatcher<RecordingDevices>, cond: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            d.drain_events();
            if cond() {
                return true;
            }
            std::thread::sleep(TICK);
        }
        false
    }

    fn console_connect(pid: i32) -> Vec<u8> {
        Message::Connect { peer_class: PeerClass::ConsoleUserServer, pid }.encode()
    }

    #[test]
    fn console_user_server_connect_grabs_once_and_exit_ungrabs_once() {
        let mut f = fixture();
        f.probe.spawn(10);
        f.dispatcher.dispatch(&console_connect(10));
        assert_eq!(f.devices.count(Call::Grab), 1);
        assert_eq!(f.dispatcher.monitored_pid(), Some(10));

        f.probe.kill(10);
        let devices = f.devices.clone();
        assert!(drain_until(&mut f.dispatcher, || devices.count(Call::Ungrab) == 1));
        assert_eq!(f.dispatcher.monitored_pid(), None);

        std::thread::sleep(TICK * 5);
        f.dispatcher.drain_events();
        assert_eq!(f.devices.count(Call::Ungrab), 1);
    }

    #[test]
    fn newer_console_user_server_replaces_monitor() {
        let mut f = fixture();
        f.probe.spawn(10);
        f.probe.spawn(11);
        f.dispatcher.dispatch(&console_connect(10));
        f.dispatcher.dispatch(&console_connect(11));
        assert_eq!(f.devices.count(Call::Grab), 2);
        assert_eq!(f.dispatcher.monitored_pid(), Some(11));

        f.probe.kill(10);
        std::thread::sleep(TICK * 10);
        f.dispatcher.drain_events();
        assert_eq!(f.devices.count(Call::Ungrab), 0);

        f.probe.kill(11);
        let devices = f.devices.clone();
        assert!(drain_until(&mut f.dispatcher, || devices.count(Call::Ungrab) == 1));
    }

    #[test]
    fn stale_exit_event_is_ignored() {
        let mut f = fixture();
        f.probe.spawn(10);
        f.probe.spawn(11);
        f.dispatcher.dispatch(&console_connect(10));
        let old_generation = f.dispatcher.generation;
        f.dispatcher.dispatch(&console_connect(11));

        // Simulate the old monitor firing in the middle of the swap.
        f.dispatcher
            .events_tx
            .send(PeerEvent::ConsoleUserServerExited { generation: old_generation })
            .unwrap();
        f.dispatcher.drain_events();
        assert_eq!(f.devices.count(Call::Ungrab), 0);
        assert_eq!(f.dispatcher.monitored_pid(), Some(11));
    }

    #[test]
    fn event_dispatcher_connect_sets_flag_without_grab() {
        let mut f = fixture();
        f.dispatcher.dispatch(
            &Message::Connect { peer_class: PeerClass::EventDispatcher, pid: 5 }.encode(),
        );
        assert!(f.manipulator.lock().is_event_dispatcher_connected());
        assert_eq!(f.devices.count(Call::Grab), 0);
        assert_eq!(f.dispatcher.monitored_pid(), None);
    }

    #[test]
    fn rule_messages_mutate_tables() {
        let mut f = fixture();
        f.dispatcher.handle(Message::AddSimpleModification { from: key("caps_lock"), to: key("escape") });
        f.dispatcher.handle(Message::AddFnFunctionKey { from: key("f1"), to: key("mute") });
        f.dispatcher.handle(Message::AddStandaloneModifier { from: key("left_control"), to: key("escape") });
        {
            let m = f.manipulator.lock();
            assert_eq!(m.simple_modification_for(key("caps_lock")), Some(key("escape")));
            assert_eq!(m.fn_function_key_for(key("f1")), Some(key("mute")));
            assert_eq!(m.standalone_modifier_for(key("left_control")), Some(key("escape")));
        }

        f.dispatcher.handle(Message::ClearSimpleModifications);
        f.dispatcher.handle(Message::ClearFnFunctionKeys);
        f.dispatcher.handle(Message::ClearStandaloneModifiers);
        let m = f.manipulator.lock();
        assert!(m.simple_modifications().is_empty());
        assert!(m.fn_function_keys().is_empty());
        assert!(m.standalone_modifiers().is_empty());
    }

    #[test]
    fn short_message_leaves_state_unchanged() {
        let mut f = fixture();
        let bytes = Message::AddSimpleModification { from: key("a"), to: key("b") }.encode();
        f.dispatcher.dispatch(&bytes[..bytes.len() - 1]);
        f.dispatcher.dispatch(&console_connect(3)[..4]);
        f.dispatcher.dispatch(&[Operation::SetCapsLockLedState as u8]);
        assert!(f.manipulator.lock().simple_modifications().is_empty());
        assert!(f.devices.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unknown_operation_is_ignored() {
        let mut f = fixture();
        f.dispatcher.dispatch(&[200, 1, 2, 3]);
        assert!(f.devices.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn preferences_and_led_are_forwarded() {
        let mut f = fixture();
        let values = SystemPreferencesValues { version: 1, keyboard_fn_state: true };
        f.dispatcher.dispatch(&Message::SystemPreferencesValuesUpdated(values).encode());
        f.dispatcher.dispatch(&Message::SetCapsLockLedState(LedState::On).encode());
        assert_eq!(f.manipulator.lock().system_preferences_values(), Some(values));
        assert_eq!(f.devices.count(Call::Led(LedState::On)), 1);
    }

    #[test]
    fn teardown_returns_to_inert_state() {
        let mut f = fixture();
        f.probe.spawn(10);
        f.dispatcher.dispatch(&console_connect(10));
        for _ in 0..5 {
            f.dispatcher.handle(Message::AddSimpleModification { from: key("a"), to: key("b") });
            f.dispatcher.handle(Message::AddFnFunctionKey { from: key("f2"), to: key("f3") });
            f.dispatcher.handle(Message::AddStandaloneModifier { from: key("fn"), to: key("escape") });
        }
        f.dispatcher.teardown();

        assert_eq!(f.dispatcher.monitored_pid(), None);
        assert_eq!(f.devices.calls.lock().unwrap().last(), Some(&Call::Ungrab));
        let m = f.manipulator.lock();
        assert!(m.simple_modifications().is_empty());
        assert!(m.fn_function_keys().is_empty());
        assert!(m.standalone_modifiers().is_empty());
    }

    /// Monotonic counter to generate unique socket paths per test.
    static TEST_ID: AtomicU32 = AtomicU32::new(0);

    fn tmp_socket_path() -> PathBuf {
        let id = TEST_ID.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!("keygrabd-test-{}-{}.sock", std::process::id(), id))
    }

    fn test_config(path: &Path) -> Config {
        Config {
            socket_path: path.to_path_buf(),
            receive_timeout_ms: 20,
            monitor_interval_ms: 10,
            ..Config::default()
        }
    }

    #[test]
    fn socket_is_owner_only_and_removed_on_shutdown() {
        let path = tmp_socket_path();
        let receiver = Receiver::start(
            &test_config(&path),
            RecordingDevices::default(),
            EventManipulator::new().shared(),
            &StaticSession(None),
            Arc::new(ScriptedProbe::default()),
        )
        .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        receiver.shutdown();
        assert!(!path.exists());
    }

    #[test]
    fn datagrams_reach_the_dispatcher() {
        let path = tmp_socket_path();
        let devices = RecordingDevices::default();
        let manipulator = EventManipulator::new().shared();
        let receiver = Receiver::start(
            &test_config(&path),
            devices.clone(),
            manipulator.clone(),
            &StaticSession(None),
            Arc::new(ScriptedProbe::default()),
        )
        .unwrap();

        let client = UnixDatagram::unbound().unwrap();
        let msg = Message::AddSimpleModification { from: key("caps_lock"), to: key("escape") };
        client.send_to(&msg.encode(), &path).unwrap();
        client.send_to(&Message::SetCapsLockLedState(LedState::Off).encode(), &path).unwrap();

        let mut delivered = false;
        for _ in 0..100 {
            if devices.count(Call::Led(LedState::Off)) == 1 {
                delivered = true;
                break;
            }
            std::thread::sleep(TICK);
        }
        assert!(delivered);
        assert_eq!(manipulator.lock().simple_modifications().len(), 1);

        receiver.shutdown();
        assert!(manipulator.lock().simple_modifications().is_empty());
        assert_eq!(devices.calls.lock().unwrap().last(), Some(&Call::Ungrab));
    }

    #[test]
    fn failed_start_after_bind_removes_socket() {
        let path = tmp_socket_path();
        let config = Config {
            receive_timeout_ms: 0,
            ..test_config(&path)
        };
        let result = Receiver::start(
            &config,
            RecordingDevices::default(),
            EventManipulator::new().shared(),
            &StaticSession(None),
            Arc::new(ScriptedProbe::default()),
        );
        assert!(matches!(result, Err(ReceiverError::Io(_))));
        assert!(!path.exists());
    }

    #[test]
    fn bind_failure_is_fatal() {
        let result = Receiver::start(
            &test_config(Path::new("/proc/keygrabd/forbidden.sock")),
            RecordingDevices::default(),
            EventManipulator::new().shared(),
            &StaticSession(None),
            Arc::new(ScriptedProbe::default()),
        );
        assert!(matches!(result, Err(ReceiverError::Bind { .. })));
    }
}
