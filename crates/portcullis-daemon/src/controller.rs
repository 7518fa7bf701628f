//! Identification controller driver
//!
//! Runs the [`Machine`] on one task. Keypad presses and triggers arrive through
//! a [`ControllerHandle`]; sensor reads, KDF work and timers run as separate
//! tasks and report back over the same channel as machine inputs. State
//! changes are broadcast for feedback adapters and each session's
//! [`RecognitionEvent`](portcullis_core::RecognitionEvent) goes to the
//! [`RecognitionSink`].
//!
//! The PIN lockout throttle is owned by this task. It is consulted before any
//! KDF work starts and updated as verdicts come back. Rejected PINs, codes and
//! PIN registrations all count toward it.
//!
//! While idle the controller also deletes removed users' templates from the
//! sensor, working through the queue the credential store keeps.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use portcullis_core::{ControllerState, Error, Key, UserId};
use portcullis_vault::{CredentialStore, LockoutPolicy, PinThrottle};

use crate::config::ControllerConfig;
use crate::enrollment::EnrollmentService;
use crate::error::{DaemonError, Result};
use crate::machine::{Command, Input, KeypadSecret, Machine, PinVerdict, RegistrationVerdict};
use crate::recorder::RecognitionSink;
use crate::sensor::{BiometricSensor, SensorReading};

const INPUT_QUEUE_DEPTH: usize = 32;
const STATE_QUEUE_DEPTH: usize = 32;

/// Sending side of the controller, for keypad and presence adapters
#[derive(Clone)]
pub struct ControllerHandle {
    inputs: mpsc::Sender<Input>,
    states: broadcast::Sender<ControllerState>,
}

impl ControllerHandle {
    /// Deliver a key press
    pub async fn press(&self, key: Key) -> Result<()> {
        self.send(Input::Key(key)).await
    }

    /// Signal that someone is standing at the unit
    pub async fn trigger(&self) -> Result<()> {
        self.send(Input::Trigger).await
    }

    /// Subscribe to controller state changes
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerState> {
        self.states.subscribe()
    }

    async fn send(&self, input: Input) -> Result<()> {
        self.inputs
            .send(input)
            .await
            .map_err(|_| DaemonError::ControllerStopped)
    }
}

/// The identification controller
pub struct Controller {
    machine: Machine,
    throttle: PinThrottle,
    store: Arc<CredentialStore>,
    enrollment: Arc<EnrollmentService>,
    sensor: Arc<dyn BiometricSensor>,
    sink: Arc<dyn RecognitionSink>,

    inputs: mpsc::Receiver<Input>,
    /// Weak so the controller stops once every handle is dropped
    reports: mpsc::WeakSender<Input>,
    states: broadcast::Sender<ControllerState>,

    sensor_task: Option<JoinHandle<()>>,
    entry_timer: Option<JoinHandle<()>>,
    cooldown_timer: Option<JoinHandle<()>>,
}

impl Controller {
    /// Build a controller and the handle that feeds it
    pub fn new(
        config: ControllerConfig,
        lockout: LockoutPolicy,
        store: Arc<CredentialStore>,
        enrollment: Arc<EnrollmentService>,
        sensor: Arc<dyn BiometricSensor>,
        sink: Arc<dyn RecognitionSink>,
    ) -> Result<(Self, ControllerHandle)> {
        config.validate()?;

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_DEPTH);
        let (state_tx, _) = broadcast::channel(STATE_QUEUE_DEPTH);

        let controller = Self {
            machine: Machine::new(config),
            throttle: PinThrottle::new(lockout),
            store,
            enrollment,
            sensor,
            sink,
            inputs: input_rx,
            reports: input_tx.downgrade(),
            states: state_tx.clone(),
            sensor_task: None,
            entry_timer: None,
            cooldown_timer: None,
        };

        let handle = ControllerHandle {
            inputs: input_tx,
            states: state_tx,
        };

        Ok((controller, handle))
    }

    /// Process inputs until every [`ControllerHandle`] is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Identification controller started (sensor: {})",
            self.sensor.device_type()
        );
        let _ = self.states.send(self.machine.state());

        let mut sweep = tokio::time::interval(self.machine.config().template_sweep());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(input) => self.dispatch(input),
                    None => break,
                },
                _ = sweep.tick() => {
                    // Never touch the sensor mid-session
                    if self.machine.state() == ControllerState::Idle {
                        sweep_templates(Arc::clone(&self.store), Arc::clone(&self.sensor)).await;
                    }
                }
            }
        }

        self.abort_tasks();
        info!("Identification controller stopped");
        Ok(())
    }

    fn dispatch(&mut self, input: Input) {
        let mut queue = VecDeque::from([self.apply_throttle(input)]);

        while let Some(input) = queue.pop_front() {
            for command in self.machine.handle(input) {
                if let Some(follow_up) = self.execute(command) {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    /// Feed PIN, code and registration verdicts into the lockout throttle
    fn apply_throttle(&mut self, input: Input) -> Input {
        match input {
            Input::PinChecked(PinVerdict::Accepted(_)) => {
                self.throttle.record_success();
                input
            }
            Input::PinChecked(PinVerdict::Rejected) => match self.record_failure() {
                Some(remaining_secs) => Input::PinChecked(PinVerdict::LockedOut { remaining_secs }),
                None => input,
            },
            Input::TokenChecked(None) => {
                self.record_failure();
                input
            }
            // A taken PIN is another user's PIN, so it is a guess like any other
            Input::PinRegistered(RegistrationVerdict::Rejected) => match self.record_failure() {
                Some(remaining_secs) => {
                    Input::PinRegistered(RegistrationVerdict::LockedOut { remaining_secs })
                }
                None => input,
            },
            other => other,
        }
    }

    fn record_failure(&mut self) -> Option<u64> {
        let lockout = self.throttle.record_failure(Instant::now())?;
        warn!(
            "Keypad locked after {} failed attempts: {}",
            self.throttle.consecutive_failures(),
            self.throttle
                .policy()
                .describe_lockout(self.throttle.consecutive_failures())
        );
        Some(lockout.as_secs().max(1))
    }

    /// Carry out one command; some complete at once and yield an input
    fn execute(&mut self, command: Command) -> Option<Input> {
        match command {
            Command::Publish(state) => {
                // No subscribers is fine
                let _ = self.states.send(state);
            }
            Command::ReadFingerprint => self.start_fingerprint_read(),
            Command::CancelSensor => {
                if let Some(task) = self.sensor_task.take() {
                    debug!("Cancelling sensor operation");
                    task.abort();
                }
            }
            Command::VerifyPin { pin, candidate } => {
                if let Err(Error::LockedOut { remaining_secs }) =
                    self.throttle.check(Instant::now())
                {
                    warn!("PIN attempt refused, locked for {}s", remaining_secs);
                    return Some(Input::PinChecked(PinVerdict::LockedOut { remaining_secs }));
                }
                self.verify_pin(pin, candidate);
            }
            Command::RedeemToken { code } => {
                if let Err(Error::LockedOut { remaining_secs }) =
                    self.throttle.check(Instant::now())
                {
                    warn!("Registration code refused, locked for {}s", remaining_secs);
                    return Some(Input::TokenChecked(None));
                }
                self.redeem_token(code);
            }
            Command::EnrollFingerprint { user_id } => self.enroll_fingerprint(user_id),
            Command::RegisterPin { user_id, pin } => {
                if let Err(Error::LockedOut { remaining_secs }) =
                    self.throttle.check(Instant::now())
                {
                    warn!("PIN registration refused, locked for {}s", remaining_secs);
                    return Some(Input::PinRegistered(RegistrationVerdict::LockedOut {
                        remaining_secs,
                    }));
                }
                self.register_pin(user_id, pin);
            }
            Command::ArmEntryTimeout { generation } => {
                let delay = self.machine.config().pin_entry_timeout();
                let timer = self.spawn_timer(delay, Input::EntryTimeout { generation });
                if let Some(old) = std::mem::replace(&mut self.entry_timer, timer) {
                    old.abort();
                }
            }
            Command::ArmCooldown { generation } => {
                if let Some(old) = self.entry_timer.take() {
                    old.abort();
                }
                let delay = self.machine.config().cooldown();
                let timer = self.spawn_timer(delay, Input::CooldownElapsed { generation });
                if let Some(old) = std::mem::replace(&mut self.cooldown_timer, timer) {
                    old.abort();
                }
            }
            Command::Emit(event) => self.sink.on_recognition_event(event),
        }
        None
    }

    fn start_fingerprint_read(&mut self) {
        let sensor = Arc::clone(&self.sensor);
        let store = Arc::clone(&self.store);
        let timeout = self.machine.config().sensor_timeout();

        let task = self.spawn_report(async move {
            match sensor.read_fingerprint(timeout).await {
                Ok(SensorReading::Match(found)) => match tokio::task::spawn_blocking(move || {
                    store.user_for_template(found.id)
                })
                .await
                {
                    Ok(Ok(user_id)) => {
                        debug!(
                            "Template {} matched (confidence {}) -> {:?}",
                            found.id, found.confidence, user_id
                        );
                        Input::FingerMatched {
                            user_id,
                            confidence: found.confidence,
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Template lookup failed: {}", e);
                        Input::FingerMatched {
                            user_id: None,
                            confidence: found.confidence,
                        }
                    }
                    Err(e) => {
                        error!("Template lookup task failed: {}", e);
                        Input::FingerMatched {
                            user_id: None,
                            confidence: found.confidence,
                        }
                    }
                },
                Ok(SensorReading::NoMatch) => Input::FingerNotMatched,
                Err(fault) => {
                    warn!("Fingerprint read failed: {}", fault);
                    Input::SensorFault
                }
            }
        });
        self.replace_sensor_task(task);
    }

    fn verify_pin(&mut self, pin: KeypadSecret, candidate: Option<UserId>) {
        let store = Arc::clone(&self.store);
        self.spawn_report(async move {
            let verdict =
                match tokio::task::spawn_blocking(move || check_pin(&store, &pin, candidate)).await
                {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        error!("PIN verification task failed: {}", e);
                        PinVerdict::StoreFailure
                    }
                };
            Input::PinChecked(verdict)
        });
    }

    fn redeem_token(&mut self, code: KeypadSecret) {
        let store = Arc::clone(&self.store);
        self.spawn_report(async move {
            let redeemed =
                tokio::task::spawn_blocking(move || store.redeem_registration_token(code.expose()))
                    .await;
            let user_id = match redeemed {
                Ok(Ok(user_id)) => Some(user_id),
                Ok(Err(e)) if e.is_fault() => {
                    error!("Credential store failed during code redemption: {}", e);
                    None
                }
                Ok(Err(e)) => {
                    warn!("Registration code rejected: {}", e);
                    None
                }
                Err(e) => {
                    error!("Code redemption task failed: {}", e);
                    None
                }
            };
            Input::TokenChecked(user_id)
        });
    }

    fn enroll_fingerprint(&mut self, user_id: UserId) {
        let sensor = Arc::clone(&self.sensor);
        let enrollment = Arc::clone(&self.enrollment);
        let timeout = self.machine.config().enrollment_timeout();

        let task = self.spawn_report(async move {
            let enrolled = match sensor.enroll_fingerprint(user_id, timeout).await {
                Ok(template) => match tokio::task::spawn_blocking(move || {
                    enrollment.fingerprint_enrolled(user_id, template)
                })
                .await
                {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => {
                        error!("Could not record template for user {}: {}", user_id, e);
                        false
                    }
                    Err(e) => {
                        error!("Template recording task failed: {}", e);
                        false
                    }
                },
                Err(fault) => {
                    warn!("Fingerprint capture for user {} failed: {}", user_id, fault);
                    false
                }
            };
            Input::FingerprintEnrolled(enrolled)
        });
        self.replace_sensor_task(task);
    }

    fn register_pin(&mut self, user_id: UserId, pin: KeypadSecret) {
        let store = Arc::clone(&self.store);
        self.spawn_report(async move {
            let stored =
                tokio::task::spawn_blocking(move || store.register_pin(user_id, pin.expose()))
                    .await;
            let verdict = match stored {
                Ok(Ok(())) => RegistrationVerdict::Stored,
                Ok(Err(e @ (Error::WeakPin(_) | Error::PinTaken))) => {
                    info!("PIN for user {} refused: {}", user_id, e);
                    RegistrationVerdict::Rejected
                }
                Ok(Err(e)) => {
                    error!("Could not store PIN for user {}: {}", user_id, e);
                    RegistrationVerdict::StoreFailure
                }
                Err(e) => {
                    error!("PIN registration task failed: {}", e);
                    RegistrationVerdict::StoreFailure
                }
            };
            Input::PinRegistered(verdict)
        });
    }

    /// Run `work` and feed its result back to the controller
    fn spawn_report<F>(&self, work: F) -> Option<JoinHandle<()>>
    where
        F: Future<Output = Input> + Send + 'static,
    {
        let reports = self.reports.upgrade()?;
        Some(tokio::spawn(async move {
            let input = work.await;
            let _ = reports.send(input).await;
        }))
    }

    fn spawn_timer(&self, delay: Duration, input: Input) -> Option<JoinHandle<()>> {
        self.spawn_report(async move {
            tokio::time::sleep(delay).await;
            input
        })
    }

    fn replace_sensor_task(&mut self, task: Option<JoinHandle<()>>) {
        if let Some(old) = std::mem::replace(&mut self.sensor_task, task) {
            old.abort();
        }
    }

    fn abort_tasks(&mut self) {
        for task in [
            self.sensor_task.take(),
            self.entry_timer.take(),
            self.cooldown_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

/// Delete the templates of removed users from the sensor
///
/// A template stays queued until the sensor confirms the deletion.
async fn sweep_templates(store: Arc<CredentialStore>, sensor: Arc<dyn BiometricSensor>) {
    let reader = Arc::clone(&store);
    let orphaned = match tokio::task::spawn_blocking(move || reader.orphaned_templates()).await {
        Ok(Ok(orphaned)) => orphaned,
        Ok(Err(e)) => {
            warn!("Could not read orphaned templates: {}", e);
            return;
        }
        Err(e) => {
            error!("Template sweep task failed: {}", e);
            return;
        }
    };

    for template in orphaned {
        if let Err(fault) = sensor.delete_template(template).await {
            warn!("Could not delete template {}: {}", template, fault);
            continue;
        }

        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.template_deleted(template)).await {
            Ok(Ok(())) => info!("Deleted template {} of a removed user", template),
            Ok(Err(e)) => warn!("Template {} deleted but still queued: {}", template, e),
            Err(e) => error!("Template sweep task failed: {}", e),
        }
    }
}

/// Check a PIN against the candidate, or against every user without one
fn check_pin(store: &CredentialStore, pin: &KeypadSecret, candidate: Option<UserId>) -> PinVerdict {
    let result = match candidate {
        Some(user_id) => store
            .verify_pin(user_id, pin.expose())
            .map(|ok| ok.then_some(user_id)),
        None => store.identify_by_pin(pin.expose()),
    };

    match result {
        Ok(Some(user_id)) => PinVerdict::Accepted(user_id),
        Ok(None) | Err(Error::UnknownUser) => {
            warn!("PIN rejected");
            PinVerdict::Rejected
        }
        Err(e) => {
            error!("Credential store failed during PIN check: {}", e);
            PinVerdict::StoreFailure
        }
    }
}
