// src/dispatch.rs - The classify-and-fire loop
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::actions::ActionRegistry;
use crate::data::{DispatchRecord, Outcome, SessionRecorder};
use crate::error::PerceptionError;
use crate::gesture::{classify, Gesture};
use crate::landmarks::Observation;
use crate::trigger::{DispatchState, TriggerPolicy};
use crate::video::FrameSource;

const TIMING_WINDOW: usize = 30;

/// Shared stop flag, checked once per cycle.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Cancelled,
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    pub cycles: u64,
    pub hands_seen: u64,
    pub fired: HashMap<Gesture, u64>,
    pub failures: u64,
    pub suppressed: u64,
    pub unregistered: u64,
    pub avg_cycle_time: f32,
    pub avg_fps: f32,
    cycle_times: VecDeque<f32>,
}

impl LoopStats {
    pub fn fired_count(&self, gesture: Gesture) -> u64 {
        self.fired.get(&gesture).copied().unwrap_or(0)
    }

    pub fn total_fired(&self) -> u64 {
        self.fired.values().sum()
    }

    fn record_cycle_time(&mut self, elapsed: Duration) {
        self.cycle_times.push_front(elapsed.as_secs_f32());
        if self.cycle_times.len() > TIMING_WINDOW {
            self.cycle_times.pop_back();
        }

        self.avg_cycle_time =
            self.cycle_times.iter().sum::<f32>() / self.cycle_times.len() as f32;
        self.avg_fps = if self.avg_cycle_time > 0.0 {
            1.0 / self.avg_cycle_time
        } else {
            0.0
        };
    }
}

/// Result of dispatching one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub gesture: Gesture,
    pub outcome: Outcome,
    pub action: Option<String>,
}

pub struct DispatchLoop {
    registry: ActionRegistry,
    policy: TriggerPolicy,
    state: DispatchState,
    stats: LoopStats,
    recorder: Option<SessionRecorder>,
    started: Instant,
}

impl DispatchLoop {
    pub fn new(registry: ActionRegistry, policy: TriggerPolicy) -> Self {
        for gesture in registry.unbound() {
            warn!("No action registered for gesture `{}`", gesture);
        }

        Self {
            registry,
            policy,
            state: DispatchState::default(),
            stats: LoopStats::default(),
            recorder: None,
            started: Instant::now(),
        }
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    #[cfg(test)]
    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn recorder(&self) -> Option<&SessionRecorder> {
        self.recorder.as_ref()
    }

    /// Classifies one observation and fires its action if the policy allows.
    pub fn step(&mut self, observation: &Observation) -> CycleReport {
        let hand = observation.hand();
        let gesture = classify(hand);
        let now = Instant::now();

        let (outcome, action) = if gesture.is_none() {
            (Outcome::Idle, None)
        } else if !self.policy.admits(gesture, &self.state, now) {
            self.stats.suppressed += 1;
            (Outcome::Suppressed, None)
        } else {
            match self.registry.resolve(gesture) {
                Err(e) => {
                    error!("{}; check the action bindings", e);
                    self.stats.unregistered += 1;
                    (Outcome::Unregistered, None)
                }
                Ok(action) => {
                    self.state.last_fired = Some(now);
                    let label = Some(action.label().to_string());
                    match action.invoke() {
                        Ok(()) => {
                            *self.stats.fired.entry(gesture).or_insert(0) += 1;
                            (Outcome::Fired, label)
                        }
                        Err(e) => {
                            warn!("{} failed: {}", action.label(), e);
                            self.stats.failures += 1;
                            (Outcome::Failed, label)
                        }
                    }
                }
            }
        };

        self.state.last_gesture = gesture;

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.add(DispatchRecord {
                cycle: self.stats.cycles,
                elapsed_secs: now.duration_since(self.started).as_secs_f64(),
                hand_present: hand.is_some(),
                gesture,
                action: action.clone(),
                outcome,
            });
        }

        self.stats.cycles += 1;
        if hand.is_some() {
            self.stats.hands_seen += 1;
        }

        CycleReport {
            gesture,
            outcome,
            action,
        }
    }

    /// Drives the loop until the source runs dry, `cancel` is set, or perception fails.
    /// The source is owned here so it is released on every exit path.
    pub fn run<S: FrameSource>(
        &mut self,
        mut source: S,
        cancel: &CancelToken,
    ) -> Result<ExitReason, PerceptionError> {
        self.state.reset();
        self.started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                info!("Stop requested, leaving dispatch loop");
                return Ok(ExitReason::Cancelled);
            }

            let cycle_start = Instant::now();
            let Some(observation) = source.next_observation()? else {
                info!("Frame source exhausted");
                return Ok(ExitReason::Exhausted);
            };

            // Acquisition may block for a while; honour a stop that arrived meanwhile.
            if cancel.is_cancelled() {
                info!("Stop requested, leaving dispatch loop");
                return Ok(ExitReason::Cancelled);
            }

            let report = self.step(&observation);
            if report.outcome != Outcome::Idle {
                debug!(
                    "{} -> {:?} ({})",
                    report.gesture,
                    report.outcome,
                    report.action.as_deref().unwrap_or("no action")
                );
            }
            self.stats.record_cycle_time(cycle_start.elapsed());
        }
    }

    pub fn log_summary(&self) {
        let stats = &self.stats;
        info!(
            "Processed {} cycles ({} with a hand), fired {} actions, {} failed, {} suppressed, {} unregistered",
            stats.cycles,
            stats.hands_seen,
            stats.total_fired(),
            stats.failures,
            stats.suppressed,
            stats.unregistered
        );
        for gesture in Gesture::ACTIONABLE {
            let count = stats.fired_count(gesture);
            if count > 0 {
                info!("  {}: {}", gesture, count);
            }
        }
        if stats.cycles > 0 {
            info!(
                "Average cycle {:.1} ms ({:.1} fps)",
                stats.avg_cycle_time * 1000.0,
                stats.avg_fps
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionRegistry};
    use crate::effector::{DeviceCommand, Effector, QueuedEffector};
    use crate::error::EffectorFailure;
    use crate::gesture::hand;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type CommandLog = Arc<Mutex<Vec<DeviceCommand>>>;

    fn recording_registry(log: &CommandLog) -> ActionRegistry {
        ActionRegistry::standard(|command| {
            let log = Arc::clone(log);
            Box::new(move || -> Result<(), EffectorFailure> {
                log.lock().unwrap().push(command);
                Ok(())
            }) as Box<dyn Effector>
        })
        .unwrap()
    }

    fn fist() -> Observation {
        Observation::Hand(hand(0.5, 0.3, 0.6, 0.35))
    }

    fn palm() -> Observation {
        Observation::Hand(hand(0.5, 0.6, 0.4, 0.6))
    }

    fn screenshot() -> Observation {
        Observation::Hand(hand(0.5, 0.52, 0.55, 0.50))
    }

    fn flash() -> Observation {
        Observation::Hand(hand(0.5, 0.5, 0.45, 0.70))
    }

    fn open_hand() -> Observation {
        Observation::Hand(hand(0.5, 0.5, 0.7, 0.8))
    }

    /// In-memory source; flips `released` when dropped.
    struct ScriptedSource {
        frames: VecDeque<Result<Observation, PerceptionError>>,
        released: Arc<AtomicBool>,
        cancel_after: Option<(usize, CancelToken)>,
        served: usize,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Observation>) -> Self {
            Self {
                frames: frames.into_iter().map(Ok).collect(),
                released: Arc::new(AtomicBool::new(false)),
                cancel_after: None,
                served: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_observation(&mut self) -> Result<Option<Observation>, PerceptionError> {
            self.served += 1;
            if let Some((n, token)) = &self.cancel_after {
                if self.served > *n {
                    token.cancel();
                }
            }
            self.frames.pop_front().transpose()
        }
    }

    impl Drop for ScriptedSource {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fires_every_cycle_the_gesture_holds() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle);
        let source = ScriptedSource::new(vec![fist(), fist(), Observation::NoHand]);

        let reason = dispatcher.run(source, &CancelToken::new()).unwrap();

        assert_eq!(reason, ExitReason::Exhausted);
        assert_eq!(*log.lock().unwrap(), vec![DeviceCommand::ZoomIn, DeviceCommand::ZoomIn]);
        assert_eq!(dispatcher.stats().cycles, 3);
        assert_eq!(dispatcher.stats().hands_seen, 2);
        assert_eq!(dispatcher.stats().fired_count(Gesture::Fist), 2);
        assert_eq!(dispatcher.state().last_gesture, Gesture::None);
    }

    #[test]
    fn test_each_gesture_maps_to_its_command() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle);
        let source = ScriptedSource::new(vec![fist(), palm(), screenshot(), flash(), open_hand()]);

        dispatcher.run(source, &CancelToken::new()).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                DeviceCommand::ZoomIn,
                DeviceCommand::ZoomOut,
                DeviceCommand::TakeScreenshot,
                DeviceCommand::FlashlightOn,
            ]
        );
    }

    #[test]
    fn test_malformed_frame_fires_nothing() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle);

        let report = dispatcher.step(&Observation::Hand(Default::default()));

        assert_eq!(report.gesture, Gesture::None);
        assert_eq!(report.outcome, Outcome::Idle);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().hands_seen, 1);
    }

    #[test]
    fn test_effector_failure_does_not_stop_the_loop() {
        let calls = Arc::new(Mutex::new(0));
        let counted = Arc::clone(&calls);
        let registry = ActionRegistry::builder()
            .register(
                Gesture::Fist,
                Action::new(
                    "Zooming In",
                    Box::new(move || -> Result<(), EffectorFailure> {
                        *counted.lock().unwrap() += 1;
                        Err(EffectorFailure::ExitStatus {
                            command: "adb shell input keyevent KEYCODE_VOLUME_UP".to_string(),
                            status: "exit status: 1".to_string(),
                            stderr: "error: no devices/emulators found".to_string(),
                        })
                    }),
                ),
            )
            .unwrap()
            .build();
        let mut dispatcher = DispatchLoop::new(registry, TriggerPolicy::EveryCycle);

        let reason = dispatcher
            .run(ScriptedSource::new(vec![fist(), fist(), fist()]), &CancelToken::new())
            .unwrap();

        assert_eq!(reason, ExitReason::Exhausted);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(dispatcher.stats().failures, 3);
        assert_eq!(dispatcher.stats().total_fired(), 0);
    }

    #[test]
    fn test_unregistered_gesture_is_skipped() {
        let log = CommandLog::default();
        let inner = Arc::clone(&log);
        let registry = ActionRegistry::builder()
            .register(
                Gesture::Palm,
                Action::new(
                    "Zooming Out",
                    Box::new(move || -> Result<(), EffectorFailure> {
                        inner.lock().unwrap().push(DeviceCommand::ZoomOut);
                        Ok(())
                    }),
                ),
            )
            .unwrap()
            .build();
        let mut dispatcher = DispatchLoop::new(registry, TriggerPolicy::EveryCycle);

        assert_eq!(dispatcher.step(&fist()).outcome, Outcome::Unregistered);
        assert_eq!(dispatcher.step(&palm()).outcome, Outcome::Fired);
        assert_eq!(dispatcher.stats().unregistered, 1);
        assert_eq!(*log.lock().unwrap(), vec![DeviceCommand::ZoomOut]);
    }

    #[test]
    fn test_on_change_fires_once_per_episode() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::OnChange);
        let source = ScriptedSource::new(vec![
            fist(),
            fist(),
            fist(),
            Observation::NoHand,
            fist(),
            palm(),
            palm(),
        ]);

        dispatcher.run(source, &CancelToken::new()).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![DeviceCommand::ZoomIn, DeviceCommand::ZoomIn, DeviceCommand::ZoomOut]
        );
        assert_eq!(dispatcher.stats().suppressed, 3);
    }

    #[test]
    fn test_cooldown_holds_back_rapid_repeats() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(
            recording_registry(&log),
            TriggerPolicy::Cooldown { cooldown_ms: 60_000 },
        );

        assert_eq!(dispatcher.step(&fist()).outcome, Outcome::Fired);
        assert_eq!(dispatcher.step(&fist()).outcome, Outcome::Suppressed);
        assert_eq!(dispatcher.step(&palm()).outcome, Outcome::Suppressed);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_before_start_fires_nothing() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle);
        let source = ScriptedSource::new(vec![fist(), fist()]);
        let released = Arc::clone(&source.released);
        let cancel = CancelToken::new();
        cancel.cancel();

        let reason = dispatcher.run(source, &cancel).unwrap();

        assert_eq!(reason, ExitReason::Cancelled);
        assert!(log.lock().unwrap().is_empty());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_mid_run() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle);
        let cancel = CancelToken::new();
        let mut source = ScriptedSource::new(vec![fist(), palm(), fist(), palm()]);
        // The stop lands while the third frame is being acquired.
        source.cancel_after = Some((2, cancel.clone()));
        let released = Arc::clone(&source.released);

        let reason = dispatcher.run(source, &cancel).unwrap();

        assert_eq!(reason, ExitReason::Cancelled);
        assert_eq!(*log.lock().unwrap(), vec![DeviceCommand::ZoomIn, DeviceCommand::ZoomOut]);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_perception_failure_is_fatal_and_releases_source() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle);
        let mut source = ScriptedSource::new(vec![fist()]);
        source
            .frames
            .push_back(Err(PerceptionError::Camera("device unplugged".to_string())));
        source.frames.push_back(Ok(fist()));
        let released = Arc::clone(&source.released);

        let result = dispatcher.run(source, &CancelToken::new());

        assert!(matches!(result, Err(PerceptionError::Camera(_))));
        assert_eq!(*log.lock().unwrap(), vec![DeviceCommand::ZoomIn]);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_resets_state() {
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::OnChange);
        dispatcher.step(&fist());
        assert_eq!(dispatcher.state().last_gesture, Gesture::Fist);

        dispatcher
            .run(ScriptedSource::new(vec![fist()]), &CancelToken::new())
            .unwrap();

        // A fresh run starts from NONE, so the held fist fires again.
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_recorder_captures_each_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let log = CommandLog::default();
        let mut dispatcher = DispatchLoop::new(recording_registry(&log), TriggerPolicy::EveryCycle)
            .with_recorder(SessionRecorder::new(temp_dir.path(), Some("test".to_string())));

        dispatcher
            .run(
                ScriptedSource::new(vec![fist(), Observation::NoHand, palm()]),
                &CancelToken::new(),
            )
            .unwrap();

        let records = dispatcher.recorder().unwrap().records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].gesture, Gesture::Fist);
        assert_eq!(records[0].action.as_deref(), Some("Zooming In"));
        assert_eq!(records[1].outcome, Outcome::Idle);
        assert!(!records[1].hand_present);
        assert_eq!(records[2].cycle, 2);
        assert_eq!(records[2].outcome, Outcome::Fired);
    }

    #[test]
    fn test_stopping_discards_queued_backlog() {
        let ran = Arc::new(Mutex::new(0));
        let counted = Arc::clone(&ran);
        let slow = QueuedEffector::spawn(
            "zoom_in",
            Box::new(move || -> Result<(), EffectorFailure> {
                std::thread::sleep(Duration::from_millis(50));
                *counted.lock().unwrap() += 1;
                Ok(())
            }),
        )
        .unwrap();
        let registry = ActionRegistry::builder()
            .register(Gesture::Fist, Action::new("Zooming In", Box::new(slow)))
            .unwrap()
            .build();
        let mut dispatcher = DispatchLoop::new(registry, TriggerPolicy::EveryCycle);

        for _ in 0..20 {
            assert_eq!(dispatcher.step(&fist()).outcome, Outcome::Fired);
        }
        let stopping = Instant::now();
        drop(dispatcher);

        // Only an action already in flight may complete after the stop.
        assert!(*ran.lock().unwrap() <= 1);
        assert!(stopping.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_cycle_timing_window() {
        let mut stats = LoopStats::default();
        for _ in 0..(TIMING_WINDOW + 10) {
            stats.record_cycle_time(Duration::from_millis(20));
        }
        assert_eq!(stats.cycle_times.len(), TIMING_WINDOW);
        assert!((stats.avg_cycle_time - 0.02).abs() < 1e-4);
        assert!((stats.avg_fps - 50.0).abs() < 0.1);
    }
}
