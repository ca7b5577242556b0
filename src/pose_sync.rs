use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use nalgebra::Isometry3;
use tracing::{debug, error, info, trace, warn};

use crate::{
    config::SyncConfig,
    sim_world::{SimWorld, WorldEdit},
    tf_error::{CommandError, TfError},
    transforms::planar_pose,
    LookupTransform,
};

/// Hand tracking always drives the robot from its first manipulator.
const HAND_MANIPULATOR: usize = 0;

/// How a simulated body follows its tf frame.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyRegistration {
    /// tf frame the body follows.
    pub frame: String,
    /// Pose of the body in `frame`.
    pub offset: Isometry3<f64>,
    /// Flatten onto the ground plane before committing.
    pub planar: bool,
    /// Height used when flattening; `None` keeps the tracked z.
    pub fixed_z: Option<f64>,
}

impl BodyRegistration {
    /// Follow `frame` exactly: identity offset, no flattening.
    pub fn new(frame: &str) -> Self {
        Self {
            frame: frame.to_owned(),
            offset: Isometry3::identity(),
            planar: false,
            fixed_z: None,
        }
    }

    /// Pose to commit given the latest pose of the tracked frame.
    pub fn target_pose(&self, frame_pose: &Isometry3<f64>) -> Isometry3<f64> {
        let pose = frame_pose * self.offset;
        if self.planar {
            planar_pose(&pose, self.fixed_z)
        } else {
            pose
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    bodies: HashMap<String, BodyRegistration>,
    hands: HashMap<String, String>,
    paused: bool,
}

impl Registry {
    fn clear(&mut self) {
        self.bodies.clear();
        self.hands.clear();
    }
}

/// Re-poses registered bodies and robots from tf every simulation step.
///
/// Every table operation and the whole per-step scan run under one registry lock. The world's
/// own lock is only ever taken while the registry lock is held, never the other way around.
pub struct PoseSynchronizer<W, L> {
    reference_frame: String,
    world: Arc<W>,
    tf: L,
    registry: Mutex<Registry>,
}

impl<W, L> PoseSynchronizer<W, L> {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reference_frame(&self) -> &str {
        &self.reference_frame
    }

    /// Drops every body and hand registration. The pause flag is left alone.
    pub fn reset(&self) {
        self.registry().clear();
    }

    /// Stops all pose updates until [`PoseSynchronizer::resume`]. Registrations are kept.
    pub fn pause(&self) {
        self.registry().paused = true;
    }

    pub fn resume(&self) {
        self.registry().paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.registry().paused
    }

    pub fn body_registration(&self, id: &str) -> Option<BodyRegistration> {
        self.registry().bodies.get(id).cloned()
    }

    /// tf frame driving the robot `id` through its hand, if registered.
    pub fn hand_frame(&self, id: &str) -> Option<String> {
        self.registry().hands.get(id).cloned()
    }

    /// Forgets `id` in both the body and the hand table.
    ///
    /// Unknown ids are not an error. Returns whether anything was removed.
    pub fn unregister_body(&self, id: &str) -> bool {
        let mut registry = self.registry();
        let body = registry.bodies.remove(id).is_some();
        let hand = registry.hands.remove(id).is_some();
        if body || hand {
            info!(id, body, hand, "unregistered");
        } else {
            warn!(id, "body is not registered, ignoring unregister request");
        }
        body || hand
    }
}

impl<W: SimWorld, L: LookupTransform> PoseSynchronizer<W, L> {
    pub fn new(config: SyncConfig, world: Arc<W>, tf: L) -> Self {
        let registry = Registry {
            paused: config.start_paused,
            ..Registry::default()
        };
        Self {
            reference_frame: config.reference_frame,
            world,
            tf,
            registry: Mutex::new(registry),
        }
    }

    pub fn world(&self) -> &Arc<W> {
        &self.world
    }

    /// Makes the body `id` follow a tf frame, replacing any earlier registration of `id`.
    pub fn register_body(
        &self,
        id: &str,
        registration: BodyRegistration,
    ) -> Result<(), CommandError> {
        let mut registry = self.registry();
        if !self.world.has_body(id) {
            error!(id, "cannot register body, it does not exist");
            return Err(CommandError::NoSuchBody(id.to_owned()));
        }
        info!(
            id,
            frame = %registration.frame,
            planar = registration.planar,
            fixed_z = ?registration.fixed_z,
            "registered body"
        );
        registry.bodies.insert(id.to_owned(), registration);
        Ok(())
    }

    /// Makes the robot `id` follow `frame` with its hand.
    pub fn register_robot_hand(&self, id: &str, frame: &str) -> Result<(), CommandError> {
        let mut registry = self.registry();
        if !self.world.has_body(id) {
            error!(id, "cannot register robot hand, robot does not exist");
            return Err(CommandError::NoSuchBody(id.to_owned()));
        }
        info!(id, frame, "registered robot hand");
        registry.hands.insert(id.to_owned(), frame.to_owned());
        Ok(())
    }

    /// Runs one update over every registration.
    ///
    /// Problems with single bodies are logged and skipped; the step itself always succeeds.
    pub fn simulation_step(&self, elapsed: f64) -> bool {
        let registry = self.registry();
        if registry.paused {
            trace!(elapsed, "paused, skipping step");
            return true;
        }

        let mut bodies = 0;
        for (id, registration) in &registry.bodies {
            if self.update_body(id, registration) {
                bodies += 1;
            }
        }
        let mut robots = 0;
        for (id, frame) in &registry.hands {
            if self.update_robot_from_hand(id, frame) {
                robots += 1;
            }
        }
        debug!(
            elapsed,
            bodies,
            robots,
            skipped = registry.bodies.len() + registry.hands.len() - bodies - robots,
            "simulation step"
        );
        true
    }

    /// Latest pose of `frame` in the reference frame, with the failure logged.
    fn resolve(&self, frame: &str) -> Result<Isometry3<f64>, TfError> {
        self.tf
            .lookup_transform(&self.reference_frame, frame)
            .map_err(|e| {
                if e.is_not_found() {
                    warn!(
                        reference_frame = %self.reference_frame,
                        frame,
                        "cannot find the transform between tf frames"
                    );
                } else {
                    error!(frame, error = %e, "transform lookup failed");
                }
                e
            })
    }

    fn update_body(&self, id: &str, registration: &BodyRegistration) -> bool {
        if !self.world.has_body(id) {
            warn!(id, "body is not in the environment");
            return false;
        }
        let Ok(frame_pose) = self.resolve(&registration.frame) else {
            return false;
        };
        let pose = registration.target_pose(&frame_pose);
        self.world.lock().set_transform(id, pose)
    }

    fn update_robot_from_hand(&self, id: &str, frame: &str) -> bool {
        if !self.world.has_robot(id) {
            warn!(id, "robot is not in the environment");
            return false;
        }
        let Ok(new_hand_in_world) = self.resolve(frame) else {
            return false;
        };

        let mut world = self.world.lock();
        let (Some(robot_in_world), Some(hand_in_world)) = (
            world.transform(id),
            world.end_effector_transform(id, HAND_MANIPULATOR),
        ) else {
            warn!(id, "robot has no manipulator to track");
            return false;
        };
        let robot_in_hand = hand_in_world.inverse() * robot_in_world;
        let new_robot_in_world = new_hand_in_world * robot_in_hand;
        world.set_transform(id, planar_pose(&new_robot_in_world, None))
    }
}

impl<W, L> Drop for PoseSynchronizer<W, L> {
    fn drop(&mut self) {
        self.reset();
        info!("pose synchronizer unloaded from environment");
    }
}

#[cfg(test)]
mod test {
    use std::{
        f64::consts::FRAC_PI_2,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    use super::*;
    use crate::{
        sim_world::SimEnvironment,
        tf_buffer::{FrameTransform, TfBuffer},
        tf_listener::TfListener,
    };

    /// Shared sink for formatted log lines.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn line_containing(&self, needle: &str) -> Option<String> {
            let bytes = self.0.lock().unwrap();
            String::from_utf8_lossy(&bytes)
                .lines()
                .find(|line| line.contains(needle))
                .map(str::to_owned)
        }
    }

    fn captured<R>(f: impl FnOnce() -> R) -> (R, LogBuffer) {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, logs)
    }

    /// Fails every lookup with a lock error and counts the attempts.
    #[derive(Default)]
    struct BrokenLookup {
        calls: AtomicUsize,
    }

    impl LookupTransform for BrokenLookup {
        fn lookup_transform(&self, _from: &str, _to: &str) -> Result<Isometry3<f64>, TfError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(TfError::CouldNotAcquireLock)
        }
    }

    fn yaw(angle: f64) -> UnitQuaternion<f64> {
        UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle)
    }

    fn setup() -> (PoseSynchronizer<SimEnvironment, TfListener>, TfListener) {
        let world = Arc::new(SimEnvironment::new());
        world.add_body("B1", Isometry3::identity());
        world.add_body("B2", Isometry3::identity());
        let listener = TfListener::new();
        let sync = PoseSynchronizer::new(SyncConfig::new("world"), world, listener.clone());
        (sync, listener)
    }

    fn publish(listener: &TfListener, frame: &str, pose: Isometry3<f64>) {
        listener
            .handle_incoming_transforms([FrameTransform::new("world", frame, pose)])
            .unwrap();
    }

    #[test]
    fn test_target_pose() {
        let mut registration = BodyRegistration::new("F2");
        registration.offset = Isometry3::translation(0.0, 0.0, 1.0);
        let frame_pose = Isometry3::from_parts(Translation3::new(1.0, 2.0, 3.0), yaw(FRAC_PI_2));

        let pose = registration.target_pose(&frame_pose);
        assert_relative_eq!(pose.translation.vector, Vector3::new(1.0, 2.0, 4.0), epsilon = 1e-12);

        registration.planar = true;
        registration.fixed_z = Some(5.0);
        let pose = registration.target_pose(&frame_pose);
        assert_relative_eq!(pose.translation.vector, Vector3::new(1.0, 2.0, 5.0), epsilon = 1e-12);
        assert_relative_eq!(pose.rotation, yaw(FRAC_PI_2), epsilon = 1e-12);
    }

    #[test]
    fn test_offset_is_right_multiplied() {
        let mut registration = BodyRegistration::new("F");
        registration.offset = Isometry3::translation(1.0, 0.0, 0.0);
        let frame_pose = Isometry3::from_parts(Translation3::identity(), yaw(FRAC_PI_2));
        let pose = registration.target_pose(&frame_pose);
        // the offset is expressed in the tracked frame, so it turns with it
        assert_relative_eq!(pose.translation.vector, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_register_unknown_body() {
        let (sync, _) = setup();
        assert_eq!(
            sync.register_body("UnknownBody", BodyRegistration::new("F1")),
            Err(CommandError::NoSuchBody("UnknownBody".to_owned()))
        );
        assert_eq!(sync.body_registration("UnknownBody"), None);
        assert!(sync.register_robot_hand("UnknownBody", "F1").is_err());
        assert_eq!(sync.hand_frame("UnknownBody"), None);
    }

    #[test]
    fn test_reregistration_replaces_everything() {
        let (sync, _) = setup();
        let first = BodyRegistration {
            frame: "F1".to_owned(),
            offset: Isometry3::translation(0.0, 0.0, 1.0),
            planar: true,
            fixed_z: Some(2.0),
        };
        sync.register_body("B1", first).unwrap();
        sync.register_body("B1", BodyRegistration::new("F9")).unwrap();
        assert_eq!(sync.body_registration("B1"), Some(BodyRegistration::new("F9")));
    }

    #[test]
    fn test_unregister() {
        let (sync, _) = setup();
        assert!(!sync.unregister_body("never_registered"));

        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        sync.register_robot_hand("B2", "hand").unwrap();
        assert!(sync.unregister_body("B1"));
        assert!(sync.unregister_body("B2"));
        assert_eq!(sync.body_registration("B1"), None);
        assert_eq!(sync.hand_frame("B2"), None);
    }

    #[test]
    fn test_unregister_clears_both_tables() {
        let (sync, _) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        sync.register_robot_hand("B1", "hand").unwrap();
        assert!(sync.unregister_body("B1"));
        assert_eq!(sync.body_registration("B1"), None);
        assert_eq!(sync.hand_frame("B1"), None);
    }

    #[test]
    fn test_reset_keeps_pause_flag() {
        let (sync, _) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        sync.register_robot_hand("B2", "hand").unwrap();
        sync.pause();
        sync.reset();
        assert_eq!(sync.body_registration("B1"), None);
        assert_eq!(sync.hand_frame("B2"), None);
        assert!(sync.is_paused());
        sync.resume();
        assert!(!sync.is_paused());
    }

    #[test]
    fn test_start_paused() {
        let config = SyncConfig {
            start_paused: true,
            ..SyncConfig::new("map")
        };
        let sync = PoseSynchronizer::new(config, Arc::new(SimEnvironment::new()), TfBuffer::new());
        assert!(sync.is_paused());
        assert_eq!(sync.reference_frame(), "map");
    }

    #[test]
    fn test_step_commits_tracked_pose() {
        let (sync, listener) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        publish(&listener, "F1", Isometry3::translation(1.0, 2.0, 3.0));

        assert!(sync.simulation_step(0.01));
        assert_relative_eq!(
            sync.world().body_transform("B1").unwrap(),
            Isometry3::translation(1.0, 2.0, 3.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_missing_frame_leaves_pose_untouched() {
        let (sync, listener) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        sync.register_body("B2", BodyRegistration::new("F2")).unwrap();
        publish(&listener, "F2", Isometry3::translation(0.0, 0.0, 1.0));

        assert!(sync.simulation_step(0.01));
        assert_eq!(sync.world().body_transform("B1"), Some(Isometry3::identity()));
        assert_relative_eq!(
            sync.world().body_transform("B2").unwrap(),
            Isometry3::translation(0.0, 0.0, 1.0)
        );
        assert_eq!(sync.world().transform_writes(), 1);
    }

    #[test]
    fn test_lookup_failure_log_levels() {
        let (sync, _) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        let (stepped, logs) = captured(|| sync.simulation_step(0.01));
        assert!(stepped);
        let line = logs
            .line_containing("cannot find the transform between tf frames")
            .unwrap();
        assert!(line.contains("WARN"), "{line}");
        assert!(logs.line_containing("transform lookup failed").is_none());

        let world = Arc::new(SimEnvironment::new());
        world.add_body("B1", Isometry3::identity());
        let sync = PoseSynchronizer::new(
            SyncConfig::new("world"),
            world,
            Arc::new(BrokenLookup::default()),
        );
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        let (stepped, logs) = captured(|| sync.simulation_step(0.01));
        assert!(stepped);
        let line = logs.line_containing("transform lookup failed").unwrap();
        assert!(line.contains("ERROR"), "{line}");
        assert!(logs
            .line_containing("cannot find the transform between tf frames")
            .is_none());
    }

    #[test]
    fn test_lookup_errors_are_swallowed() {
        let world = Arc::new(SimEnvironment::new());
        world.add_body("B1", Isometry3::identity());
        world.add_robot("herb", Isometry3::identity(), vec![Isometry3::identity()]);
        let lookup = Arc::new(BrokenLookup::default());
        let sync = PoseSynchronizer::new(SyncConfig::default(), world.clone(), lookup.clone());
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        sync.register_robot_hand("herb", "hand").unwrap();

        assert!(sync.simulation_step(0.01));
        assert!(sync.simulation_step(0.01));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 4);
        assert_eq!(world.transform_writes(), 0);
    }

    #[test]
    fn test_removed_body_stays_registered() {
        let (sync, listener) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        publish(&listener, "F1", Isometry3::translation(1.0, 0.0, 0.0));
        sync.world().remove("B1");

        assert!(sync.simulation_step(0.01));
        assert_eq!(sync.world().transform_writes(), 0);
        assert!(sync.body_registration("B1").is_some());

        sync.world().add_body("B1", Isometry3::identity());
        assert!(sync.simulation_step(0.01));
        assert_relative_eq!(
            sync.world().body_transform("B1").unwrap(),
            Isometry3::translation(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn test_hand_moves_robot_base() {
        let world = Arc::new(SimEnvironment::new());
        world.add_robot(
            "herb",
            Isometry3::identity(),
            vec![Isometry3::translation(0.5, 0.0, 1.0)],
        );
        let listener = TfListener::new();
        let sync = PoseSynchronizer::new(SyncConfig::new("world"), world.clone(), listener.clone());
        sync.register_robot_hand("herb", "herb/hand").unwrap();
        publish(
            &listener,
            "herb/hand",
            Isometry3::from_parts(Translation3::new(2.0, 1.0, 1.0), yaw(FRAC_PI_2)),
        );

        assert!(sync.simulation_step(0.01));
        let base = world.body_transform("herb").unwrap();
        assert_relative_eq!(base.translation.vector, Vector3::new(2.0, 0.5, 0.0), epsilon = 1e-12);
        assert_relative_eq!(base.rotation, yaw(FRAC_PI_2), epsilon = 1e-12);
    }

    #[test]
    fn test_hand_tracking_always_flattens() {
        let world = Arc::new(SimEnvironment::new());
        world.add_robot("herb", Isometry3::identity(), vec![Isometry3::identity()]);
        let listener = TfListener::new();
        let sync = PoseSynchronizer::new(SyncConfig::new("world"), world.clone(), listener.clone());
        sync.register_robot_hand("herb", "herb/hand").unwrap();
        publish(
            &listener,
            "herb/hand",
            Isometry3::from_parts(
                Translation3::new(1.0, 1.0, 0.3),
                UnitQuaternion::from_euler_angles(0.4, 0.2, 0.0),
            ),
        );

        assert!(sync.simulation_step(0.01));
        let base = world.body_transform("herb").unwrap();
        assert_relative_eq!(base.rotation, UnitQuaternion::identity(), epsilon = 1e-12);
        assert_relative_eq!(base.translation.vector, Vector3::new(1.0, 1.0, 0.3), epsilon = 1e-12);
    }

    #[test]
    fn test_hand_on_plain_body_is_skipped() {
        let (sync, listener) = setup();
        sync.register_robot_hand("B1", "hand").unwrap();
        publish(&listener, "hand", Isometry3::translation(1.0, 0.0, 0.0));
        assert!(sync.simulation_step(0.01));
        assert_eq!(sync.world().transform_writes(), 0);
        assert_eq!(sync.hand_frame("B1"), Some("hand".to_owned()));
    }

    #[test]
    fn test_robot_without_manipulator_is_skipped() {
        let world = Arc::new(SimEnvironment::new());
        world.add_robot("arm", Isometry3::identity(), vec![]);
        let listener = TfListener::new();
        let sync = PoseSynchronizer::new(SyncConfig::new("world"), world.clone(), listener.clone());
        sync.register_robot_hand("arm", "hand").unwrap();
        publish(&listener, "hand", Isometry3::translation(1.0, 0.0, 0.0));
        assert!(sync.simulation_step(0.01));
        assert_eq!(world.transform_writes(), 0);
    }

    #[test]
    fn test_drop_leaves_world_bodies_alone() {
        let (sync, _) = setup();
        sync.register_body("B1", BodyRegistration::new("F1")).unwrap();
        let world = sync.world().clone();
        drop(sync);
        assert!(world.has_body("B1"));
    }
}
