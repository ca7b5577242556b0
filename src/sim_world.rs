use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};

use nalgebra::Isometry3;

/// Mutations of a simulated world, available while its lock is held.
pub trait WorldEdit {
    /// World pose of a body, or of a robot's base.
    fn transform(&self, id: &str) -> Option<Isometry3<f64>>;
    /// Moves a body, or a robot's base. Returns false if `id` is unknown.
    fn set_transform(&mut self, id: &str, pose: Isometry3<f64>) -> bool;
    /// World pose of the end effector of a robot manipulator.
    fn end_effector_transform(&self, id: &str, manipulator: usize) -> Option<Isometry3<f64>>;
}

/// A simulated world the synchronizer writes poses into.
///
/// The world's own lock is taken through [`SimWorld::lock`]. Callers that also hold another lock
/// must always take that one first.
pub trait SimWorld {
    type Edit<'a>: WorldEdit
    where
        Self: 'a;

    /// Whether `id` names any body. Robots are bodies too.
    fn has_body(&self, id: &str) -> bool;
    fn has_robot(&self, id: &str) -> bool;
    fn lock(&self) -> Self::Edit<'_>;
}

#[derive(Clone, Debug)]
struct SimBody {
    transform: Isometry3<f64>,
    /// End effectors in the base frame; `None` for plain bodies.
    manipulators: Option<Vec<Isometry3<f64>>>,
}

#[derive(Debug, Default)]
struct WorldState {
    bodies: HashMap<String, SimBody>,
    transform_writes: usize,
}

impl WorldEdit for WorldState {
    fn transform(&self, id: &str) -> Option<Isometry3<f64>> {
        self.bodies.get(id).map(|body| body.transform)
    }

    fn set_transform(&mut self, id: &str, pose: Isometry3<f64>) -> bool {
        match self.bodies.get_mut(id) {
            Some(body) => {
                body.transform = pose;
                self.transform_writes += 1;
                true
            }
            None => false,
        }
    }

    fn end_effector_transform(&self, id: &str, manipulator: usize) -> Option<Isometry3<f64>> {
        let body = self.bodies.get(id)?;
        let end_effector = body.manipulators.as_ref()?.get(manipulator)?;
        Some(body.transform * end_effector)
    }
}

/// Lock guard over a [`SimEnvironment`].
pub struct SimEnvironmentLock<'a>(MutexGuard<'a, WorldState>);

impl WorldEdit for SimEnvironmentLock<'_> {
    fn transform(&self, id: &str) -> Option<Isometry3<f64>> {
        self.0.transform(id)
    }

    fn set_transform(&mut self, id: &str, pose: Isometry3<f64>) -> bool {
        self.0.set_transform(id, pose)
    }

    fn end_effector_transform(&self, id: &str, manipulator: usize) -> Option<Isometry3<f64>> {
        self.0.end_effector_transform(id, manipulator)
    }
}

/// In-memory world of named rigid bodies and robots.
#[derive(Debug, Default)]
pub struct SimEnvironment {
    state: Mutex<WorldState>,
}

impl SimEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_body(&self, id: &str, pose: Isometry3<f64>) {
        self.state().bodies.insert(
            id.to_owned(),
            SimBody {
                transform: pose,
                manipulators: None,
            },
        );
    }

    /// Adds a robot whose manipulators end at the given poses relative to its base.
    pub fn add_robot(&self, id: &str, base: Isometry3<f64>, end_effectors: Vec<Isometry3<f64>>) {
        self.state().bodies.insert(
            id.to_owned(),
            SimBody {
                transform: base,
                manipulators: Some(end_effectors),
            },
        );
    }

    pub fn remove(&self, id: &str) -> bool {
        self.state().bodies.remove(id).is_some()
    }

    pub fn body_transform(&self, id: &str) -> Option<Isometry3<f64>> {
        self.state().transform(id)
    }

    /// How many poses have been written since creation.
    pub fn transform_writes(&self) -> usize {
        self.state().transform_writes
    }
}

impl SimWorld for SimEnvironment {
    type Edit<'a> = SimEnvironmentLock<'a>;

    fn has_body(&self, id: &str) -> bool {
        self.state().bodies.contains_key(id)
    }

    fn has_robot(&self, id: &str) -> bool {
        self.state()
            .bodies
            .get(id)
            .map_or(false, |body| body.manipulators.is_some())
    }

    fn lock(&self) -> Self::Edit<'_> {
        SimEnvironmentLock(self.state())
    }
}
