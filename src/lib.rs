//! Keeps a simulated world in step with tf.
//!
//! Every simulation step, each registered body is moved to the latest pose of the tf frame it
//! tracks (composed with a fixed offset and optionally flattened onto the ground plane), and each
//! registered robot hand drags its robot's base along with the hand frame.
//!
//! Example usage:
//!
//! ```
//! use std::sync::Arc;
//!
//! use nalgebra::Isometry3;
//! use tf_pose_sync::{FrameTransform, PoseSynchronizer, SimEnvironment, SyncConfig, TfListener};
//!
//! let world = Arc::new(SimEnvironment::new());
//! world.add_body("mug", Isometry3::identity());
//!
//! let listener = TfListener::new();
//! listener
//!     .handle_incoming_transforms([FrameTransform::new(
//!         "world",
//!         "mocap/mug",
//!         Isometry3::translation(1.0, 2.0, 3.0),
//!     )])
//!     .unwrap();
//!
//! let sync = PoseSynchronizer::new(SyncConfig::new("world"), world.clone(), listener);
//! sync.send_command("RegisterBody mug mocap/mug").unwrap();
//! assert!(sync.simulation_step(0.01));
//! assert_eq!(world.body_transform("mug"), Some(Isometry3::translation(1.0, 2.0, 3.0)));
//! ```

use std::sync::Arc;

use nalgebra::Isometry3;

/// Source of external frame poses.
pub trait LookupTransform {
    /// Latest available pose of `to` expressed in `from`.
    fn lookup_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, TfError>;
}

impl<T: LookupTransform + ?Sized> LookupTransform for Arc<T> {
    fn lookup_transform(&self, from: &str, to: &str) -> Result<Isometry3<f64>, TfError> {
        (**self).lookup_transform(from, to)
    }
}

mod command;
mod config;
mod pose_sync;
mod sim_world;
mod tf_buffer;
mod tf_error;
mod tf_listener;
pub mod transforms;

pub use command::{BodyOptions, Command};
pub use config::SyncConfig;
pub use pose_sync::{BodyRegistration, PoseSynchronizer};
pub use sim_world::{SimEnvironment, SimEnvironmentLock, SimWorld, WorldEdit};
pub use tf_buffer::{FrameTransform, TfBuffer};
pub use tf_error::{CommandError, ConfigError, TfError};
pub use tf_listener::TfListener;
