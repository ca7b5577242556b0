//! Mirrors a circling mocap marker onto a simulated mug and drags a robot along with its hand.
//!
//! Run with `RUST_LOG=debug cargo run --example mirror` to see every step.

use std::{f64::consts::PI, sync::Arc};

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use tf_pose_sync::{FrameTransform, PoseSynchronizer, SimEnvironment, SyncConfig, TfListener};
use tracing::info;
use tracing_subscriber::EnvFilter;

const COMMANDS: [&str; 4] = [
    "RegisterBody mug mocap/mug openrave_frame_in_tf_frame 0 0 -0.05 1 0 0 0 \
     planar_tracking fixed_translation_z 0.74",
    "RegisterBody tray mocap/tray",
    "RegisterRobotHand herb mocap/herb_hand",
    "RegisterBody lamp mocap/lamp",
];

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SyncConfig::from_toml_str("reference_frame = \"world\"").unwrap();

    let world = Arc::new(SimEnvironment::new());
    world.add_body("mug", Isometry3::identity());
    world.add_body("tray", Isometry3::identity());
    world.add_robot(
        "herb",
        Isometry3::identity(),
        vec![Isometry3::translation(0.6, -0.2, 0.9)],
    );

    let listener = TfListener::new();
    let sync = PoseSynchronizer::new(config, world.clone(), listener.clone());
    for command in COMMANDS {
        if let Err(e) = sync.send_command(command) {
            info!(command, error = %e, "command rejected");
        }
    }

    let dt = 0.1;
    for step in 0..20 {
        let t = step as f64 * dt;
        let heading = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), t * PI / 2.0);
        listener
            .handle_incoming_transforms([
                FrameTransform::new(
                    "world",
                    "mocap/mug",
                    Isometry3::from_parts(Translation3::new(t.cos(), t.sin(), 0.8), heading),
                ),
                FrameTransform::new(
                    "world",
                    "mocap/herb_hand",
                    Isometry3::translation(0.6 + t, -0.2, 0.9),
                ),
            ])
            .unwrap();
        if step == 10 {
            sync.send_command("Pause").unwrap();
        } else if step == 15 {
            sync.send_command("Resume").unwrap();
        }
        sync.simulation_step(dt);
    }

    for id in ["mug", "tray", "herb"] {
        info!(id, pose = ?world.body_transform(id), "final pose");
    }
}
