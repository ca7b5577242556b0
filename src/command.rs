//! Line-oriented command surface.
//!
//! One command per line, whitespace separated:
//!
//! ```text
//! RegisterBody <id> <frame> [openrave_frame_in_tf_frame x y z qw qx qy qz
//!                             [planar_tracking [fixed_translation_z <z>]]]
//! RegisterRobotHand <id> <frame>
//! UnregisterBody <id>
//! Pause
//! Resume
//! Clear
//! ```
//!
//! Command names are matched case-insensitively; clause keywords are not. `RegisterBody` clauses
//! are positional: each slot holds exactly its own keyword, and a line may only end early.

use std::str::FromStr;

use nalgebra::Isometry3;
use tracing::error;

use crate::{
    pose_sync::{BodyRegistration, PoseSynchronizer},
    sim_world::SimWorld,
    tf_error::CommandError,
    transforms::pose_from_parts,
    LookupTransform,
};

const OFFSET_CLAUSE: &str = "openrave_frame_in_tf_frame";
const PLANAR_CLAUSE: &str = "planar_tracking";
const FIXED_Z_CLAUSE: &str = "fixed_translation_z";

/// `fixed_translation_z` value that existing clients send to mean "keep the tracked z".
const LIVE_Z_WIRE_VALUE: f64 = -1.0;

static COMMANDS: [(&str, &str); 6] = [
    ("RegisterBody", "Register a body with a tf frame."),
    (
        "RegisterRobotHand",
        "Register a robot's hand frame with a tf frame.",
    ),
    ("UnregisterBody", "Unregister a body from a tf frame."),
    (
        "Pause",
        "Pause the plugin. Leaves registered objects in their current state.",
    ),
    ("Resume", "Resumes the plugin."),
    ("Clear", "Reset the plugin. Disassociates all objects."),
];

/// Optional parts of a body registration.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyOptions {
    /// Pose of the simulated body in the tracked frame.
    pub offset: Isometry3<f64>,
    /// Flatten the pose onto the ground plane before committing it.
    pub planar: bool,
    /// Height to use when flattening; `None` keeps the tracked z.
    pub fixed_z: Option<f64>,
}

impl Default for BodyOptions {
    fn default() -> Self {
        Self {
            offset: Isometry3::identity(),
            planar: false,
            fixed_z: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    RegisterBody {
        id: String,
        frame: String,
        options: BodyOptions,
    },
    RegisterRobotHand {
        id: String,
        frame: String,
    },
    UnregisterBody {
        id: String,
    },
    Pause,
    Resume,
    Clear,
}

fn required<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, CommandError> {
    tokens
        .next()
        .map(str::to_owned)
        .ok_or(CommandError::MissingArgument { command, argument })
}

fn number<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<f64, CommandError> {
    let token = tokens
        .next()
        .ok_or(CommandError::MissingArgument { command, argument })?;
    match token.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(CommandError::InvalidNumber {
            command,
            argument,
            value: token.to_owned(),
        }),
    }
}

fn no_more<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
    command: &'static str,
) -> Result<(), CommandError> {
    match tokens.next() {
        Some(token) => Err(CommandError::UnexpectedArgument {
            command,
            token: token.to_owned(),
        }),
        None => Ok(()),
    }
}

/// Consumes the next clause slot. `Ok(false)` when the line ends here.
fn next_clause<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    expected: &str,
) -> Result<bool, CommandError> {
    match tokens.next() {
        None => Ok(false),
        Some(token) if token == expected => Ok(true),
        Some(token) => Err(CommandError::UnknownClause {
            command: "RegisterBody",
            clause: token.to_owned(),
        }),
    }
}

fn parse_body_options<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<BodyOptions, CommandError> {
    const CMD: &str = "RegisterBody";
    let mut options = BodyOptions::default();

    if !next_clause(tokens, OFFSET_CLAUSE)? {
        return Ok(options);
    }
    let x = number(tokens, CMD, "x")?;
    let y = number(tokens, CMD, "y")?;
    let z = number(tokens, CMD, "z")?;
    let qw = number(tokens, CMD, "qw")?;
    let qx = number(tokens, CMD, "qx")?;
    let qy = number(tokens, CMD, "qy")?;
    let qz = number(tokens, CMD, "qz")?;
    options.offset =
        pose_from_parts([x, y, z], [qw, qx, qy, qz]).ok_or(CommandError::DegenerateOffset)?;

    if !next_clause(tokens, PLANAR_CLAUSE)? {
        return Ok(options);
    }
    options.planar = true;

    if !next_clause(tokens, FIXED_Z_CLAUSE)? {
        return Ok(options);
    }
    let z = number(tokens, CMD, FIXED_Z_CLAUSE)?;
    options.fixed_z = (z != LIVE_Z_WIRE_VALUE).then_some(z);

    match tokens.next() {
        Some(clause) => Err(CommandError::UnknownClause {
            command: CMD,
            clause: clause.to_owned(),
        }),
        None => Ok(options),
    }
}

impl Command {
    /// Parses one command line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().ok_or(CommandError::Empty)?;
        let command = COMMANDS
            .iter()
            .map(|(name, _)| *name)
            .find(|known| known.eq_ignore_ascii_case(name))
            .ok_or_else(|| CommandError::UnknownCommand(name.to_owned()))?;

        let parsed = match command {
            "RegisterBody" => {
                let id = required(&mut tokens, command, "body_name")?;
                let frame = required(&mut tokens, command, "tf_frame")?;
                let options = parse_body_options(&mut tokens)?;
                Command::RegisterBody { id, frame, options }
            }
            "RegisterRobotHand" => {
                let id = required(&mut tokens, command, "robot_name")?;
                let frame = required(&mut tokens, command, "tf_frame")?;
                Command::RegisterRobotHand { id, frame }
            }
            "UnregisterBody" => Command::UnregisterBody {
                id: required(&mut tokens, command, "body_name")?,
            },
            "Pause" => Command::Pause,
            "Resume" => Command::Resume,
            "Clear" => Command::Clear,
            _ => return Err(CommandError::UnknownCommand(name.to_owned())),
        };
        no_more(tokens, command)?;
        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::RegisterBody { .. } => "RegisterBody",
            Command::RegisterRobotHand { .. } => "RegisterRobotHand",
            Command::UnregisterBody { .. } => "UnregisterBody",
            Command::Pause => "Pause",
            Command::Resume => "Resume",
            Command::Clear => "Clear",
        }
    }

    /// One-line description of the command.
    pub fn help(&self) -> &'static str {
        let name = self.name();
        COMMANDS
            .iter()
            .find(|(known, _)| *known == name)
            .map_or("", |(_, help)| *help)
    }

    /// Every command name with its description.
    pub fn all() -> impl Iterator<Item = (&'static str, &'static str)> {
        COMMANDS.into_iter()
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s)
    }
}

impl<W: SimWorld, L: LookupTransform> PoseSynchronizer<W, L> {
    /// Parses and runs one command line.
    pub fn send_command(&self, line: &str) -> Result<(), CommandError> {
        let command = Command::parse(line).map_err(|e| {
            error!(line, error = %e, "rejected command");
            e
        })?;
        self.execute(command)
    }

    pub fn execute(&self, command: Command) -> Result<(), CommandError> {
        match command {
            Command::RegisterBody { id, frame, options } => self.register_body(
                &id,
                BodyRegistration {
                    frame,
                    offset: options.offset,
                    planar: options.planar,
                    fixed_z: options.fixed_z,
                },
            ),
            Command::RegisterRobotHand { id, frame } => self.register_robot_hand(&id, &frame),
            Command::UnregisterBody { id } => {
                self.unregister_body(&id);
                Ok(())
            }
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Resume => {
                self.resume();
                Ok(())
            }
            Command::Clear => {
                self.reset();
                Ok(())
            }
        }
    }
}
