//! Simulated robot: a table scene seen by a color camera, an arm moving its
//! end effector over the table, and a one-axis gripper.
//!
//! Sensors and actuators reach the shared world through `Rc<RefCell<_>>`;
//! the whole simulation runs on one thread.

use std::cell::RefCell;
use std::rc::Rc;

use dynfield::math::{gauss_1d, ramp_readout};
use dynfield::prng::Prng;
use dynfield::{Connectable, DynamicField, FieldParams};
use ndarray::{Array1, ArrayD, Axis, IxDyn};
use tracing::{debug, info};

use crate::config::{SceneObject, SimConfig};

/// Amplitude of the bump a sensor writes at the sensed location.
const SENSOR_AMPLITUDE: f64 = 6.0;
const SENSOR_WIDTH: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct World {
    pub tick: u64,
    pub scene: Vec<SceneObject>,
    /// End effector position over the table, both axes in `[0, 1]`.
    pub end_effector: [f64; 2],
    /// Gripper opening in `[0, 1]`.
    pub gripper: f64,
    pub arm_enabled: bool,
    pub gripper_enabled: bool,
}

pub type SharedWorld = Rc<RefCell<World>>;

impl World {
    pub fn new(config: &SimConfig) -> SharedWorld {
        Rc::new(RefCell::new(Self {
            tick: 0,
            scene: config.scene.clone(),
            end_effector: config.end_effector_start.map(|v| v.clamp(0.0, 1.0)),
            gripper: config.gripper_start.clamp(0.0, 1.0),
            arm_enabled: true,
            gripper_enabled: true,
        }))
    }

    pub fn visible(&self) -> impl Iterator<Item = &SceneObject> + '_ {
        self.scene.iter().filter(move |o| o.visible_from <= self.tick)
    }
}

/// Sensor activation over `sizes`: a bump at every point (in index
/// coordinates) on a resting level of -5. Overlapping bumps take the max.
fn sensed_activation(sizes: &[usize], points: &[Vec<f64>]) -> ArrayD<f64> {
    let mut activation = ArrayD::from_elem(IxDyn(sizes), 0.0_f64);
    for point in points {
        let profiles: Vec<Array1<f64>> = sizes
            .iter()
            .zip(point)
            .enumerate()
            .map(|(d, (&size, &center))| {
                let amplitude = if d == 0 { SENSOR_AMPLITUDE } else { 1.0 };
                gauss_1d(size, amplitude, SENSOR_WIDTH, center)
            })
            .collect();
        for (idx, a) in activation.indexed_iter_mut() {
            let v: f64 = profiles.iter().enumerate().map(|(d, p)| p[idx[d]]).product();
            *a = a.max(v);
        }
    }
    activation - 5.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    Camera,
    EndEffector,
    Gripper,
}

/// A sensor field: its activation is overwritten each tick from the world,
/// and its output is the sigmoid of that.
pub struct Sensor {
    world: SharedWorld,
    reading: Reading,
    field: DynamicField,
}

impl Sensor {
    fn with_reading(world: SharedWorld, reading: Reading, sizes: &[usize], label: &str) -> Self {
        let params = FieldParams {
            noise_strength: 0.0,
            ..FieldParams::default()
        };
        Self {
            world,
            reading,
            field: DynamicField::with_params(sizes, params).with_label(label),
        }
    }

    /// Color camera over the table with axes x, y and hue. Objects are seen
    /// at pixel resolution; hue is continuous.
    pub fn camera(world: SharedWorld, sizes: [usize; 3]) -> Self {
        Self::with_reading(world, Reading::Camera, &sizes, "camera")
    }

    pub fn end_effector(world: SharedWorld, sizes: [usize; 2]) -> Self {
        Self::with_reading(world, Reading::EndEffector, &sizes, "end_effector_sensor")
    }

    pub fn gripper(world: SharedWorld, size: usize) -> Self {
        Self::with_reading(world, Reading::Gripper, &[size], "gripper_sensor")
    }

    fn sensed_points(&self, world: &World) -> Vec<Vec<f64>> {
        let sizes = self.field.sizes();
        let at = |fraction: f64, axis: usize| SimConfig::to_index(fraction, sizes[axis]);
        match self.reading {
            Reading::Camera => world
                .visible()
                .map(|o| vec![at(o.x, 0).round(), at(o.y, 1).round(), at(o.hue, 2)])
                .collect(),
            Reading::EndEffector => {
                let [x, y] = world.end_effector;
                vec![vec![at(x, 0), at(y, 1)]]
            }
            Reading::Gripper => vec![vec![at(world.gripper, 0)]],
        }
    }
}

impl Connectable for Sensor {
    fn label(&self) -> &str {
        self.field.label()
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        Some(self.field.sizes())
    }

    fn output(&self) -> &ArrayD<f64> {
        self.field.output()
    }

    fn step(&mut self, _inputs: &[ArrayD<f64>], _rng: &mut Prng) {
        let points = self.sensed_points(&self.world.borrow());
        let activation = sensed_activation(self.field.sizes(), &points);
        // shape is ours by construction
        let _ = self.field.set_activation(activation);
    }
}

/// Relaxes a position in `[0, 1]` onto the centroid of a 1-D profile.
///
/// A 0-D controller field with resting level 0 sets the dynamics: its boost
/// is the profile read out against a `[0, 1]` ramp and its normalization is
/// the profile's total mass. Without a peak the mass is ~0 and the position
/// stays put. The Euler gain `speed * mass / tau` is capped at 1, so a wide
/// or strong peak lands on its centroid instead of overshooting.
struct RampController {
    field: DynamicField,
    speed: f64,
}

impl RampController {
    fn new(label: &str, speed: f64) -> Self {
        let params = FieldParams {
            resting_level: 0.0,
            relaxation_time: 5.0,
            noise_strength: 0.0,
            ..FieldParams::default()
        };
        Self {
            field: DynamicField::with_params(&[], params).with_label(label),
            speed,
        }
    }

    fn advance(&mut self, position: f64, profile: &[f64]) -> f64 {
        let mass: f64 = profile.iter().sum();
        self.field.params_mut().normalization = mass;
        // uniform boost on a 0-D controller cannot fail
        let _ = self.field.set_boost(ramp_readout(profile, 0.0, 1.0));

        let current = ArrayD::from_elem(IxDyn(&[]), position);
        let rate = self.field.change_for(&current, &[])[IxDyn(&[])];
        let gain = self.speed * mass / self.field.params().relaxation_time;
        let step = if gain > 1.0 {
            self.speed * rate / gain
        } else {
            self.speed * rate
        };
        (position + step).clamp(0.0, 1.0)
    }
}

/// Drives the gripper opening toward the peak of its input field.
pub struct GripperActuator {
    world: SharedWorld,
    sizes: [usize; 1],
    controller: RampController,
    inert: ArrayD<f64>,
}

impl GripperActuator {
    pub fn new(world: SharedWorld, size: usize, speed: f64) -> Self {
        Self {
            world,
            sizes: [size],
            controller: RampController::new("gripper_controller", speed),
            inert: ArrayD::zeros(IxDyn(&[])),
        }
    }
}

impl Connectable for GripperActuator {
    fn label(&self) -> &str {
        "gripper_actuator"
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        Some(&self.sizes)
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output(&self) -> &ArrayD<f64> {
        &self.inert
    }

    fn step(&mut self, inputs: &[ArrayD<f64>], _rng: &mut Prng) {
        let Some(profile) = inputs.first() else {
            return;
        };
        let mut world = self.world.borrow_mut();
        if !world.gripper_enabled {
            return;
        }
        let samples: Vec<f64> = profile.iter().copied().collect();
        world.gripper = self.controller.advance(world.gripper, &samples);
    }

    fn release(&mut self) {
        let mut world = self.world.borrow_mut();
        if world.gripper_enabled {
            world.gripper_enabled = false;
            info!(opening = world.gripper, "gripper released");
        }
    }
}

/// Drives the end effector toward the peak of a 2-D field over the table.
/// Each axis follows the field's max-projection onto that axis.
pub struct ArmActuator {
    world: SharedWorld,
    sizes: [usize; 2],
    controllers: [RampController; 2],
    inert: ArrayD<f64>,
}

impl ArmActuator {
    pub fn new(world: SharedWorld, sizes: [usize; 2], speed: f64) -> Self {
        Self {
            world,
            sizes,
            controllers: [
                RampController::new("arm_controller_x", speed),
                RampController::new("arm_controller_y", speed),
            ],
            inert: ArrayD::zeros(IxDyn(&[])),
        }
    }
}

impl Connectable for ArmActuator {
    fn label(&self) -> &str {
        "arm_actuator"
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        Some(&self.sizes)
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output(&self) -> &ArrayD<f64> {
        &self.inert
    }

    fn step(&mut self, inputs: &[ArrayD<f64>], _rng: &mut Prng) {
        let Some(plane) = inputs.first() else {
            return;
        };
        let mut world = self.world.borrow_mut();
        if !world.arm_enabled {
            return;
        }
        for (axis, controller) in self.controllers.iter_mut().enumerate() {
            // keep `axis`, fold the other one
            let profile = plane.fold_axis(Axis(1 - axis), 0.0_f64, |acc, v| acc.max(*v));
            let samples: Vec<f64> = profile.iter().copied().collect();
            world.end_effector[axis] = controller.advance(world.end_effector[axis], &samples);
        }
    }

    fn release(&mut self) {
        let mut world = self.world.borrow_mut();
        if world.arm_enabled {
            world.arm_enabled = false;
            let [x, y] = world.end_effector;
            info!(x, y, "arm released");
        }
    }
}

/// Advances world time. Stepped first each tick so every sensor sees the
/// same scene.
pub struct Clock {
    world: SharedWorld,
    inert: ArrayD<f64>,
}

impl Clock {
    pub fn new(world: SharedWorld) -> Self {
        Self {
            world,
            inert: ArrayD::zeros(IxDyn(&[])),
        }
    }
}

impl Connectable for Clock {
    fn label(&self) -> &str {
        "clock"
    }

    fn input_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output_dimension_sizes(&self) -> Option<&[usize]> {
        None
    }

    fn output(&self) -> &ArrayD<f64> {
        &self.inert
    }

    fn step(&mut self, _inputs: &[ArrayD<f64>], _rng: &mut Prng) {
        let mut world = self.world.borrow_mut();
        world.tick += 1;
        let tick = world.tick;
        for object in world.scene.iter().filter(|o| o.visible_from == tick) {
            debug!(hue = object.hue, x = object.x, y = object.y, tick, "object enters view");
        }
    }
}
