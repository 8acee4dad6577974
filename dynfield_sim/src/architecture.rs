//! The grasp architecture: find the target color, move the end effector
//! onto it, open the gripper, close it.
//!
//! ```text
//! task ──► find_color ──► move_ee ──► gripper_open ──► gripper_close   (each ──► a precondition)
//! camera (x, y, hue) ──[compress to hue]──► find_color CoS field
//! camera ──[target hue filter, compress to (x, y), scale]──► spatial_target ──► move_ee intention field
//! move_ee intention field ──► arm actuator
//! end_effector_sensor ──► move_ee CoS field
//! gripper intention field (shared by open/close) ──► gripper actuator
//! gripper_sensor ──► open CoS field, close CoS field
//! ```

use std::path::Path;

use dynfield::behavior::sequencing::{connect_to_task_with, precondition_with};
use dynfield::behavior::tuning;
use dynfield::kernel::{Boundary, GaussKernel, KernelMode};
use dynfield::math::gauss_1d;
use dynfield::observer::{BehaviorAdapter, BehaviorSnapshot};
use dynfield::{DynamicField, ElementaryBehavior, Graph, NodeId, Projection, Scaler, Weight};
use ndarray::{ArrayD, IxDyn};
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::error::SimError;
use crate::world::{ArmActuator, Clock, GripperActuator, Sensor, SharedWorld, World};

pub struct GraspArchitecture {
    pub graph: Graph,
    pub world: SharedWorld,
    pub task: NodeId,
    pub find_color: ElementaryBehavior,
    pub move_ee: ElementaryBehavior,
    pub spatial_target: NodeId,
    pub gripper_open: ElementaryBehavior,
    pub gripper_close: ElementaryBehavior,
    pub preconditions: Vec<NodeId>,
    task_onset: u64,
    task_boost: f64,
}

impl GraspArchitecture {
    pub fn build(config: &SimConfig) -> Result<Self, SimError> {
        let mut graph = Graph::with_seed(config.seed);
        let world = World::new(config);
        let behavior = &config.behavior;

        let [camera_x, camera_y] = config.camera_size;
        let arm = [config.arm_size; 2];

        // Sensors first so every field sees this tick's world.
        graph.add_external(Clock::new(world.clone()));
        let camera = graph.add_external(Sensor::camera(
            world.clone(),
            [camera_x, camera_y, config.hue_size],
        ));
        let end_effector_sensor = graph.add_external(Sensor::end_effector(world.clone(), arm));
        let gripper_sensor = graph.add_external(Sensor::gripper(world.clone(), config.gripper_size));

        let task = graph.add_node("task");

        let hue_tuning = tuning(
            &[config.hue_size],
            config.tuning_amplitude,
            config.tuning_width,
            &[SimConfig::to_index(config.target_hue, config.hue_size)],
        );
        let find_color = ElementaryBehavior::with_internal_fields(
            &mut graph,
            "find_color",
            &[config.hue_size],
            hue_tuning,
            behavior,
        )?;
        graph.connect(
            camera,
            find_color.cos_field(),
            vec![
                Projection::new(3, 1, [2], [0])?.into(),
                Weight::new(config.sensor_to_cos).into(),
            ],
        )?;

        // Where on the table the target color is, on the arm's grid.
        let spatial_target = graph.add_field(
            DynamicField::with_params(&arm, behavior.field_params.clone()).with_label("spatial_target"),
        );
        graph.connect(
            camera,
            spatial_target,
            vec![
                Weight::new(hue_filter(config)).into(),
                Projection::new(3, 2, [0, 1], [0, 1])?.into(),
                Scaler::new().into(),
                Weight::new(config.camera_to_target).into(),
            ],
        )?;

        let move_ee = ElementaryBehavior::with_internal_fields(
            &mut graph,
            "move_ee",
            &arm,
            config.move_ee_preshape,
            behavior,
        )?;
        graph.connect(
            spatial_target,
            move_ee.intention_field(),
            vec![Weight::new(config.target_to_intention).into()],
        )?;
        graph.connect(
            end_effector_sensor,
            move_ee.cos_field(),
            vec![Weight::new(config.sensor_to_cos).into()],
        )?;
        let arm_actuator = graph.add_external(ArmActuator::new(world.clone(), arm, config.arm_speed));
        graph.connect(move_ee.intention_field(), arm_actuator, vec![])?;

        let gripper_intention =
            graph.add_field(gripper_field(config, "gripper.intention_field", None)?);
        let open_cos = graph.add_field(gripper_field(
            config,
            "gripper_open.cos_field",
            Some(config.gripper_open),
        )?);
        let close_cos = graph.add_field(gripper_field(
            config,
            "gripper_close.cos_field",
            Some(config.gripper_closed),
        )?);
        for cos in [open_cos, close_cos] {
            graph.connect(
                gripper_sensor,
                cos,
                vec![Weight::new(config.sensor_to_cos).into()],
            )?;
        }

        let gripper_open = ElementaryBehavior::new(
            &mut graph,
            "gripper_open",
            gripper_intention,
            open_cos,
            gripper_tuning(config, config.gripper_open),
            behavior,
        )?;
        let gripper_close = ElementaryBehavior::new(
            &mut graph,
            "gripper_close",
            gripper_intention,
            close_cos,
            gripper_tuning(config, config.gripper_closed),
            behavior,
        )?;

        let actuator = graph.add_external(GripperActuator::new(
            world.clone(),
            config.gripper_size,
            config.gripper_speed,
        ));
        graph.connect(gripper_intention, actuator, vec![])?;

        for eb in [&find_color, &move_ee, &gripper_open, &gripper_close] {
            connect_to_task_with(&mut graph, task, eb, &config.sequencing)?;
        }
        let preconditions = vec![
            precondition_with(&mut graph, &find_color, &move_ee, task, &config.sequencing)?,
            precondition_with(&mut graph, &move_ee, &gripper_open, task, &config.sequencing)?,
            precondition_with(&mut graph, &gripper_open, &gripper_close, task, &config.sequencing)?,
        ];

        info!(
            nodes = graph.len(),
            connections = graph.connections().len(),
            "grasp architecture assembled"
        );

        Ok(Self {
            graph,
            world,
            task,
            find_color,
            move_ee,
            spatial_target,
            gripper_open,
            gripper_close,
            preconditions,
            task_onset: config.task_onset,
            task_boost: config.task_boost,
        })
    }

    pub fn behaviors(&self) -> [&ElementaryBehavior; 4] {
        [
            &self.find_color,
            &self.move_ee,
            &self.gripper_open,
            &self.gripper_close,
        ]
    }

    pub fn snapshots(&self) -> Vec<BehaviorSnapshot> {
        self.behaviors()
            .iter()
            .map(|eb| BehaviorAdapter::new(&self.graph, eb).snapshot())
            .collect()
    }

    pub fn is_done(&self) -> bool {
        self.behaviors().iter().all(|eb| eb.is_complete(&self.graph))
    }

    /// Advance the whole architecture by one tick.
    pub fn tick(&mut self) -> Result<(), SimError> {
        if self.graph.ticks() == self.task_onset {
            self.graph.field_mut(self.task)?.set_boost(self.task_boost)?;
            debug!(tick = self.task_onset, "task boosted");
        }
        self.graph.step();
        Ok(())
    }

    /// Append each node's activation to `dir/<label>.log`.
    pub fn start_activation_logs(&mut self, dir: &Path) -> Result<(), SimError> {
        std::fs::create_dir_all(dir).map_err(|source| SimError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
        let ids: Vec<NodeId> = self.graph.node_ids().collect();
        for id in ids {
            let Ok(field) = self.graph.field_mut(id) else {
                continue;
            };
            let label = dynfield::Connectable::label(field).replace(['/', ' '], "_");
            if label.is_empty() {
                continue;
            }
            let path = dir.join(format!("{label}.log"));
            if let Err(e) = field.start_activation_log(&path) {
                warn!(path = %path.display(), error = %e, "cannot open activation log");
            }
        }
        Ok(())
    }

    pub fn release(&mut self) {
        self.graph.release_all();
    }
}

fn gripper_field(
    config: &SimConfig,
    label: &str,
    expectation: Option<f64>,
) -> Result<DynamicField, SimError> {
    let size = config.gripper_size;
    let mut field = DynamicField::with_params(&[size], config.behavior.field_params.clone())
        .with_label(label);
    // the opening axis has hard ends
    field.set_boundary(Boundary::Zero);
    field.set_kernel(GaussKernel::from_modes(
        1,
        &[KernelMode {
            amplitude: config.behavior.field_kernel_amplitude,
            widths: vec![config.behavior.field_kernel_width],
            shifts: vec![0.0],
        }],
    )?)?;
    if let Some(opening) = expectation {
        let boost = tuning(
            &[size],
            config.cos_expectation,
            config.tuning_width,
            &[SimConfig::to_index(opening, size)],
        );
        field.set_boost(boost)?;
    }
    Ok(field)
}

/// Passes camera pixels of the target hue, whatever their position.
fn hue_filter(config: &SimConfig) -> ArrayD<f64> {
    let [x, y] = config.camera_size;
    let hue = gauss_1d(
        config.hue_size,
        1.0,
        config.tuning_width,
        SimConfig::to_index(config.target_hue, config.hue_size),
    );
    ArrayD::from_shape_fn(IxDyn(&[x, y, config.hue_size]), |idx| hue[idx[2]])
}

fn gripper_tuning(config: &SimConfig, opening: f64) -> ArrayD<f64> {
    tuning(
        &[config.gripper_size],
        config.tuning_amplitude,
        config.tuning_width,
        &[SimConfig::to_index(opening, config.gripper_size)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> SimConfig {
        let mut config = SimConfig::default();
        config.behavior.node_params.noise_strength = 0.0;
        config.behavior.field_params.noise_strength = 0.0;
        config.sequencing.relay_params.noise_strength = 0.0;
        config
    }

    #[test]
    fn nothing_happens_before_the_task() {
        let mut config = quiet();
        config.task_onset = 1_000;
        let mut arch = GraspArchitecture::build(&config).unwrap();
        for _ in 0..300 {
            arch.tick().unwrap();
        }
        assert!(arch.behaviors().iter().all(|eb| !eb.is_active(&arch.graph)));
        assert!((arch.world.borrow().gripper - config.gripper_start).abs() < 1e-6);
        let [x, y] = arch.world.borrow().end_effector;
        assert!((x - config.end_effector_start[0]).abs() < 1e-6);
        assert!((y - config.end_effector_start[1]).abs() < 1e-6);
    }

    #[test]
    fn find_color_waits_for_the_target_to_appear() {
        let config = quiet();
        let mut arch = GraspArchitecture::build(&config).unwrap();
        for _ in 0..140 {
            arch.tick().unwrap();
        }
        // only the distractor is visible so far
        assert!(arch.find_color.is_active(&arch.graph));
        assert!(!arch.find_color.is_complete(&arch.graph));
        assert!(!arch.move_ee.is_active(&arch.graph));
        assert!(!arch.gripper_open.is_active(&arch.graph));
        // no target color in view, so nothing to reach for
        let target = arch.graph.output(arch.spatial_target).unwrap();
        assert!(target.iter().all(|&v| v < 0.01));
    }

    #[test]
    fn spatial_target_marks_only_the_target_color() {
        let config = quiet();
        let mut arch = GraspArchitecture::build(&config).unwrap();
        for _ in 0..300 {
            arch.tick().unwrap();
        }
        let target = arch.graph.output(arch.spatial_target).unwrap();
        assert_eq!(target.shape(), &[config.arm_size, config.arm_size]);
        // camera pixel (10, 4) of 15 lands on (20, 8) of 29
        assert!(target[[20, 8]] > 0.9);
        // the distractor sits at pixel (4, 8), i.e. (8, 16)
        assert!(target[[8, 16]] < 0.01);
        assert!(target.iter().filter(|&&v| v > 0.5).count() <= 4);
    }

    #[test]
    fn grasp_runs_in_order_to_completion() {
        let config = quiet();
        let mut arch = GraspArchitecture::build(&config).unwrap();

        let mut opened_at = None;
        let mut closed_at = None;
        let mut found_at = None;
        let mut reached_at = None;
        for tick in 0..config.ticks {
            arch.tick().unwrap();
            let g = &arch.graph;
            if found_at.is_none() && arch.find_color.is_complete(g) {
                found_at = Some(tick);
            }
            if reached_at.is_none() && arch.move_ee.is_complete(g) {
                reached_at = Some(tick);
            }
            if opened_at.is_none() && arch.gripper_open.is_complete(g) {
                opened_at = Some(tick);
            }
            if closed_at.is_none() && arch.gripper_close.is_complete(g) {
                closed_at = Some(tick);
            }
            if arch.is_done() {
                break;
            }
        }

        let found = found_at.unwrap();
        let reached = reached_at.unwrap();
        let opened = opened_at.unwrap();
        let closed = closed_at.unwrap();
        assert!(
            found < reached && reached < opened && opened < closed,
            "{found} {reached} {opened} {closed}"
        );
        assert!(found > 150);

        let world = arch.world.borrow().clone();
        let target = &config.scene[1];
        assert!((world.end_effector[0] - target.x).abs() < 0.05, "{:?}", world.end_effector);
        assert!((world.end_effector[1] - target.y).abs() < 0.05, "{:?}", world.end_effector);
        assert!((world.gripper - config.gripper_closed).abs() < 0.1);

        arch.release();
        assert!(!arch.world.borrow().gripper_enabled);
        assert!(!arch.world.borrow().arm_enabled);
    }
}
