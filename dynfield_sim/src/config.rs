use std::fs;
use std::path::{Path, PathBuf};

use dynfield::{BehaviorConfig, SequencingWeights};
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// An object on the table. Positions and hues are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub hue: f64,
    #[serde(default = "table_center")]
    pub x: f64,
    #[serde(default = "table_center")]
    pub y: f64,
    /// First tick at which the camera sees the object.
    #[serde(default)]
    pub visible_from: u64,
}

fn table_center() -> f64 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
    pub ticks: u64,

    pub task_boost: f64,
    pub task_onset: u64,

    pub hue_size: usize,
    /// Camera resolution over the table; the hue axis uses `hue_size`.
    pub camera_size: [usize; 2],
    /// Side of the square fields over the arm's workspace.
    pub arm_size: usize,
    pub gripper_size: usize,

    pub target_hue: f64,
    pub scene: Vec<SceneObject>,

    pub end_effector_start: [f64; 2],
    /// Fraction of each arm axis controller's rate applied per tick.
    pub arm_speed: f64,

    pub gripper_start: f64,
    pub gripper_open: f64,
    pub gripper_closed: f64,
    /// Fraction of the controller's rate of change applied per tick.
    pub gripper_speed: f64,

    pub tuning_amplitude: f64,
    pub tuning_width: f64,
    pub sensor_to_cos: f64,
    /// Camera pixels of the target hue onto the spatial target field.
    pub camera_to_target: f64,
    /// Spatial target onto the move_ee intention field.
    pub target_to_intention: f64,
    /// Uniform input of the move_ee intention node onto its field. Alone it
    /// stays below threshold; a peak forms only where the target is.
    pub move_ee_preshape: f64,
    /// Subthreshold boost marking where a gripper CoS field expects the
    /// sensed opening.
    pub cos_expectation: f64,

    pub behavior: BehaviorConfig,
    pub sequencing: SequencingWeights,

    /// Stop as soon as every behavior has completed.
    pub stop_when_done: bool,
    pub time_course: Option<PathBuf>,
    pub activation_log_dir: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            ticks: 3000,
            task_boost: 10.0,
            task_onset: 2,
            hue_size: 60,
            camera_size: [15, 15],
            arm_size: 29,
            gripper_size: 30,
            target_hue: 0.7,
            scene: vec![
                SceneObject {
                    hue: 0.2,
                    x: 0.3,
                    y: 0.6,
                    visible_from: 0,
                },
                SceneObject {
                    hue: 0.7,
                    x: 0.7,
                    y: 0.3,
                    visible_from: 150,
                },
            ],
            end_effector_start: [0.2, 0.8],
            arm_speed: 1.0,
            gripper_start: 0.3,
            gripper_open: 0.85,
            gripper_closed: 0.1,
            gripper_speed: 1.0,
            tuning_amplitude: 7.0,
            tuning_width: 2.0,
            sensor_to_cos: 3.0,
            camera_to_target: 6.0,
            target_to_intention: 3.5,
            move_ee_preshape: 3.0,
            cos_expectation: 4.0,
            behavior: BehaviorConfig::default(),
            sequencing: SequencingWeights::default(),
            stop_when_done: true,
            time_course: None,
            activation_log_dir: None,
        }
    }
}

impl SimConfig {
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = fs::read_to_string(path).map_err(|source| SimError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SimError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Index of a `[0, 1]` fraction on a field of `size` samples.
    pub fn to_index(fraction: f64, size: usize) -> f64 {
        fraction.clamp(0.0, 1.0) * size.saturating_sub(1) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let c: SimConfig = serde_json::from_str(
            r#"{ "ticks": 10, "behavior": { "reactivating": true }, "scene": [{ "hue": 0.5 }] }"#,
        )
        .unwrap();
        assert_eq!(c.ticks, 10);
        assert!(c.behavior.reactivating);
        assert_eq!(c.behavior.intention_inhibition, -6.0);
        assert_eq!(
            c.scene,
            vec![SceneObject { hue: 0.5, x: 0.5, y: 0.5, visible_from: 0 }]
        );
        assert_eq!(c.hue_size, 60);
    }

    #[test]
    fn round_trips_through_json() {
        let c = SimConfig::default();
        let text = serde_json::to_string_pretty(&c).unwrap();
        let back: SimConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn fractions_map_onto_field_indices() {
        assert_eq!(SimConfig::to_index(0.0, 30), 0.0);
        assert_eq!(SimConfig::to_index(1.0, 30), 29.0);
        assert_eq!(SimConfig::to_index(2.0, 30), 29.0);
    }
}
