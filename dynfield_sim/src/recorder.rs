use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::architecture::GraspArchitecture;
use crate::error::SimError;

/// Writes one CSV row per tick: node levels of every behavior, the
/// precondition relays, the end effector position and the gripper opening.
pub struct TimeCourse {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TimeCourse {
    pub fn create(path: &Path, arch: &GraspArchitecture) -> Result<Self, SimError> {
        let file = File::create(path).map_err(|source| SimError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        let mut recorder = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        };

        let mut header = vec!["tick".to_string(), "task".to_string()];
        for eb in arch.behaviors() {
            for part in ["intention", "cos", "cos_memory"] {
                header.push(format!("{}.{part}", eb.label()));
            }
        }
        for i in 0..arch.preconditions.len() {
            header.push(format!("precondition{i}"));
        }
        header.extend(["end_effector_x", "end_effector_y", "gripper"].map(String::from));
        recorder.write_line(&header.join(","))?;
        Ok(recorder)
    }

    pub fn record(&mut self, arch: &GraspArchitecture) -> Result<(), SimError> {
        let level = |id| dynfield::behavior::node_level(&arch.graph, id);

        let mut row = vec![arch.graph.ticks().to_string(), fmt(level(arch.task))];
        for snap in arch.snapshots() {
            row.push(fmt(snap.intention));
            row.push(fmt(snap.cos));
            row.push(fmt(snap.cos_memory));
        }
        for &relay in &arch.preconditions {
            row.push(fmt(level(relay)));
        }
        let world = arch.world.borrow();
        row.extend(world.end_effector.map(fmt));
        row.push(fmt(world.gripper));
        self.write_line(&row.join(","))
    }

    pub fn finish(mut self) -> Result<(), SimError> {
        self.out.flush().map_err(|source| SimError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), SimError> {
        writeln!(self.out, "{line}").map_err(|source| SimError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn fmt(v: f64) -> String {
    format!("{v:.4}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    #[test]
    fn writes_header_and_one_row_per_tick() {
        let mut path = std::env::temp_dir();
        path.push(format!("dynfield-sim-course-{}.csv", std::process::id()));

        let config = SimConfig::default();
        let mut arch = GraspArchitecture::build(&config).unwrap();
        let mut course = TimeCourse::create(&path, &arch).unwrap();
        for _ in 0..3 {
            arch.tick().unwrap();
            course.record(&arch).unwrap();
        }
        course.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("tick,task,find_color.intention"));
        assert!(lines[0].contains(",move_ee.intention,move_ee.cos,move_ee.cos_memory,"));
        assert!(lines[0].ends_with("precondition2,end_effector_x,end_effector_y,gripper"));
        assert_eq!(lines[1].split(',').count(), lines[0].split(',').count());
        assert!(lines[3].starts_with("3,"));
        let _ = std::fs::remove_file(&path);
    }
}
