//! PCR protocol settings files.
//!
//! The instrument reads its thermal program from `bio/<name>.txt` on its
//! storage card:
//!
//! ```text
//! Stage,Temperature,TimeSec,Cycles
//! Intro Denaturing,95,180,1
//! Denaturing,95,30,35
//! ...
//! ```

use crate::error::{Error, Result};
use log::info;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Header line of a settings file.
pub const HEADER: &str = "Stage,Temperature,TimeSec,Cycles";

/// Folder on the storage root that holds settings files.
pub const BIO_DIR: &str = "bio";

/// Stage names of the standard program, in order.
pub const DEFAULT_STAGES: [&str; 5] = [
    "Intro Denaturing",
    "Denaturing",
    "Annealing",
    "Extension",
    "Final Extension",
];

/// One temperature step of a program.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PcrStage {
    /// Stage label.
    pub name: String,
    /// Target temperature in degrees Celsius.
    #[cfg_attr(feature = "serde", serde(alias = "temperature"))]
    pub temperature_c: f32,
    /// Hold time in seconds.
    #[cfg_attr(feature = "serde", serde(alias = "seconds"))]
    pub duration_secs: u32,
    /// Repetitions.
    #[cfg_attr(feature = "serde", serde(default = "one"))]
    pub cycles: u32,
}

#[cfg(feature = "serde")]
fn one() -> u32 {
    1
}

/// A named thermal program.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PcrProtocol {
    /// Program name, also the file stem.
    pub name: String,
    /// Stages in execution order.
    #[cfg_attr(feature = "serde", serde(default, rename = "stage"))]
    pub stages: Vec<PcrStage>,
}

impl PcrProtocol {
    /// Create a program from its stages.
    pub fn new(name: impl Into<String>, stages: Vec<PcrStage>) -> Self {
        Self {
            name: name.into(),
            stages,
        }
    }

    /// Render the settings file.
    pub fn to_text(&self) -> String {
        let mut out = String::from(HEADER);
        for stage in &self.stages {
            let _ = write!(
                out,
                "\n{},{},{},{}",
                stage.name, stage.temperature_c, stage.duration_secs, stage.cycles
            );
        }
        out
    }

    /// Parse a settings file.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .map(str::trim)
            .enumerate()
            .filter(|(_, l)| !l.is_empty());

        match lines.next() {
            Some((_, HEADER)) => {},
            Some((_, other)) => return Err(Error::Format(format!("unexpected header {other:?}"))),
            None => return Err(Error::Format("empty settings file".into())),
        }

        let stages = lines
            .map(|(i, line)| parse_stage(line).map_err(|e| Error::Format(format!("line {}: {e}", i + 1))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(name, stages))
    }

    /// Path of this program's file under `root`.
    pub fn path_in(&self, root: &Path) -> PathBuf {
        root.join(BIO_DIR)
            .join(format!("{}.txt", self.name.trim()))
    }

    /// Check that the program can be written and read back.
    ///
    /// Stage names must be non-empty and free of commas and line breaks;
    /// hold times and cycle counts must be at least 1.
    pub fn validate(&self) -> Result<()> {
        let name = self
            .name
            .trim();
        if name.is_empty() {
            return Err(Error::Config("protocol name is empty".into()));
        }
        if name.contains(['/', '\\']) {
            return Err(Error::Config(format!("protocol name {name:?} contains a path separator")));
        }

        for (i, stage) in self
            .stages
            .iter()
            .enumerate()
        {
            let n = i + 1;
            if stage.name.trim().is_empty() {
                return Err(Error::Config(format!("stage {n} has no name")));
            }
            if stage.name.contains([',', '\n', '\r']) {
                return Err(Error::Config(format!(
                    "stage {n} name {:?} contains a comma or line break",
                    stage.name
                )));
            }
            if stage.duration_secs == 0 {
                return Err(Error::Config(format!("stage {n} ({}) has a zero hold time", stage.name)));
            }
            if stage.cycles == 0 {
                return Err(Error::Config(format!("stage {n} ({}) has zero cycles", stage.name)));
            }
        }
        Ok(())
    }

    /// Write the settings file to `<root>/bio/<name>.txt`, creating `bio/`.
    pub fn save_to(&self, root: &Path) -> Result<PathBuf> {
        self.validate()?;

        let path = self.path_in(root);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, self.to_text())?;
        info!("PCR settings saved to {}", path.display());
        Ok(path)
    }
}

fn parse_stage(line: &str) -> std::result::Result<PcrStage, String> {
    let fields: Vec<&str> = line
        .split(',')
        .map(str::trim)
        .collect();
    let [name, temperature, seconds, cycles] = fields.as_slice() else {
        return Err(format!("expected 4 fields, found {}", fields.len()));
    };

    let positive = |value: &str, what: &str| match value.parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("bad {what} {value:?}")),
        Ok(v) => Ok(v),
    };

    Ok(PcrStage {
        name: name.to_string(),
        temperature_c: temperature
            .parse()
            .map_err(|_| format!("bad temperature {temperature:?}"))?,
        duration_secs: positive(seconds, "time")?,
        cycles: positive(cycles, "cycle count")?,
    })
}
