use crate::config::{LabelsConfig, Validatable};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};
use thiserror::Error;

/// Number of categories the bin detector was trained on (full / empty).
pub const NUM_CLASSES: usize = 2;

#[derive(Error, Debug)]
pub enum LabelsError {
    #[error("Failed to read labels file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },
    #[error("Expected {expected} labels, found {0}", expected = NUM_CLASSES)]
    WrongCount(usize),
    #[error("Duplicate label: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorLabel {
    pub label: String,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl ColorLabel {
    pub fn rgb(&self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

/// Class id to label table, indexed by the detector's class id.
#[derive(Debug, Clone)]
pub struct ClassLabels {
    labels: Vec<ColorLabel>,
}

impl ClassLabels {
    pub fn new(labels: Vec<ColorLabel>) -> Result<Self, LabelsError> {
        if labels.len() != NUM_CLASSES {
            return Err(LabelsError::WrongCount(labels.len()));
        }
        for (i, label) in labels.iter().enumerate() {
            if labels[..i].iter().any(|other| other.label == label.label) {
                return Err(LabelsError::Duplicate(label.label.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        Self::new(load_color_labels(&labels_cfg.get_path())?)
    }

    pub fn get(&self, class_id: u32) -> Option<&ColorLabel> {
        self.labels.get(class_id as usize)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|label| label.label.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|label| label == name)
    }
}

/// Parses `label,red,green,blue` lines. Blank lines are skipped.
pub fn load_color_labels(filepath: &Path) -> Result<Vec<ColorLabel>, LabelsError> {
    let file = File::open(filepath)?;
    parse_color_labels(io::BufReader::new(file))
}

fn parse_color_labels(reader: impl BufRead) -> Result<Vec<ColorLabel>, LabelsError> {
    let mut color_labels = Vec::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line_number = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        let [label, red, green, blue] = parts.as_slice() else {
            return Err(LabelsError::InvalidLine {
                line: line_number,
                reason: format!("expected `label,r,g,b`, got `{}`", line),
            });
        };
        if label.is_empty() {
            return Err(LabelsError::InvalidLine {
                line: line_number,
                reason: "empty label".to_string(),
            });
        }

        let channel = |name: &str, value: &str| {
            value.parse::<u8>().map_err(|_| LabelsError::InvalidLine {
                line: line_number,
                reason: format!("invalid {} value `{}`", name, value),
            })
        };

        color_labels.push(ColorLabel {
            label: label.to_string(),
            red: channel("red", red)?,
            green: channel("green", green)?,
            blue: channel("blue", blue)?,
        });
    }

    Ok(color_labels)
}
