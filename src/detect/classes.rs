use anyhow::{anyhow, Result};
use image::Rgb;
use regex::Regex;
use serde::Deserialize;

/// Class names of the behavior model, in class id order.
pub const BEHAVIOR_CLASSES: [&str; 3] = ["Smoke", "Phone", "Drink"];

/// Largest class id accepted from model metadata.
const MAX_METADATA_CLASS_ID: usize = 4096;

/// Box color for class ids outside the table.
pub const NEUTRAL_COLOR: Rgb<u8> = Rgb([200, 200, 200]);

/// Ordered class id -> name table supplied by the loaded model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassTable {
    names: Vec<String>,
}

impl ClassTable {
    pub fn new<S: Into<String>>(names: Vec<S>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(anyhow!("class table must contain at least one class"));
        }
        if let Some(blank) = names.iter().position(|n| n.trim().is_empty()) {
            return Err(anyhow!("class {} has an empty name", blank));
        }
        Ok(Self { names })
    }

    /// The three-class driver behavior table.
    pub fn behaviors() -> Self {
        Self {
            names: BEHAVIOR_CLASSES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Parse the `names` metadata entry written by YOLO exporters,
    /// e.g. `{0: 'Smoke', 1: 'Phone', 2: 'Drink'}`.
    ///
    /// Ids missing from a sparse mapping get a `class_<id>` placeholder.
    pub fn from_model_metadata(raw: &str) -> Result<Self> {
        let entry = Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#)?;

        let mut pairs = Vec::new();
        for caps in entry.captures_iter(raw) {
            let id = caps[1]
                .parse::<usize>()
                .ok()
                .filter(|id| *id <= MAX_METADATA_CLASS_ID)
                .ok_or_else(|| {
                    anyhow!(
                        "class id '{}' out of range (max {})",
                        &caps[1],
                        MAX_METADATA_CLASS_ID
                    )
                })?;
            pairs.push((id, caps[2].to_string()));
        }
        let max_id = pairs
            .iter()
            .map(|(id, _)| *id)
            .max()
            .ok_or_else(|| anyhow!("no class entries found in model metadata"))?;

        let mut names: Vec<String> = (0..=max_id).map(|id| format!("class_{}", id)).collect();
        for (id, name) in pairs {
            names[id] = name;
        }
        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: u32) -> Option<&str> {
        self.names.get(class_id as usize).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Stable per-class color: hues spread evenly over the table.
    pub fn color(&self, class_id: u32) -> Rgb<u8> {
        if class_id as usize >= self.names.len() {
            return NEUTRAL_COLOR;
        }
        let hue = class_id as f32 / self.names.len() as f32;
        hsv_to_rgb(hue, 0.8, 0.9)
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::behaviors()
    }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match (i as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

/// How general-purpose model labels are folded onto behavior classes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemapMode {
    /// Remap when the model looks like a general-purpose (COCO) detector.
    #[default]
    Auto,
    None,
}

impl std::str::FromStr for RemapMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "none" | "off" => Ok(Self::None),
            other => Err(anyhow!("unknown class remap mode '{}'", other)),
        }
    }
}

/// Maps source model labels onto a target table; unmapped labels are dropped.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassRemap {
    rules: Vec<(String, u32)>,
    target: ClassTable,
    anchor: Option<u32>,
}

impl ClassRemap {
    pub fn new(rules: Vec<(String, u32)>, target: ClassTable) -> Result<Self> {
        for (source, id) in &rules {
            if target.name(*id).is_none() {
                return Err(anyhow!(
                    "remap rule '{}' targets unknown class id {}",
                    source,
                    id
                ));
            }
        }
        Ok(Self {
            rules,
            target,
            anchor: None,
        })
    }

    /// Mark a target class (e.g. the driver) whose boxes are searched again
    /// for small objects.
    pub fn with_anchor(mut self, class_id: u32) -> Result<Self> {
        if self.target.name(class_id).is_none() {
            return Err(anyhow!("anchor class id {} is not in the target table", class_id));
        }
        self.anchor = Some(class_id);
        Ok(self)
    }

    /// COCO labels folded onto Smoke/Phone/Drink, plus a Driver class for people.
    pub fn coco_behaviors() -> Self {
        let target = ClassTable {
            names: ["Smoke", "Phone", "Drink", "Driver"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let rules = [
            ("cigarette", 0),
            ("cell phone", 1),
            ("bottle", 2),
            ("cup", 2),
            ("wine glass", 2),
            ("person", 3),
        ]
        .iter()
        .map(|(name, id)| (name.to_string(), *id))
        .collect();
        Self {
            rules,
            target,
            anchor: Some(3),
        }
    }

    /// Pick the remap for a model table under the given mode.
    pub fn resolve(mode: RemapMode, model_classes: &ClassTable) -> Option<Self> {
        match mode {
            RemapMode::Auto if model_classes.contains("person") => Some(Self::coco_behaviors()),
            _ => None,
        }
    }

    pub fn target(&self) -> &ClassTable {
        &self.target
    }

    pub fn anchor(&self) -> Option<u32> {
        self.anchor
    }

    /// Target class id for a source label, if it is kept.
    pub fn map(&self, source_name: &str) -> Option<u32> {
        self.rules
            .iter()
            .find(|(name, _)| name == source_name)
            .map(|(_, id)| *id)
    }
}
