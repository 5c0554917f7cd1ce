pub mod errors;

pub use errors::{
    CodecResult, DosiaError, DosiaErrorCategory, DosiaResult, ErrorCode, ExitStatus, ParserResult,
};

use serde::Serialize;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum AcceleratorType {
    Unknown,
    #[default]
    Empty,
    Mlci80,
    Agility,
    MrLinac,
}

impl AcceleratorType {
    /// Resolves the treatment machine from the leading part of its name.
    pub fn from_machine_name(name: &str) -> Self {
        let name = name.trim();
        if name.starts_with("MLC160") || name.starts_with("M160") {
            Self::Agility
        } else if name.starts_with("MLC80") || name.starts_with("M80") {
            Self::Mlci80
        } else {
            Self::Unknown
        }
    }

    pub const fn leafs_per_bank(self) -> usize {
        match self {
            Self::Mlci80 => 40,
            Self::Agility | Self::MrLinac => 80,
            Self::Unknown | Self::Empty => 0,
        }
    }

    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Unknown | Self::Empty)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Empty => "EMPTY",
            Self::Mlci80 => "MLCi80",
            Self::Agility => "Agility",
            Self::MrLinac => "MRLinac",
        }
    }
}

impl Display for AcceleratorType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Energy {
    #[default]
    Unknown,
    Mv6,
    Mv7,
    Mv10,
}

impl Energy {
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.starts_with('6') {
            Self::Mv6
        } else if label.starts_with("10") {
            Self::Mv10
        } else if label.starts_with('7') {
            Self::Mv7
        } else {
            Self::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Filter {
    Unknown,
    #[default]
    Flattened,
    Unflattened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum BeamType {
    #[default]
    Unknown,
    Imrt,
    Vmat,
}

impl BeamType {
    pub fn from_label(label: &str) -> Self {
        let label = label.trim().to_ascii_lowercase();
        if label.starts_with("dynamic") {
            Self::Vmat
        } else if label.starts_with("step & shoot mlc") || label.starts_with("static") {
            Self::Imrt
        } else {
            Self::Unknown
        }
    }

    pub const fn is_arc(self) -> bool {
        matches!(self, Self::Vmat)
    }
}

/// Treatment machine. Leaf pairs per bank follow from the identity alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Accelerator {
    kind: AcceleratorType,
    pub energy: Energy,
    pub filter: Filter,
}

impl Accelerator {
    pub fn new(kind: AcceleratorType) -> Self {
        Self {
            kind,
            energy: Energy::default(),
            filter: Filter::default(),
        }
    }

    pub fn kind(&self) -> AcceleratorType {
        self.kind
    }

    pub fn leafs_per_bank(&self) -> usize {
        self.kind.leafs_per_bank()
    }

    /// Replaces the machine identity while keeping energy and filter already parsed.
    pub fn reidentify(self, kind: AcceleratorType) -> Self {
        Self { kind, ..self }
    }

    /// Sets energy and filter from a machine energy name such as `6X` or `10 MV FFF`.
    pub fn apply_energy_name(&mut self, name: &str) {
        self.energy = Energy::from_label(name);
        if self.energy == Energy::Unknown {
            self.filter = Filter::Unknown;
        }
        if name.trim_end().ends_with("FFF") {
            self.filter = Filter::Unflattened;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Span {
    pub start: f64,
    pub end: f64,
}

impl Span {
    pub const fn fixed(value: f64) -> Self {
        Self {
            start: value,
            end: value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ModifierOrientation {
    #[default]
    NotPresent,
    IecX,
    IecY,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct JawPair {
    pub orientation: ModifierOrientation,
    /// Most negative jaw.
    pub j1: Span,
    pub j2: Span,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LeafBanks {
    pub orientation: ModifierOrientation,
    pub left: Vec<Span>,
    pub right: Vec<Span>,
}

impl LeafBanks {
    pub fn with_leaf_pairs(leaf_pairs: usize) -> Self {
        Self {
            orientation: ModifierOrientation::default(),
            left: vec![Span::default(); leaf_pairs],
            right: vec![Span::default(); leaf_pairs],
        }
    }

    pub fn leaf_pairs(&self) -> usize {
        self.left.len()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Collimator {
    pub parallel_jaw: JawPair,
    pub perpendicular_jaw: JawPair,
    pub mlc: LeafBanks,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BeamGeometry {
    pub relative_weight: f64,
    pub isocenter: [f64; 3],
    pub gantry_angle: Span,
    pub couch_angle: Span,
    pub collimator_angle: Span,
    /// Dose-scoring field box, (x, y) lower corner.
    pub field_min: (f64, f64),
    pub field_max: (f64, f64),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ControlPoint {
    pub collimator: Collimator,
    pub geometry: BeamGeometry,
}

impl ControlPoint {
    pub fn with_leaf_pairs(leaf_pairs: usize) -> Self {
        Self {
            collimator: Collimator {
                mlc: LeafBanks::with_leaf_pairs(leaf_pairs),
                ..Collimator::default()
            },
            geometry: BeamGeometry::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamMetaData {
    pub beam_type: BeamType,
    pub weight: f64,
    pub mu_per_fraction: f64,
    pub fraction_count: u32,
    pub accelerator: Accelerator,
    pub prescription_dose: f64,
    pub isocenter_name: String,
    pub isocenter: [f64; 3],
    pub hu_slope: f64,
    pub hu_intercept: f64,
    pub outside_patient_air_threshold: f64,
    pub outside_patient_ct_number: i32,
    pub patient_position: String,
    pub couch_removal_y: f64,
    pub couch_height: f64,
}

impl Default for BeamMetaData {
    fn default() -> Self {
        Self {
            beam_type: BeamType::default(),
            weight: 0.0,
            mu_per_fraction: 1.0,
            fraction_count: 1,
            accelerator: Accelerator::default(),
            prescription_dose: 0.0,
            isocenter_name: String::new(),
            isocenter: [0.0; 3],
            hu_slope: 1.0,
            hu_intercept: 0.0,
            outside_patient_air_threshold: 0.0,
            outside_patient_ct_number: 0,
            patient_position: String::new(),
            couch_removal_y: 0.0,
            couch_height: 0.0,
        }
    }
}

/// One beam of a plan: metadata plus control points in delivery order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BeamRecord {
    pub metadata: BeamMetaData,
    pub control_points: Vec<ControlPoint>,
}

impl BeamRecord {
    pub fn control_point_count(&self) -> usize {
        self.control_points.len()
    }

    pub fn total_relative_weight(&self) -> f64 {
        let weights: Vec<f64> = self
            .control_points
            .iter()
            .map(|cp| cp.geometry.relative_weight)
            .collect();
        crate::numerics::stable_sum(&weights)
    }

    pub fn log_summary(&self) {
        let metadata = &self.metadata;
        tracing::trace!(
            fractions = metadata.fraction_count,
            mu_per_fraction = metadata.mu_per_fraction,
            prescription_dose = metadata.prescription_dose,
            beam_weight = metadata.weight,
            control_points = self.control_points.len(),
            "beam record"
        );
        for (index, cp) in self.control_points.iter().enumerate() {
            let geometry = &cp.geometry;
            let collimator = &cp.collimator;
            tracing::trace!(
                index,
                field_min = ?geometry.field_min,
                field_max = ?geometry.field_max,
                parallel_jaw = ?(collimator.parallel_jaw.j1.start, collimator.parallel_jaw.j2.start),
                perpendicular_jaw =
                    ?(collimator.perpendicular_jaw.j1.start, collimator.perpendicular_jaw.j2.start),
                gantry = geometry.gantry_angle.start,
                relative_weight = geometry.relative_weight,
                "control point"
            );
        }
        if let Some(first) = self.control_points.first() {
            for (pair, (left, right)) in first
                .collimator
                .mlc
                .left
                .iter()
                .zip(&first.collimator.mlc.right)
                .enumerate()
            {
                tracing::trace!(pair, left = left.start, right = right.start, "first leaf bank");
            }
        }
    }
}
