//! The map configuration table: blueprint, start and goal per map id.

use nalgebra::Vector3;
use rilo_env::LocalizationError;

/// One row of the table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapEntry {
    /// Blueprint descriptor handed to the map provider
    pub blueprint: &'static str,
    pub start: [f64; 3],
    pub goal: [f64; 3],
}

impl MapEntry {
    pub fn start(&self) -> Vector3<f64> {
        Vector3::from(self.start)
    }

    pub fn goal(&self) -> Vector3<f64> {
        Vector3::from(self.goal)
    }
}

const fn entry(blueprint: &'static str, start: [f64; 3], goal: [f64; 3]) -> MapEntry {
    MapEntry { blueprint, start, goal }
}

/// Immutable table, indexed by `MapId - 1`.
pub const MAP_TABLE: [MapEntry; 15] = [
    entry("defstr", [20.0, 20.0, 0.2], [60.0, 110.0, 0.1]),
    entry("office", [20.0, 80.0, 0.4], [18.0, 15.0, 0.3]),
    entry("11Dbibli", [5.0, 5.0, 0.8], [10.0, 135.0, 0.7]),
    entry("DLR", [20.0, 15.0, 1.0], [20.0, 55.0, 0.5]),
    entry("DLR2", [20.0, 15.0, 1.2], [20.0, 55.0, 1.5]),
    entry("Luebbers", [2.0, 2.0, 1.4], [50.0, 50.0, 1.3]),
    entry("TC2_METIS", [80.0, 50.0, 1.8], [5.0, 65.0, 1.6]),
    entry("TC1_METIS", [15.0, 25.0, 2.0], [65.0, 125.0, 1.8]),
    entry("W2PTIN", [80.0, 20.0, 1.7], [30.0, 75.0, 1.2]),
    entry("defdiff", [10.0, 10.0, 1.5], [24.0, 53.0, 1.4]),
    entry("defsthdiff", [5.0, 5.0, 1.1], [5.0, 60.0, 0.6]),
    entry("edge", [10.0, 10.0, 0.7], [50.0, 60.0, 0.4]),
    entry("homeK_vf", [35.0, 10.0, 0.5], [25.0, 45.0, 0.2]),
    entry("klepal", [5.0, 40.0, 0.3], [20.0, 80.0, 1.8]),
    entry("testair0", [10.0, 10.0, 0.1], [28.0, 52.0, 0.8]),
];

/// 1-based map identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapId(u8);

impl MapId {
    pub fn new(id: u8) -> Result<Self, LocalizationError> {
        if (1..=MAP_TABLE.len() as u8).contains(&id) {
            Ok(Self(id))
        } else {
            Err(LocalizationError::InvalidMapId(format!(
                "{} (expected 1..={})",
                id,
                MAP_TABLE.len()
            )))
        }
    }

    pub fn all() -> Vec<MapId> {
        (1..=MAP_TABLE.len() as u8).map(MapId).collect()
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    pub fn entry(&self) -> &'static MapEntry {
        &MAP_TABLE[self.0 as usize - 1]
    }

    pub fn name(&self) -> &'static str {
        self.entry().blueprint
    }
}

impl TryFrom<u8> for MapId {
    type Error = LocalizationError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        MapId::new(id)
    }
}

impl std::fmt::Display for MapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.0, self.name())
    }
}

impl std::str::FromStr for MapId {
    type Err = LocalizationError;

    /// Accepts the numeric id or the blueprint name, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(id) = trimmed.parse::<u8>() {
            return MapId::new(id);
        }
        let stem = trimmed.strip_suffix(".ini").unwrap_or(trimmed);
        MAP_TABLE
            .iter()
            .position(|e| e.blueprint.eq_ignore_ascii_case(stem))
            .map(|i| MapId(i as u8 + 1))
            .ok_or_else(|| LocalizationError::InvalidMapId(s.to_string()))
    }
}
