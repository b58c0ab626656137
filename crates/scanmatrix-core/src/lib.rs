pub mod area;
pub mod clock;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use area::{Area, AreaShape, Coordinate};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid area: {0}")]
    InvalidArea(String),
    #[error("Unknown instance type: {0}")]
    UnknownInstanceType(String),
    #[error("Missing lookup: {0}")]
    MissingLookup(String),
    #[error("Invalid assignment: {0}")]
    InvalidAssignment(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// A scanning device as tracked by the orchestrator's registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub account_username: Option<String>,
    #[serde(default)]
    pub last_location: Option<Coordinate>,
    /// Unix seconds of the last check-in.
    #[serde(default)]
    pub last_seen: Option<i64>,
    #[serde(default)]
    pub pending_account_switch: bool,
}

impl Device {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            instance_name: None,
            account_username: None,
            last_location: None,
            last_seen: None,
            pending_account_switch: false,
        }
    }

    pub fn with_instance(mut self, instance_name: impl Into<String>) -> Self {
        self.instance_name = Some(instance_name.into());
        self
    }

    pub fn is_on(&self, instance_name: &str) -> bool {
        self.instance_name.as_deref() == Some(instance_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Scan job variants. `Custom` carries the tag of a variant registered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InstanceType {
    CirclePokemon,
    CircleRaid,
    SmartCircleRaid,
    AutoQuest,
    PokemonIv,
    Bootstrap,
    FindUnknownSpawnpoint,
    Custom(String),
}

impl InstanceType {
    pub const BUILTIN: [InstanceType; 7] = [
        InstanceType::CirclePokemon,
        InstanceType::CircleRaid,
        InstanceType::SmartCircleRaid,
        InstanceType::AutoQuest,
        InstanceType::PokemonIv,
        InstanceType::Bootstrap,
        InstanceType::FindUnknownSpawnpoint,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            InstanceType::CirclePokemon => "circle_pokemon",
            InstanceType::CircleRaid => "circle_raid",
            InstanceType::SmartCircleRaid => "smart_circle_raid",
            InstanceType::AutoQuest => "auto_quest",
            InstanceType::PokemonIv => "pokemon_iv",
            InstanceType::Bootstrap => "bootstrap",
            InstanceType::FindUnknownSpawnpoint => "find_unknown_spawnpoint",
            InstanceType::Custom(tag) => tag.as_str(),
        }
    }

    /// Circle types walk a flat route; area types cover polygons.
    pub fn area_shape(&self) -> AreaShape {
        match self {
            InstanceType::CirclePokemon
            | InstanceType::CircleRaid
            | InstanceType::SmartCircleRaid => AreaShape::Points,
            _ => AreaShape::Polygons,
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "circle_pokemon" => Ok(InstanceType::CirclePokemon),
            "circle_raid" => Ok(InstanceType::CircleRaid),
            "smart_circle_raid" => Ok(InstanceType::SmartCircleRaid),
            "auto_quest" => Ok(InstanceType::AutoQuest),
            "pokemon_iv" => Ok(InstanceType::PokemonIv),
            "bootstrap" => Ok(InstanceType::Bootstrap),
            "find_unknown_spawnpoint" => Ok(InstanceType::FindUnknownSpawnpoint),
            other => match other.strip_prefix("custom:") {
                Some(tag) if !tag.is_empty() => Ok(InstanceType::Custom(other.to_string())),
                _ => Err(CoreError::UnknownInstanceType(other.to_string())),
            },
        }
    }
}

impl TryFrom<String> for InstanceType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<InstanceType> for String {
    fn from(value: InstanceType) -> Self {
        value.as_str().to_string()
    }
}

fn default_min_level() -> u8 {
    0
}

fn default_max_level() -> u8 {
    50
}

/// Type-specific instance configuration. Fields a variant does not use are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    #[serde(default = "default_min_level")]
    pub min_level: u8,
    #[serde(default = "default_max_level")]
    pub max_level: u8,
    #[serde(default)]
    pub geofences: Vec<String>,
    #[serde(default)]
    pub route_style: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub spin_limit: Option<u32>,
    #[serde(default)]
    pub iv_list: Option<String>,
    #[serde(default)]
    pub iv_queue_limit: Option<usize>,
    #[serde(default)]
    pub circle_size: Option<u32>,
    #[serde(default)]
    pub fast_bootstrap_mode: bool,
    #[serde(default)]
    pub account_group: Option<String>,
    #[serde(default)]
    pub is_event: bool,
}

impl Default for InstanceData {
    fn default() -> Self {
        Self {
            min_level: default_min_level(),
            max_level: default_max_level(),
            geofences: Vec::new(),
            route_style: None,
            timezone: None,
            spin_limit: None,
            iv_list: None,
            iv_queue_limit: None,
            circle_size: None,
            fast_bootstrap_mode: false,
            account_group: None,
            is_event: false,
        }
    }
}

/// Persisted scan job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    #[serde(default)]
    pub data: InstanceData,
}

impl Instance {
    pub fn new(name: impl Into<String>, instance_type: InstanceType) -> Self {
        Self {
            name: name.into(),
            instance_type,
            data: InstanceData::default(),
        }
    }

    pub fn with_geofence(mut self, geofence: impl Into<String>) -> Self {
        self.data.geofences.push(geofence.into());
        self
    }

    pub fn with_data(mut self, data: InstanceData) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceKind {
    Circle,
    Polygon,
}

/// Named area definition. `area` is the raw payload as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub name: String,
    pub kind: GeofenceKind,
    pub area: serde_json::Value,
}

/// Ordered species priority list; earlier entries rank higher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvList {
    pub name: String,
    pub pokemon: Vec<u16>,
}

impl IvList {
    pub fn priority_of(&self, pokemon_id: u16) -> Option<usize> {
        self.pokemon.iter().position(|id| *id == pokemon_id)
    }
}

/// Rule moving a device (or group) onto `instance_name`.
///
/// `time` is seconds since local midnight; zero means the rule fires when the
/// source instance signals completion instead of on the clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: u32,
    pub instance_name: String,
    #[serde(default)]
    pub source_instance_name: Option<String>,
    #[serde(default)]
    pub device_uuid: Option<String>,
    #[serde(default)]
    pub device_group_name: Option<String>,
    #[serde(default)]
    pub time: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentTarget<'a> {
    Device(&'a str),
    Group(&'a str),
    Unspecified,
}

impl Assignment {
    pub fn for_device(id: u32, device_uuid: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            id,
            instance_name: instance.into(),
            source_instance_name: None,
            device_uuid: Some(device_uuid.into()),
            device_group_name: None,
            time: 0,
            date: None,
            enabled: true,
        }
    }

    pub fn for_group(id: u32, group: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            id,
            instance_name: instance.into(),
            source_instance_name: None,
            device_uuid: None,
            device_group_name: Some(group.into()),
            time: 0,
            date: None,
            enabled: true,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source_instance_name = Some(source.into());
        self
    }

    pub fn at(mut self, time: u32) -> Self {
        self.time = time;
        self
    }

    pub fn on(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn is_completion_trigger(&self) -> bool {
        self.time == 0
    }

    pub fn target(&self) -> AssignmentTarget<'_> {
        match (&self.device_uuid, &self.device_group_name) {
            (Some(uuid), _) => AssignmentTarget::Device(uuid),
            (None, Some(group)) => AssignmentTarget::Group(group),
            (None, None) => AssignmentTarget::Unspecified,
        }
    }

    /// One-shot rules only match on their own calendar day.
    pub fn matches_date(&self, today: NaiveDate) -> bool {
        self.date.map_or(true, |date| date == today)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_name.is_empty() {
            return Err(CoreError::InvalidAssignment(
                "target instance cannot be empty".to_string(),
            ));
        }
        if self.device_uuid.is_some() && self.device_group_name.is_some() {
            return Err(CoreError::InvalidAssignment(format!(
                "assignment {} targets both a device and a device group",
                self.id
            )));
        }
        if self.time >= clock::SECONDS_PER_DAY {
            return Err(CoreError::InvalidAssignment(format!(
                "assignment {} time {} is past midnight",
                self.id, self.time
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvStats {
    pub attack: u8,
    pub defense: u8,
    pub stamina: u8,
}

/// A wild or encountered creature decoded from a device payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub encounter_id: String,
    pub pokemon_id: u16,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub spawn_id: Option<u64>,
    #[serde(default)]
    pub expire_timestamp: Option<i64>,
    #[serde(default)]
    pub iv: Option<IvStats>,
    #[serde(default)]
    pub level: Option<u8>,
}

impl Sighting {
    pub fn new(encounter_id: impl Into<String>, pokemon_id: u16, coordinate: Coordinate) -> Self {
        Self {
            encounter_id: encounter_id.into(),
            pokemon_id,
            coordinate,
            spawn_id: None,
            expire_timestamp: None,
            iv: None,
            level: None,
        }
    }

    /// True once the despawn time has passed. Sightings without one never expire.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expire_timestamp.map_or(false, |at| at <= now)
    }

    pub fn with_iv(mut self, attack: u8, defense: u8, stamina: u8) -> Self {
        self.iv = Some(IvStats {
            attack,
            defense,
            stamina,
        });
        self
    }
}

/// Next unit of work handed to a checking-in device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Task {
    ScanPokemon {
        coordinate: Coordinate,
        min_level: u8,
        max_level: u8,
    },
    ScanRaid {
        coordinate: Coordinate,
        min_level: u8,
        max_level: u8,
    },
    ScanQuest {
        coordinate: Coordinate,
        min_level: u8,
        max_level: u8,
    },
    ScanIv {
        coordinate: Coordinate,
        encounter_id: String,
        pokemon_id: u16,
        min_level: u8,
        max_level: u8,
    },
    ScanBootstrap {
        coordinate: Coordinate,
        min_level: u8,
        max_level: u8,
    },
    ScanSpawnpoint {
        coordinate: Coordinate,
        min_level: u8,
        max_level: u8,
    },
    Idle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error_code: String,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, String>) -> Self {
        self.details = Some(details);
        self
    }
}
