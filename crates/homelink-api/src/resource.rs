// Resource table
//
// Every appliance attribute the engine knows how to read or write is a
// `Resource`: an immutable (category, wire key, value kind) triple. The
// table is static; lookups by wire key or symbolic name go through a
// lazily built index.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Which API area a resource lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Setting,
    Status,
    ProgramAvailable,
    ProgramActive,
    ProgramSelected,
    ProgramActiveOption,
    Event,
}

/// How a resource's wire string is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Int,
    Bool,
    Double,
    Float,
    Long,
    Short,
    Byte,
    ByteArray,
}

/// A named, typed appliance attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resource {
    pub name: &'static str,
    pub category: ResourceCategory,
    pub key: &'static str,
    pub kind: ValueKind,
}

const fn resource(
    name: &'static str,
    category: ResourceCategory,
    key: &'static str,
    kind: ValueKind,
) -> Resource {
    Resource {
        name,
        category,
        key,
        kind,
    }
}

/// Substrings that identify measured-temperature keys. Their wire values
/// are reported in eighths of a degree.
pub const MEASURED_TEMPERATURE_MARKERS: [&str; 2] = [
    "MeasuredTemperatureRefrigerator",
    "MeasuredTemperatureFreezer",
];

impl Resource {
    // ── Refrigeration ────────────────────────────────────────────────

    pub const FREEZER_TEMPERATURE_SETPOINT: Self = resource(
        "FREEZER_TEMPERATURE_SETPOINT",
        ResourceCategory::Setting,
        "Refrigeration.FridgeFreezer.Setting.SetpointTemperatureFreezer",
        ValueKind::Int,
    );
    pub const FRIDGE_TEMPERATURE_SETPOINT: Self = resource(
        "FRIDGE_TEMPERATURE_SETPOINT",
        ResourceCategory::Setting,
        "Refrigeration.FridgeFreezer.Setting.SetpointTemperatureRefrigerator",
        ValueKind::Int,
    );
    pub const FREEZER_SUPER_MODE: Self = resource(
        "FREEZER_SUPER_MODE",
        ResourceCategory::Setting,
        "Refrigeration.FridgeFreezer.Setting.SuperModeFreezer",
        ValueKind::Bool,
    );
    pub const FRIDGE_SUPER_MODE: Self = resource(
        "FRIDGE_SUPER_MODE",
        ResourceCategory::Setting,
        "Refrigeration.FridgeFreezer.Setting.SuperModeRefrigerator",
        ValueKind::Bool,
    );
    pub const FRIDGE_ECO_MODE: Self = resource(
        "FRIDGE_ECO_MODE",
        ResourceCategory::Setting,
        "Refrigeration.Common.Setting.EcoMode",
        ValueKind::Bool,
    );
    pub const FRIDGE_MEASURED_TEMPERATURE: Self = resource(
        "FRIDGE_MEASURED_TEMPERATURE",
        ResourceCategory::Status,
        "Refrigeration.FridgeFreezer.Status.MeasuredTemperatureRefrigerator",
        ValueKind::Double,
    );
    pub const FREEZER_MEASURED_TEMPERATURE: Self = resource(
        "FREEZER_MEASURED_TEMPERATURE",
        ResourceCategory::Status,
        "Refrigeration.FridgeFreezer.Status.MeasuredTemperatureFreezer",
        ValueKind::Double,
    );

    // ── Laundry programs ─────────────────────────────────────────────

    pub const WASHER_ACTIVE_PROGRAM: Self = resource(
        "WASHER_ACTIVE_PROGRAM",
        ResourceCategory::ProgramActive,
        "BSH.Common.Root.ActiveProgram",
        ValueKind::Bool,
    );
    pub const WASHER_SELECTED_PROGRAM: Self = resource(
        "WASHER_SELECTED_PROGRAM",
        ResourceCategory::ProgramSelected,
        "BSH.Common.Root.SelectedProgram",
        ValueKind::String,
    );
    pub const WASHER_TIME_LEFT: Self = resource(
        "WASHER_TIME_LEFT",
        ResourceCategory::ProgramActiveOption,
        "BSH.Common.Option.RemainingProgramTime",
        ValueKind::Int,
    );
    pub const WASHER_END_TIME: Self = resource(
        "WASHER_END_TIME",
        ResourceCategory::ProgramActiveOption,
        "BSH.Common.Option.FinishInRelative",
        ValueKind::Int,
    );

    // ── Lighting ─────────────────────────────────────────────────────

    pub const AMBIENT_LIGHT_ENABLED: Self = resource(
        "AMBIENT_LIGHT_ENABLED",
        ResourceCategory::Setting,
        "BSH.Common.Setting.AmbientLightEnabled",
        ValueKind::Bool,
    );
    /// Percent, 10 to 100.
    pub const AMBIENT_LIGHT_BRIGHTNESS: Self = resource(
        "AMBIENT_LIGHT_BRIGHTNESS",
        ResourceCategory::Setting,
        "BSH.Common.Setting.AmbientLightBrightness",
        ValueKind::Int,
    );
    pub const AMBIENT_LIGHT_COLOR: Self = resource(
        "AMBIENT_LIGHT_COLOR",
        ResourceCategory::Setting,
        "BSH.Common.Setting.AmbientLightColor",
        ValueKind::String,
    );
    /// Hex color code, used while the color is `...AmbientLightColor.CustomColor`.
    pub const AMBIENT_LIGHT_CUSTOM_COLOR: Self = resource(
        "AMBIENT_LIGHT_CUSTOM_COLOR",
        ResourceCategory::Setting,
        "BSH.Common.Setting.AmbientLightCustomColor",
        ValueKind::String,
    );
    pub const FUNCTIONAL_LIGHT_ENABLED: Self = resource(
        "FUNCTIONAL_LIGHT_ENABLED",
        ResourceCategory::Setting,
        "Cooking.Common.Setting.Lighting",
        ValueKind::Bool,
    );
    pub const FUNCTIONAL_LIGHT_BRIGHTNESS: Self = resource(
        "FUNCTIONAL_LIGHT_BRIGHTNESS",
        ResourceCategory::Setting,
        "Cooking.Common.Setting.LightingBrightness",
        ValueKind::Int,
    );

    // ── Oven ─────────────────────────────────────────────────────────

    pub const OVEN_CAVITY_TEMPERATURE: Self = resource(
        "OVEN_CAVITY_TEMPERATURE",
        ResourceCategory::Status,
        "Cooking.Oven.Status.CurrentCavityTemperature",
        ValueKind::Double,
    );

    // ── Common status ────────────────────────────────────────────────

    pub const POWER_STATE: Self = resource(
        "POWER_STATE",
        ResourceCategory::Setting,
        "BSH.Common.Setting.PowerState",
        ValueKind::String,
    );
    pub const DOOR_STATE: Self = resource(
        "DOOR_STATE",
        ResourceCategory::Status,
        "BSH.Common.Status.DoorState",
        ValueKind::String,
    );
    pub const OPERATION_STATE: Self = resource(
        "OPERATION_STATE",
        ResourceCategory::Status,
        "BSH.Common.Status.OperationState",
        ValueKind::String,
    );
    pub const REMOTE_CONTROL_START_ALLOWED: Self = resource(
        "REMOTE_CONTROL_START_ALLOWED",
        ResourceCategory::Status,
        "BSH.Common.Status.RemoteControlStartAllowed",
        ValueKind::Bool,
    );
    pub const REMOTE_CONTROL_ACTIVE: Self = resource(
        "REMOTE_CONTROL_ACTIVE",
        ResourceCategory::Status,
        "BSH.Common.Status.RemoteControlActive",
        ValueKind::Bool,
    );
    pub const LOCAL_CONTROL_ACTIVE: Self = resource(
        "LOCAL_CONTROL_ACTIVE",
        ResourceCategory::Status,
        "BSH.Common.Status.LocalControlActive",
        ValueKind::Bool,
    );

    /// Every known resource.
    pub fn all() -> &'static [Resource] {
        RESOURCES
    }

    /// Look up a resource by wire key, ignoring ASCII case.
    pub fn by_key(key: &str) -> Option<&'static Resource> {
        INDEX.by_key.get(&key.to_ascii_lowercase()).copied()
    }

    /// Look up a resource by symbolic name. `-` and `_` are interchangeable
    /// and case is ignored, so `fridge-eco-mode` finds `FRIDGE_ECO_MODE`.
    pub fn by_name(name: &str) -> Option<&'static Resource> {
        INDEX.by_name.get(&normalize_name(name)).copied()
    }

    /// Whether the API accepts writes for this resource.
    pub fn is_writable(&self) -> bool {
        matches!(
            self.category,
            ResourceCategory::Setting
                | ResourceCategory::ProgramActive
                | ResourceCategory::ProgramSelected
                | ResourceCategory::ProgramActiveOption
        )
    }

    /// Temperature setpoints are written with an explicit `°C` unit.
    pub fn is_temperature_setpoint(&self) -> bool {
        *self == Self::FREEZER_TEMPERATURE_SETPOINT || *self == Self::FRIDGE_TEMPERATURE_SETPOINT
    }
}

/// Whether a wire key carries a measured temperature in eighths of a degree.
pub fn is_measured_temperature(key: &str) -> bool {
    MEASURED_TEMPERATURE_MARKERS
        .iter()
        .any(|marker| key.contains(marker))
}

static RESOURCES: &[Resource] = &[
    Resource::FREEZER_TEMPERATURE_SETPOINT,
    Resource::FRIDGE_TEMPERATURE_SETPOINT,
    Resource::FREEZER_SUPER_MODE,
    Resource::FRIDGE_SUPER_MODE,
    Resource::FRIDGE_ECO_MODE,
    Resource::FRIDGE_MEASURED_TEMPERATURE,
    Resource::FREEZER_MEASURED_TEMPERATURE,
    Resource::WASHER_ACTIVE_PROGRAM,
    Resource::WASHER_SELECTED_PROGRAM,
    Resource::WASHER_TIME_LEFT,
    Resource::WASHER_END_TIME,
    Resource::AMBIENT_LIGHT_ENABLED,
    Resource::AMBIENT_LIGHT_BRIGHTNESS,
    Resource::AMBIENT_LIGHT_COLOR,
    Resource::AMBIENT_LIGHT_CUSTOM_COLOR,
    Resource::FUNCTIONAL_LIGHT_ENABLED,
    Resource::FUNCTIONAL_LIGHT_BRIGHTNESS,
    Resource::OVEN_CAVITY_TEMPERATURE,
    Resource::POWER_STATE,
    Resource::DOOR_STATE,
    Resource::OPERATION_STATE,
    Resource::REMOTE_CONTROL_START_ALLOWED,
    Resource::REMOTE_CONTROL_ACTIVE,
    Resource::LOCAL_CONTROL_ACTIVE,
];

// ── Index ────────────────────────────────────────────────────────────

struct ResourceIndex {
    by_key: HashMap<String, &'static Resource>,
    by_name: HashMap<String, &'static Resource>,
}

static INDEX: LazyLock<ResourceIndex> = LazyLock::new(|| ResourceIndex {
    by_key: RESOURCES
        .iter()
        .map(|r| (r.key.to_ascii_lowercase(), r))
        .collect(),
    by_name: RESOURCES.iter().map(|r| (normalize_name(r.name), r)).collect(),
});

fn normalize_name(name: &str) -> String {
    name.trim().replace('-', "_").to_ascii_uppercase()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_key_ignores_case() {
        let found = Resource::by_key("refrigeration.common.setting.ecomode").unwrap();
        assert_eq!(found.name, "FRIDGE_ECO_MODE");
        assert_eq!(found.kind, ValueKind::Bool);
        assert!(Resource::by_key("BSH.Common.Option.Unknown").is_none());
    }

    #[test]
    fn lookup_by_name_accepts_dashes() {
        assert_eq!(
            Resource::by_name("fridge-temperature-setpoint"),
            Some(&Resource::FRIDGE_TEMPERATURE_SETPOINT)
        );
        assert_eq!(
            Resource::by_name("WASHER_TIME_LEFT"),
            Some(&Resource::WASHER_TIME_LEFT)
        );
        assert_eq!(
            Resource::by_name("ambient-light-custom-color"),
            Some(&Resource::AMBIENT_LIGHT_CUSTOM_COLOR)
        );
    }

    #[test]
    fn keys_and_names_are_unique() {
        assert_eq!(INDEX.by_key.len(), RESOURCES.len());
        assert_eq!(INDEX.by_name.len(), RESOURCES.len());
    }

    #[test]
    fn measured_temperature_markers() {
        assert!(is_measured_temperature(
            Resource::FRIDGE_MEASURED_TEMPERATURE.key
        ));
        assert!(!is_measured_temperature(
            Resource::FRIDGE_TEMPERATURE_SETPOINT.key
        ));
    }

    #[test]
    fn writability_follows_category() {
        assert!(Resource::FRIDGE_ECO_MODE.is_writable());
        assert!(!Resource::DOOR_STATE.is_writable());
        assert!(!Resource::OVEN_CAVITY_TEMPERATURE.is_writable());
        assert!(Resource::FUNCTIONAL_LIGHT_BRIGHTNESS.is_writable());
        assert!(Resource::FREEZER_TEMPERATURE_SETPOINT.is_temperature_setpoint());
    }

    #[test]
    fn category_parses_from_snake_case() {
        assert_eq!(
            "program_active_option".parse::<ResourceCategory>().unwrap(),
            ResourceCategory::ProgramActiveOption
        );
        assert_eq!(ValueKind::ByteArray.to_string(), "byte_array");
    }
}
