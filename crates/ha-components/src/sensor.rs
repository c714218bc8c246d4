//! Sensor entity model
//!
//! Device and state classes shared by sensor entities, and the conversion
//! of a sensor's native value to the state string written to the store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use ha_core::{MAX_STATE_LENGTH, STATE_UNKNOWN};

/// Entity domain of sensors
pub const DOMAIN: &str = "sensor";

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $value:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant,)+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    _ => Err(UnknownVariant(s.to_string())),
                }
            }
        }
    };
}

/// A string did not name a known device or state class
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0}")]
pub struct UnknownVariant(pub String);

string_enum! {
    /// What a sensor measures
    pub enum SensorDeviceClass {
        Date => "date",
        Enum => "enum",
        Timestamp => "timestamp",
        ApparentPower => "apparent_power",
        Aqi => "aqi",
        AtmosphericPressure => "atmospheric_pressure",
        Battery => "battery",
        CarbonMonoxide => "carbon_monoxide",
        CarbonDioxide => "carbon_dioxide",
        Conductivity => "conductivity",
        Current => "current",
        DataRate => "data_rate",
        DataSize => "data_size",
        Distance => "distance",
        Duration => "duration",
        Energy => "energy",
        EnergyStorage => "energy_storage",
        Frequency => "frequency",
        Gas => "gas",
        Humidity => "humidity",
        Illuminance => "illuminance",
        Irradiance => "irradiance",
        Moisture => "moisture",
        Monetary => "monetary",
        NitrogenDioxide => "nitrogen_dioxide",
        NitrogenMonoxide => "nitrogen_monoxide",
        NitrousOxide => "nitrous_oxide",
        Ozone => "ozone",
        Ph => "ph",
        Pm1 => "pm1",
        Pm10 => "pm10",
        Pm25 => "pm25",
        PowerFactor => "power_factor",
        Power => "power",
        Precipitation => "precipitation",
        PrecipitationIntensity => "precipitation_intensity",
        Pressure => "pressure",
        ReactivePower => "reactive_power",
        SignalStrength => "signal_strength",
        SoundPressure => "sound_pressure",
        Speed => "speed",
        SulphurDioxide => "sulphur_dioxide",
        Temperature => "temperature",
        VolatileOrganicCompounds => "volatile_organic_compounds",
        VolatileOrganicCompoundsParts => "volatile_organic_compounds_parts",
        Voltage => "voltage",
        Volume => "volume",
        VolumeStorage => "volume_storage",
        VolumeFlowRate => "volume_flow_rate",
        Water => "water",
        Weight => "weight",
        WindSpeed => "wind_speed",
    }
}

string_enum! {
    /// How a sensor's value evolves over time
    pub enum SensorStateClass {
        Measurement => "measurement",
        Total => "total",
        TotalIncreasing => "total_increasing",
    }
}

/// Units offered by default for a sensor's unit of measurement
pub const TEMPERATURE_UNITS: [&str; 2] = ["°C", "°F"];

/// Render a native value as a state string
///
/// Returns `None` when the text exceeds the maximum state length.
pub fn native_value_to_state(value: &Value) -> Option<String> {
    let state = match value {
        Value::Null => STATE_UNKNOWN.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    };

    (state.chars().count() <= MAX_STATE_LENGTH).then_some(state)
}
