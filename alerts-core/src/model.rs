use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Local wall-clock layout used by the provider for hourly samples.
const HOUR_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Opaque, stable identifier of a message recipient (a chat id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecipientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecipientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for RecipientId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Forecast payload as returned by the provider's forecast endpoint.
///
/// Every field is optional on the wire; missing data renders as empty rather
/// than failing the whole report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastData {
    pub location: Option<PlaceInfo>,
    pub current: Current,
    pub forecast: Forecast,
}

impl ForecastData {
    /// The first forecast day, which is "today" for the queried location.
    pub fn today(&self) -> Option<&ForecastDay> {
        self.forecast.forecastday.first()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceInfo {
    pub name: String,
    pub country: String,
    pub tz_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Condition {
    pub text: String,
}

/// Current-conditions block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Current {
    pub temp_c: Option<f64>,
    pub feelslike_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_kph: Option<f64>,
    pub wind_dir: Option<String>,
    pub uv: Option<f64>,
    pub vis_km: Option<f64>,
    pub condition: Option<Condition>,
    pub air_quality: Option<AirQuality>,
}

impl Current {
    /// US EPA air-quality index (1..=6). Absent data reads as 0.
    pub fn aqi_index(&self) -> u8 {
        self.air_quality
            .as_ref()
            .and_then(|aq| aq.us_epa_index)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AirQuality {
    #[serde(rename = "us-epa-index")]
    pub us_epa_index: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Forecast {
    pub forecastday: Vec<ForecastDay>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastDay {
    pub date: Option<String>,
    pub day: DayAggregate,
    pub astro: Option<Astro>,
    pub hour: Vec<HourSample>,
}

/// Daily aggregates for one forecast or history day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DayAggregate {
    pub maxtemp_c: Option<f64>,
    pub mintemp_c: Option<f64>,
    pub avgtemp_c: Option<f64>,
    pub totalprecip_mm: Option<f64>,
    #[serde(deserialize_with = "de_flag")]
    pub daily_will_it_rain: bool,
    pub daily_chance_of_rain: Option<f64>,
    pub condition: Option<Condition>,
}

impl DayAggregate {
    pub fn chance_of_rain(&self) -> f64 {
        self.daily_chance_of_rain.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Astro {
    pub sunrise: Option<String>,
    pub sunset: Option<String>,
}

/// One hourly sample of a forecast day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HourSample {
    pub time_epoch: i64,
    /// Local wall-clock time at the location, e.g. `2024-05-01 08:00`.
    pub time: Option<String>,
    #[serde(deserialize_with = "de_flag")]
    pub will_it_rain: bool,
}

impl HourSample {
    pub fn new(local_time: NaiveDateTime, will_it_rain: bool) -> Self {
        Self {
            time_epoch: local_time.and_utc().timestamp(),
            time: Some(local_time.format(HOUR_TIME_FORMAT).to_string()),
            will_it_rain,
        }
    }

    /// Wall-clock time of the sample at the forecast location. Falls back to
    /// the epoch timestamp read as UTC when the local string is absent.
    pub fn local_time(&self) -> Option<NaiveDateTime> {
        self.time
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, HOUR_TIME_FORMAT).ok())
            .or_else(|| DateTime::from_timestamp(self.time_epoch, 0).map(|dt| dt.naive_utc()))
    }
}

/// Aggregated weather for one past day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub location_name: Option<String>,
    pub day: DayAggregate,
}

/// Accepts `true`/`false`, `0`/`1` or null for rain flags; the provider sends integers.
fn de_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(n)) => n != 0,
        Some(Flag::Float(f)) => f != 0.0,
        None => false,
    })
}
