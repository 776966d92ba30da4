//! Turning forecast data into the text sent to recipients.
//!
//! Everything here is a pure function of its inputs: the same location and
//! forecast always produce the same report.

use chrono::NaiveDate;

use crate::model::{Current, DayAggregate, DayRecord, ForecastData, HourSample};

pub const NO_RAIN: &str = "No rain expected today.";
pub const DEFAULT_SUGGESTION: &str = "Enjoy your day!";

pub const UMBRELLA_ADVICE: &str =
    "Light drizzle or rain is possible, consider carrying an umbrella.";
pub const GOOD_AIR_NOTE: &str = "Air quality is good, a great day for outdoor activities.";
pub const POOR_AIR_CAUTION: &str =
    "Air quality is poor, it may be wise to limit strenuous outdoor activities.";
pub const HIGH_UV_WARNING: &str =
    "UV index is high, use sunscreen and wear protective clothing if outdoors.";
pub const MODERATE_UV_NOTE: &str =
    "UV index is moderate, use sunscreen if staying outdoors for extended periods.";

/// Chance of rain (percent) above which the umbrella advice is given.
const UMBRELLA_CHANCE_THRESHOLD: f64 = 40.0;

const RAIN_TIME_FORMAT: &str = "%I:%M %p";

/// Summarise the rain periods of a day of hourly samples.
///
/// A period starts at the first sample flagged as rain and ends at the first
/// following sample that is not; a period still open after the last sample
/// runs "onwards".
pub fn rain_summary(hours: &[HourSample]) -> String {
    let mut periods = Vec::new();
    let mut start: Option<String> = None;

    for hour in hours {
        let at = hour
            .local_time()
            .map(|t| t.format(RAIN_TIME_FORMAT).to_string())
            .unwrap_or_default();

        match (hour.will_it_rain, start.take()) {
            (true, None) => start = Some(at),
            (true, Some(open)) => start = Some(open),
            (false, Some(open)) => periods.push(format!("from {open} to {at}")),
            (false, None) => {}
        }
    }

    if let Some(open) = start {
        periods.push(format!("from {open} onwards"));
    }

    if periods.is_empty() {
        NO_RAIN.to_string()
    } else {
        format!("Rain expected {}.", periods.join(", "))
    }
}

/// Advice for the day, in fixed order: rain, air quality, UV.
///
/// Air quality only counts as good for a known index of 1 or 2; a missing
/// reading (index 0) gets the cautionary note, matching the "Unknown" label
/// of [`air_quality_label`].
pub fn suggestions(current: &Current, day: &DayAggregate) -> Vec<&'static str> {
    let mut out = Vec::new();

    if day.daily_will_it_rain || day.chance_of_rain() > UMBRELLA_CHANCE_THRESHOLD {
        out.push(UMBRELLA_ADVICE);
    }

    match current.aqi_index() {
        1 | 2 => out.push(GOOD_AIR_NOTE),
        _ => out.push(POOR_AIR_CAUTION),
    }

    let uv = current.uv.unwrap_or(0.0);
    if uv > 5.0 {
        out.push(HIGH_UV_WARNING);
    } else if uv > 2.0 {
        out.push(MODERATE_UV_NOTE);
    }

    if out.is_empty() {
        out.push(DEFAULT_SUGGESTION);
    }
    out
}

/// Six-level label of the US EPA index.
pub fn air_quality_label(index: u8) -> &'static str {
    match index {
        1 => "Good",
        2 => "Moderate",
        3 => "Unhealthy for Sensitive Groups",
        4 => "Unhealthy",
        5 => "Very Unhealthy",
        6 => "Hazardous",
        _ => "Unknown",
    }
}

/// Full report for one location.
pub fn format_report(location: &str, data: &ForecastData) -> String {
    let current = &data.current;
    let today = data.today();
    let day = today.map(|d| d.day.clone()).unwrap_or_default();
    let hours = today.map(|d| d.hour.as_slice()).unwrap_or_default();

    let condition = current.condition.as_ref().map(|c| c.text.as_str()).unwrap_or_default();
    let aqi = current.aqi_index();

    let bullets = suggestions(current, &day)
        .into_iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "*Weather Update for {location}*\n\
         _{condition}_\n\n\
         *Temperature*: {}°C (Feels like: {}°C)\n\
         *Humidity*: {}% | *Wind*: {} km/h {}\n\
         *UV Index*: {} | *Visibility*: {} km\n\n\
         *Rain Forecast*\n{}\n\n\
         *Air & Light*\n\
         *Air Quality*: {aqi} - {}\n\n\
         *Suggestions for the Day*\n{bullets}",
        num(current.temp_c),
        num(current.feelslike_c),
        num(current.humidity),
        num(current.wind_kph),
        current.wind_dir.as_deref().unwrap_or_default(),
        num(current.uv),
        num(current.vis_km),
        rain_summary(hours),
        air_quality_label(aqi),
    )
}

/// Summary of one past day.
pub fn format_history(location: &str, date: NaiveDate, record: &DayRecord) -> String {
    let day = &record.day;
    let condition = day.condition.as_ref().map(|c| c.text.as_str()).unwrap_or_default();

    format!(
        "*Historical Weather for {location} on {}*\n\
         - *Condition*: {condition}\n\
         - *Max Temp*: {}°C\n\
         - *Min Temp*: {}°C\n\
         - *Avg Temp*: {}°C\n\
         - *Total Precip*: {} mm",
        date.format("%Y-%m-%d"),
        num(day.maxtemp_c),
        num(day.mintemp_c),
        num(day.avgtemp_c),
        num(day.totalprecip_mm),
    )
}

fn num(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
