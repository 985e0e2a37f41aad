use std::fmt::Write;

use chrono::NaiveDate;
use weather_core::{Daily, Location, WeatherSnapshot};

/// Full weather screen as text.
pub fn snapshot(city: Option<&Location>, snapshot: &WeatherSnapshot, today: NaiveDate) -> String {
    let mut out = String::new();

    match city {
        Some(city) => {
            let _ = writeln!(out, "{} ({})", city.display_name(), city.id);
        }
        None => {
            let _ = writeln!(out, "No city selected");
        }
    }

    match snapshot {
        WeatherSnapshot::Loading => out.push_str("  Loading...\n"),
        WeatherSnapshot::Empty => out.push_str("  No weather data yet\n"),
        WeatherSnapshot::Error(message) => {
            let _ = writeln!(out, "  {message}");
        }
        WeatherSnapshot::Success {
            current,
            daily,
            air_quality,
            indices,
        } => {
            let _ = writeln!(
                out,
                "  {}  {}°C  feels like {}°C",
                current.text, current.temp, current.feels_like
            );
            let _ = writeln!(
                out,
                "  Humidity {}%  Wind {} {}  Pressure {} hPa  Visibility {} km",
                current.humidity,
                current.wind_dir,
                current.wind_scale,
                current.pressure,
                current.vis
            );

            if let Some(air) = air_quality {
                let _ = writeln!(
                    out,
                    "  Air quality {} {} (PM2.5 {}, PM10 {})",
                    air.aqi, air.category, air.pm2p5, air.pm10
                );
            }

            if !daily.is_empty() {
                out.push_str("\n  Forecast\n");
                for day in daily {
                    let _ = write!(
                        out,
                        "  {:<10} {:<6} {:>3}°C ~ {:>3}°C",
                        day_label(day, today),
                        day.text_day,
                        day.temp_min,
                        day.temp_max
                    );
                    if let Some(sunrise) = &day.sunrise {
                        let _ = write!(out, "  sunrise {sunrise}");
                    }
                    if let Some(sunset) = &day.sunset {
                        let _ = write!(out, "  sunset {sunset}");
                    }
                    out.push('\n');
                }
            }

            if let Some(indices) = indices.as_ref().filter(|i| !i.is_empty()) {
                out.push_str("\n  Indices\n");
                for index in indices {
                    let _ = writeln!(
                        out,
                        "  {}: {} (level {})",
                        index.name, index.category, index.level
                    );
                    if !index.text.is_empty() {
                        let _ = writeln!(out, "    {}", index.text);
                    }
                }
            }
        }
    }

    out
}

/// "Today", "Tomorrow", or weekday plus month-day. Falls back to the raw
/// date string when it doesn't parse.
pub fn day_label(day: &Daily, today: NaiveDate) -> String {
    match day.date() {
        Some(date) if date == today => "Today".to_string(),
        Some(date) if today.succ_opt() == Some(date) => "Tomorrow".to_string(),
        Some(date) => date.format("%a %m-%d").to_string(),
        None => day.fx_date.clone(),
    }
}

/// Favorites list, marking the current city with `*`.
pub fn favorites(list: &[Location], current: Option<&Location>) -> String {
    if list.is_empty() {
        return "No favorite cities yet\n".to_string();
    }

    let mut out = String::new();
    for city in list {
        let marker = if current.is_some_and(|c| c.same_city(city)) {
            '*'
        } else {
            ' '
        };
        let _ = writeln!(out, "{marker} {:<12} {}", city.id, city.display_name());
    }
    out
}
