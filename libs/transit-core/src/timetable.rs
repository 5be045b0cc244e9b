//! Station timetables.
//!
//! File format (`tt-<station>`):
//!
//! ```text
//! Cottesloe-Stn,115.75,-31.99
//! # departure,route,stop,arrival,destination
//! 08:05,busA,stopA,08:21,Warwick-Stn
//! 08:45,trainB,platform2,09:02,Claremont-Stn
//! ```
//!
//! The first line describes the station itself and is ignored.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::TimetableError;

/// Minutes after midnight.
pub type Minutes = i64;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Parse `HH:MM` into minutes after midnight.
pub fn parse_clock(s: &str) -> Result<Minutes, TimetableError> {
    let bad = || TimetableError::Clock(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(bad)?;
    let h: Minutes = h.parse().map_err(|_| bad())?;
    let m: Minutes = m.parse().map_err(|_| bad())?;
    if !(0..24).contains(&h) || !(0..60).contains(&m) {
        return Err(bad());
    }
    Ok(h * 60 + m)
}

/// Render minutes after midnight as `H:MM`.
pub fn format_clock(minutes: Minutes) -> String {
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

/// Current time of day from the system clock, shifted by `utc_offset`.
pub fn minutes_now(utc_offset: Minutes) -> Minutes {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    (secs / 60 + utc_offset).rem_euclid(MINUTES_PER_DAY)
}

/// Source of the current time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    System { utc_offset: Minutes },
    /// Pinned time, for simulations and tests.
    Fixed(Minutes),
}

impl Clock {
    pub fn now(&self) -> Minutes {
        match *self {
            Clock::System { utc_offset } => minutes_now(utc_offset),
            Clock::Fixed(minutes) => minutes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journey {
    pub departure: Minutes,
    pub route: String,
    pub stop: String,
    pub arrival: Minutes,
    pub destination: String,
}

impl Journey {
    fn parse(line: &str, line_no: usize) -> Result<Self, TimetableError> {
        let parse_err = |detail: String| TimetableError::Parse { line: line_no, detail };
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [departure, route, stop, arrival, destination] = fields.as_slice() else {
            return Err(parse_err(format!("expected 5 fields, got {}", fields.len())));
        };
        if destination.is_empty() {
            return Err(parse_err("empty destination".into()));
        }
        Ok(Self {
            departure: parse_clock(departure).map_err(|e| parse_err(e.to_string()))?,
            route: route.to_string(),
            stop: stop.to_string(),
            arrival: parse_clock(arrival).map_err(|e| parse_err(e.to_string()))?,
            destination: destination.to_string(),
        })
    }
}

impl std::fmt::Display for Journey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} from {} at {}, arriving {} at {}",
            self.route,
            self.stop,
            format_clock(self.departure),
            self.destination,
            format_clock(self.arrival)
        )
    }
}

/// Journeys leaving a station, grouped by destination and sorted by
/// departure time.
#[derive(Debug, Clone, Default)]
pub struct Timetable {
    journeys: HashMap<String, Vec<Journey>>,
}

impl Timetable {
    pub fn parse(text: &str) -> Result<Self, TimetableError> {
        let mut journeys: HashMap<String, Vec<Journey>> = HashMap::new();
        for (idx, line) in text.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let journey = Journey::parse(line, idx + 1)?;
            journeys.entry(journey.destination.clone()).or_default().push(journey);
        }
        for list in journeys.values_mut() {
            list.sort_by_key(|j| j.departure);
        }
        Ok(Self { journeys })
    }

    pub fn load(path: &Path) -> Result<Self, TimetableError> {
        let content = std::fs::read_to_string(path).map_err(|source| TimetableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// First journey to `destination` leaving strictly after `after`.
    pub fn next_departure(&self, destination: &str, after: Minutes) -> Option<&Journey> {
        self.journeys
            .get(destination)?
            .iter()
            .find(|j| j.departure > after)
    }

    pub fn arrival_time(&self, destination: &str, after: Minutes) -> Option<Minutes> {
        self.next_departure(destination, after).map(|j| j.arrival)
    }

    pub fn itinerary(&self, destination: &str, after: Minutes) -> Option<String> {
        self.next_departure(destination, after).map(Journey::to_string)
    }

    pub fn len(&self) -> usize {
        self.journeys.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.journeys.is_empty()
    }
}

/// A timetable file that is reloaded whenever it changes on disk.
#[derive(Debug)]
pub struct TimetableFile {
    path: PathBuf,
    modified: Option<SystemTime>,
    timetable: Timetable,
}

impl TimetableFile {
    /// Path of the timetable for `station` inside `dir`.
    pub fn path_for(dir: &Path, station: &str) -> PathBuf {
        dir.join(format!("tt-{station}"))
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, TimetableError> {
        let mut file = Self {
            path: path.into(),
            modified: None,
            timetable: Timetable::default(),
        };
        file.refresh()?;
        Ok(file)
    }

    /// Reload the timetable if the file changed since the last load.
    /// Returns `true` when a reload happened.
    pub fn refresh(&mut self) -> Result<bool, TimetableError> {
        let io_err = |source| TimetableError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(io_err)?;
        if self.modified.is_some_and(|seen| modified <= seen) {
            return Ok(false);
        }
        self.timetable = Timetable::load(&self.path)?;
        self.modified = Some(modified);
        tracing::info!(
            path = %self.path.display(),
            journeys = self.timetable.len(),
            "timetable loaded"
        );
        Ok(true)
    }

    pub fn timetable(&self) -> &Timetable {
        &self.timetable
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
