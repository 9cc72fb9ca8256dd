//! Surveyed bed profile across the channel.

use crate::SectionError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Bed elevation as a function of distance along the section.
///
/// Distances are strictly increasing; elevations between samples are
/// linearly interpolated and nothing is extrapolated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BathymetryRecord", into = "BathymetryRecord")]
pub struct Bathymetry {
    distance: Vec<f64>,
    elevation: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct BathymetryRecord {
    distance: Vec<f64>,
    elevation: Vec<f64>,
}

impl TryFrom<BathymetryRecord> for Bathymetry {
    type Error = SectionError;

    fn try_from(r: BathymetryRecord) -> Result<Self, Self::Error> {
        Self::new(r.distance, r.elevation)
    }
}

impl From<Bathymetry> for BathymetryRecord {
    fn from(b: Bathymetry) -> Self {
        Self {
            distance: b.distance,
            elevation: b.elevation,
        }
    }
}

impl Bathymetry {
    pub fn new(distance: Vec<f64>, elevation: Vec<f64>) -> Result<Self, SectionError> {
        if distance.len() != elevation.len() {
            return Err(SectionError::InvalidBathymetry(format!(
                "{} distances but {} elevations",
                distance.len(),
                elevation.len()
            )));
        }
        if distance.len() < 2 {
            return Err(SectionError::InvalidBathymetry(
                "need at least two surveyed points".into(),
            ));
        }
        if distance.iter().chain(&elevation).any(|v| !v.is_finite()) {
            return Err(SectionError::InvalidBathymetry(
                "non-finite distance or elevation".into(),
            ));
        }
        if let Some(w) = distance.windows(2).find(|w| w[1] <= w[0]) {
            return Err(SectionError::InvalidBathymetry(format!(
                "distances must increase strictly ({} then {})",
                w[0], w[1]
            )));
        }
        Ok(Self {
            distance,
            elevation,
        })
    }

    /// Parse `distance,elevation` rows. A first row that does not parse as
    /// numbers is taken as a header; blank and `#` lines are ignored and
    /// extra columns are dropped. The separator (comma, semicolon or tab) is
    /// taken from the first line; quoted fields may contain it.
    pub fn from_csv_str(text: &str) -> Result<Self, SectionError> {
        let first = text.lines().find(|l| is_content(l)).unwrap_or_default();
        let rdr = csv_reader(sniff_delimiter(first)).from_reader(text.as_bytes());
        Self::from_records(rdr)
    }

    pub fn load_csv(path: impl AsRef<Path>) -> Result<Self, SectionError> {
        let path = path.as_ref();
        let mut first = String::new();
        let mut lines = BufReader::new(File::open(path)?);
        while lines.read_line(&mut first)? > 0 && !is_content(&first) {
            first.clear();
        }
        let delimiter = sniff_delimiter(&first);
        log::debug!(
            "reading bathymetry {} with delimiter {:?}",
            path.display(),
            delimiter as char
        );
        Self::from_records(csv_reader(delimiter).from_path(path)?)
    }

    fn from_records<R: Read>(mut rdr: csv::Reader<R>) -> Result<Self, SectionError> {
        let mut distance = Vec::new();
        let mut elevation = Vec::new();
        let mut first = true;
        for record in rdr.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            let parsed = match (record.get(0), record.get(1)) {
                (Some(d), Some(e)) => d.parse::<f64>().ok().zip(e.parse::<f64>().ok()),
                _ => None,
            };
            match parsed {
                Some((d, e)) => {
                    distance.push(d);
                    elevation.push(e);
                }
                None if first => log::debug!("bathymetry header: {record:?}"),
                None => {
                    let line = record.position().map_or(0, |p| p.line());
                    let fields: Vec<_> = record.iter().collect();
                    return Err(SectionError::InvalidBathymetry(format!(
                        "line {line}: expected `distance,elevation`, got {fields:?}"
                    )));
                }
            }
            first = false;
        }
        Self::new(distance, elevation)
    }

    pub fn len(&self) -> usize {
        self.distance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }

    pub fn distance(&self) -> &[f64] {
        &self.distance
    }

    pub fn elevation(&self) -> &[f64] {
        &self.elevation
    }

    /// Surveyed distance range `(first, last)`.
    pub fn span(&self) -> (f64, f64) {
        (self.distance[0], self.distance[self.distance.len() - 1])
    }

    /// `(lowest, highest)` bed elevation.
    pub fn elevation_range(&self) -> (f64, f64) {
        self.elevation
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &e| {
                (lo.min(e), hi.max(e))
            })
    }

    /// Interpolated bed elevation; `None` outside the surveyed range.
    pub fn elevation_at(&self, d: f64) -> Option<f64> {
        let (first, last) = self.span();
        if !(first..=last).contains(&d) {
            return None;
        }
        let k = self.distance.partition_point(|&x| x <= d);
        if k >= self.distance.len() {
            return self.elevation.last().copied();
        }
        let (d0, d1) = (self.distance[k - 1], self.distance[k]);
        let (e0, e1) = (self.elevation[k - 1], self.elevation[k]);
        Some(e0 + (d - d0) / (d1 - d0) * (e1 - e0))
    }

    /// Wetted area and top width at `level`, integrated exactly over the
    /// piecewise-linear profile.
    pub fn wetted_area(&self, level: f64) -> (f64, f64) {
        let mut area = 0.0;
        let mut width = 0.0;
        for k in 1..self.distance.len() {
            let (d0, d1) = (self.distance[k - 1], self.distance[k]);
            let (h0, h1) = (level - self.elevation[k - 1], level - self.elevation[k]);
            let dx = d1 - d0;
            match (h0 > 0.0, h1 > 0.0) {
                (true, true) => {
                    area += 0.5 * (h0 + h1) * dx;
                    width += dx;
                }
                (true, false) | (false, true) => {
                    let (wet, dry) = if h0 > 0.0 { (h0, h1) } else { (h1, h0) };
                    let frac = wet / (wet - dry);
                    area += 0.5 * wet * frac * dx;
                    width += frac * dx;
                }
                (false, false) => {}
            }
        }
        (area, width)
    }
}

fn is_content(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.starts_with('#')
}

/// Most frequent of comma, semicolon and tab outside quotes; comma on ties.
fn sniff_delimiter(line: &str) -> u8 {
    let mut counts = [(b',', 0usize), (b';', 0), (b'\t', 0)];
    let mut quoted = false;
    for b in line.bytes() {
        if b == b'"' {
            quoted = !quoted;
        } else if !quoted {
            if let Some(c) = counts.iter_mut().find(|(d, _)| *d == b) {
                c.1 += 1;
            }
        }
    }
    counts
        .iter()
        .fold((b',', 0), |best, &c| if c.1 > best.1 { c } else { best })
        .0
}

fn csv_reader(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .delimiter(delimiter);
    builder
}
