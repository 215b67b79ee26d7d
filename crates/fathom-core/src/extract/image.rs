//! Image extraction: OCR plus EXIF enrichment.
//!
//! OCR goes through the platform `tesseract` binary, the same way git
//! enrichment goes through the `git` binary; machines without an OCR engine
//! degrade to EXIF-only extraction. EXIF yields the camera, lens, and
//! numeric capture settings, a human expansion of the capture timestamp
//! ("2024-07-15, Monday, summer morning"), and -- when GPS coordinates are
//! present -- an offline reverse-geocoded "city, region, country" line.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDateTime, Timelike};
use exif::{In, Tag, Value};
use reverse_geocoder::ReverseGeocoder;

use crate::types::{ChunkKind, ExtractedBody, ExtractorKind, Language, MetadataBlock};

use super::Extraction;

/// Extract OCR text and EXIF metadata from an image.
pub fn extract(path: &Path) -> Extraction {
    let ocr_text = run_ocr(path);
    let exif_text = read_exif(path);

    if ocr_text.is_none() && exif_text.is_none() {
        return Extraction::Skipped {
            path: path.to_path_buf(),
            reason: "no text recognized and no EXIF metadata".into(),
        };
    }

    let mut metadata_blocks = Vec::new();
    if let Some(text) = ocr_text {
        metadata_blocks.push(MetadataBlock {
            kind: ChunkKind::Ocr,
            text,
        });
    }
    if let Some(text) = exif_text {
        metadata_blocks.push(MetadataBlock {
            kind: ChunkKind::Ocr,
            text,
        });
    }

    Extraction::Body(ExtractedBody {
        text: String::new(),
        language: Language::Plain,
        extractor: ExtractorKind::ImageOcr,
        metadata_blocks,
    })
}

/// Run the platform OCR engine. `None` when the engine is missing or
/// recognizes nothing.
fn run_ocr(path: &Path) -> Option<String> {
    let output = std::process::Command::new("tesseract")
        .arg(path)
        .arg("stdout")
        .output();

    let output = match output {
        Ok(o) => o,
        Err(e) => {
            tracing::debug!(error = %e, "tesseract unavailable, skipping OCR");
            return None;
        }
    };

    if !output.status.success() {
        tracing::debug!(path = %path.display(), "tesseract failed on image");
        return None;
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read EXIF metadata into a small text block. `None` when the file carries
/// no EXIF segment.
fn read_exif(path: &Path) -> Option<String> {
    let file = std::fs::File::open(path).ok()?;
    let mut reader = std::io::BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let mut lines = Vec::new();

    for (label, tag) in [
        ("Camera", Tag::Model),
        ("Make", Tag::Make),
        ("Lens", Tag::LensModel),
        ("Aperture", Tag::FNumber),
        ("Exposure", Tag::ExposureTime),
        ("ISO", Tag::PhotographicSensitivity),
        ("Focal length", Tag::FocalLength),
    ] {
        if let Some(field) = exif.get_field(tag, In::PRIMARY) {
            let value = field.display_value().with_unit(&exif).to_string();
            let value = value.trim_matches('"').trim().to_string();
            if !value.is_empty() {
                lines.push(format!("{label}: {value}"));
            }
        }
    }

    if let Some(ts) = exif_timestamp(&exif) {
        lines.push(format!("Taken: {}", humanize_timestamp(&ts)));
    }

    if let Some((lat, lon)) = gps_coordinates(&exif) {
        lines.push(format!("Location: {}", reverse_geocode(lat, lon)));
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Raw `DateTimeOriginal` (falling back to `DateTime`) as stored on disk.
fn exif_timestamp(exif: &exif::Exif) -> Option<String> {
    let field = exif
        .get_field(Tag::DateTimeOriginal, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::DateTime, In::PRIMARY))?;
    if let Value::Ascii(ref vec) = field.value {
        let raw = vec.first()?;
        return Some(String::from_utf8_lossy(raw).trim().to_string());
    }
    None
}

/// Expand an EXIF timestamp ("2024:07:15 10:30:00") into prose:
/// "2024-07-15, Monday, summer morning". Falls back to the raw string
/// when the timestamp doesn't parse.
fn humanize_timestamp(raw: &str) -> String {
    let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S") else {
        return raw.to_string();
    };

    let season = match dt.month() {
        12 | 1 | 2 => "winter",
        3..=5 => "spring",
        6..=8 => "summer",
        _ => "autumn",
    };
    let time_of_day = match dt.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=21 => "evening",
        _ => "night",
    };

    format!(
        "{}, {}, {season} {time_of_day}",
        dt.format("%Y-%m-%d"),
        dt.format("%A"),
    )
}

/// Decode the GPS rational triples into signed decimal degrees.
fn gps_coordinates(exif: &exif::Exif) -> Option<(f64, f64)> {
    let lat = dms_to_decimal(exif, Tag::GPSLatitude)?;
    let lon = dms_to_decimal(exif, Tag::GPSLongitude)?;

    let lat_sign = ref_sign(exif, Tag::GPSLatitudeRef, 'S');
    let lon_sign = ref_sign(exif, Tag::GPSLongitudeRef, 'W');

    Some((lat * lat_sign, lon * lon_sign))
}

fn dms_to_decimal(exif: &exif::Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    if let Value::Rational(ref parts) = field.value {
        if parts.len() >= 3 {
            let d = parts[0].to_f64();
            let m = parts[1].to_f64();
            let s = parts[2].to_f64();
            return Some(d + m / 60.0 + s / 3600.0);
        }
    }
    None
}

fn ref_sign(exif: &exif::Exif, tag: Tag, negative: char) -> f64 {
    let Some(field) = exif.get_field(tag, In::PRIMARY) else {
        return 1.0;
    };
    if let Value::Ascii(ref vec) = field.value {
        if let Some(raw) = vec.first() {
            if raw.first().copied() == Some(negative as u8) {
                return -1.0;
            }
        }
    }
    1.0
}

/// Shared geocoder instance; the embedded dataset loads once per process.
fn geocoder() -> &'static ReverseGeocoder {
    static GEOCODER: OnceLock<ReverseGeocoder> = OnceLock::new();
    GEOCODER.get_or_init(ReverseGeocoder::new)
}

/// Offline reverse geocode to "city, region, country".
fn reverse_geocode(lat: f64, lon: f64) -> String {
    let result = geocoder().search((lat, lon));
    let record = &result.record;
    format!("{}, {}, {}", record.name, record.admin1, record.cc)
}
