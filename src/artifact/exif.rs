/// EXIF summary for the gallery metadata index
///
/// Field names follow what the gallery front end reads from
/// `exif_data.json`. Missing tags are reported as `Unknown`; geocoding is
/// left to other tooling, so `Location` stays empty here.
use exif::{Exif, In, Rational, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExifSummary {
    pub camera_model: String,
    pub lens_model: String,
    pub exposure_time: String,
    pub f_number: String,
    #[serde(rename = "ISO")]
    pub iso: String,
    pub focal_length: String,
    pub orientation: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub date_time: String,
    pub location: Option<String>,
}

impl Default for ExifSummary {
    fn default() -> Self {
        Self {
            camera_model: UNKNOWN.to_string(),
            lens_model: UNKNOWN.to_string(),
            exposure_time: UNKNOWN.to_string(),
            f_number: UNKNOWN.to_string(),
            iso: UNKNOWN.to_string(),
            focal_length: UNKNOWN.to_string(),
            orientation: UNKNOWN.to_string(),
            latitude: None,
            longitude: None,
            date_time: UNKNOWN.to_string(),
            location: None,
        }
    }
}

impl ExifSummary {
    /// Read the summary of one source file. Files without readable EXIF get
    /// the all-unknown summary.
    pub fn read(path: &Path) -> Self {
        match read_exif(path) {
            Some(exif) => Self::from_exif(&exif),
            None => Self::default(),
        }
    }

    fn from_exif(exif: &Exif) -> Self {
        let text = |tag| ascii(exif, tag).unwrap_or_else(|| UNKNOWN.to_string());
        let decimal = |tag| {
            first_rational(exif, tag)
                .map(format_decimal)
                .unwrap_or_else(|| UNKNOWN.to_string())
        };

        Self {
            camera_model: text(Tag::Model),
            lens_model: text(Tag::LensModel),
            exposure_time: exif
                .get_field(Tag::ExposureTime, In::PRIMARY)
                .map(|f| f.display_value().to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            f_number: decimal(Tag::FNumber),
            iso: exif
                .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
                .and_then(|f| f.value.get_uint(0))
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            focal_length: decimal(Tag::FocalLength),
            orientation: exif
                .get_field(Tag::Orientation, In::PRIMARY)
                .and_then(|f| f.value.get_uint(0))
                .map(|v| v.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
            longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
            date_time: ascii(exif, Tag::DateTimeOriginal)
                .or_else(|| ascii(exif, Tag::DateTime))
                .unwrap_or_else(|| UNKNOWN.to_string()),
            location: None,
        }
    }
}

/// EXIF orientation value (1-8) of a file, if it has one
pub fn read_orientation(path: &Path) -> Option<u8> {
    read_exif(path)?
        .get_field(Tag::Orientation, In::PRIMARY)?
        .value
        .get_uint(0)
        .and_then(|v| u8::try_from(v).ok())
}

fn read_exif(path: &Path) -> Option<Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    Reader::new().read_from_container(&mut reader).ok()
}

fn ascii(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn first_rational(exif: &Exif, tag: Tag) -> Option<f64> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) => values.first().and_then(ratio),
        _ => None,
    }
}

fn coordinate(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let dms = match &exif.get_field(value_tag, In::PRIMARY)?.value {
        Value::Rational(values) => values.clone(),
        _ => return None,
    };
    let reference = ascii(exif, ref_tag).unwrap_or_default();
    dms_to_degrees(&dms, &reference)
}

fn ratio(r: &Rational) -> Option<f64> {
    (r.denom != 0).then(|| r.num as f64 / r.denom as f64)
}

/// Degrees/minutes/seconds to signed decimal degrees
pub(crate) fn dms_to_degrees(dms: &[Rational], reference: &str) -> Option<f64> {
    let [d, m, s] = dms else {
        return None;
    };
    let degrees = ratio(d)? + ratio(m)? / 60.0 + ratio(s)? / 3600.0;
    match reference {
        "S" | "W" => Some(-degrees),
        _ => Some(degrees),
    }
}

fn format_decimal(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn r(num: u32, denom: u32) -> Rational {
        Rational { num, denom }
    }

    #[test]
    fn test_dms_to_degrees() {
        let dms = [r(31, 1), r(14, 1), r(2400, 100)];
        let north = dms_to_degrees(&dms, "N").unwrap();
        assert!((north - 31.24).abs() < 1e-9);
        assert!((dms_to_degrees(&dms, "S").unwrap() + 31.24).abs() < 1e-9);
    }

    #[test]
    fn test_dms_rejects_bad_values() {
        assert_eq!(dms_to_degrees(&[r(1, 1), r(2, 1)], "N"), None);
        assert_eq!(dms_to_degrees(&[r(1, 0), r(2, 1), r(3, 1)], "N"), None);
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(2.8), "2.8");
        assert_eq!(format_decimal(35.0), "35.0");
        assert_eq!(format_decimal(1.0 / 3.0), "0.33");
    }

    #[test]
    fn test_file_without_exif_is_unknown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.png");
        RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])).save(&path).unwrap();

        let summary = ExifSummary::read(&path);
        assert_eq!(summary, ExifSummary::default());
        assert_eq!(read_orientation(&path), None);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["CameraModel"], "Unknown");
        assert_eq!(json["FNumber"], "Unknown");
        assert!(json["ISO"].is_string());
        assert!(json["Latitude"].is_null());
    }
}
