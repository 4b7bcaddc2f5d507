//! CSV export of sweep results.
//!
//! UTF-8, `;` delimited. The base header is `f_Hz;Us_V;Us_Ue;Gain_dB`;
//! when the oscilloscope path produced input amplitudes and phases the
//! `Ue_V` and `Phase_deg` columns are appended.

use crate::error::Result;
use crate::sweep::BodePoint;
use csv::WriterBuilder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write the points to any writer in the stable CSV shape.
pub fn write_csv<W: Write>(writer: W, points: &[BodePoint]) -> Result<()> {
    let with_phase = points.iter().any(|p| p.phase_deg.is_some());
    let mut csv = WriterBuilder::new().delimiter(b';').from_writer(writer);

    if with_phase {
        csv.write_record(["f_Hz", "Us_V", "Us_Ue", "Gain_dB", "Ue_V", "Phase_deg"])?;
    } else {
        csv.write_record(["f_Hz", "Us_V", "Us_Ue", "Gain_dB"])?;
    }

    for point in points {
        let mut record = vec![
            point.f_hz.to_string(),
            point.us_v.to_string(),
            point.gain_linear.to_string(),
            point.gain_db.to_string(),
        ];
        if with_phase {
            record.push(point.ue_v.to_string());
            record.push(
                point
                    .phase_deg
                    .map(|deg| deg.to_string())
                    .unwrap_or_default(),
            );
        }
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the points to a file.
pub fn write_csv_file(path: &Path, points: &[BodePoint]) -> Result<()> {
    write_csv(File::create(path)?, points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multimeter_shape_has_four_columns() {
        let points = vec![BodePoint::new(1000.0, 1.0, 0.5, None)];
        let mut out = Vec::new();
        write_csv(&mut out, &points).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("f_Hz;Us_V;Us_Ue;Gain_dB"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1000;0.5;0.5;"));
    }

    #[test]
    fn oscilloscope_shape_appends_ue_and_phase() {
        let points = vec![
            BodePoint::new(100.0, 1.0, 1.0, Some(-12.5)),
            BodePoint::new(1000.0, 1.0, 0.5, None),
        ];
        let mut out = Vec::new();
        write_csv(&mut out, &points).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("f_Hz;Us_V;Us_Ue;Gain_dB;Ue_V;Phase_deg"));
        assert!(lines.next().unwrap().ends_with(";1;-12.5"));
        // A point without phase leaves the column empty.
        assert!(lines.next().unwrap().ends_with(";1;"));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.csv");
        let points = vec![BodePoint::new(10.0, 1.0, 0.1, None)];
        write_csv_file(&path, &points).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("f_Hz;Us_V;Us_Ue;Gain_dB"));
        assert!(text.contains("10;0.1;0.1;-"));
    }
}
