//! Track geometry file readers
//!
//! The geometry adapter only needs an ordered point list, so each format is
//! reduced to that:
//! - `.json`: `[[x, y, z], ...]`, `[{"x": .., "y": .., "z": ..}, ...]`, or
//!   either of those under a top-level `"points"` key
//! - `.csv` / `.xyz` / `.txt`: one point per line, comma or whitespace
//!   separated, `#` comments, optional header row
//! - `.obj`: `v` records in file order

use crate::error::GeometryError;
use crate::model::Vector3;
use serde::Deserialize;
use std::path::Path;

pub fn read_points(path: &Path) -> Result<Vec<Vector3<f64>>, GeometryError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let text = std::fs::read_to_string(path)?;
    let points = match extension.as_str() {
        "json" => parse_json(&text)?,
        "csv" | "xyz" | "txt" => parse_delimited(&text)?,
        "obj" => parse_obj(&text)?,
        other => return Err(GeometryError::UnsupportedFormat(other.to_string())),
    };

    tracing::debug!("Read {} centerline points from {}", points.len(), path.display());
    Ok(points)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonPoint {
    Array([f64; 3]),
    Object { x: f64, y: f64, z: f64 },
}

impl From<JsonPoint> for Vector3<f64> {
    fn from(p: JsonPoint) -> Self {
        match p {
            JsonPoint::Array([x, y, z]) => Vector3::new(x, y, z),
            JsonPoint::Object { x, y, z } => Vector3::new(x, y, z),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonTrack {
    Bare(Vec<JsonPoint>),
    Wrapped { points: Vec<JsonPoint> },
}

pub fn parse_json(text: &str) -> Result<Vec<Vector3<f64>>, GeometryError> {
    let track: JsonTrack =
        serde_json::from_str(text).map_err(|e| GeometryError::Parse(e.to_string()))?;
    let points = match track {
        JsonTrack::Bare(points) | JsonTrack::Wrapped { points } => points,
    };
    Ok(points.into_iter().map(Vector3::from).collect())
}

pub fn parse_delimited(text: &str) -> Result<Vec<Vector3<f64>>, GeometryError> {
    let mut points = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line
            .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|f| !f.is_empty())
            .collect();

        let parsed: Result<Vec<f64>, _> = fields.iter().take(3).map(|f| f.parse::<f64>()).collect();
        match parsed {
            Ok(coords) if coords.len() == 3 => {
                points.push(Vector3::new(coords[0], coords[1], coords[2]));
            }
            // Header row
            Err(_) if points.is_empty() => continue,
            _ => {
                return Err(GeometryError::Parse(format!(
                    "line {}: expected 3 numeric coordinates, got {:?}",
                    line_no + 1,
                    line
                )))
            }
        }
    }

    Ok(points)
}

pub fn parse_obj(text: &str) -> Result<Vec<Vector3<f64>>, GeometryError> {
    let mut points = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("v") {
            continue;
        }

        let coords: Result<Vec<f64>, _> = fields.take(3).map(|f| f.parse::<f64>()).collect();
        match coords {
            Ok(c) if c.len() == 3 => points.push(Vector3::new(c[0], c[1], c[2])),
            _ => {
                return Err(GeometryError::Parse(format!(
                    "line {}: malformed vertex record",
                    line_no + 1
                )))
            }
        }
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_arrays_and_objects() {
        let arrays = parse_json("[[0, 0, 0], [1, 0, 0], [1, 1, 0.5]]").unwrap();
        assert_eq!(arrays.len(), 3);
        assert_eq!(arrays[2], Vector3::new(1.0, 1.0, 0.5));

        let objects = parse_json(r#"{"points": [{"x": 1, "y": 2, "z": 3}]}"#).unwrap();
        assert_eq!(objects, vec![Vector3::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(matches!(parse_json("{\"nope\": 1}"), Err(GeometryError::Parse(_))));
    }

    #[test]
    fn test_parse_delimited_with_header_and_comments() {
        let text = "x,y,z\n# start line\n0,0,0\n1.5 2.5 3.5\n\n4;5;6 # trailing\n";
        let points = parse_delimited(text).unwrap();
        assert_eq!(
            points,
            vec![
                Vector3::new(0.0, 0.0, 0.0),
                Vector3::new(1.5, 2.5, 3.5),
                Vector3::new(4.0, 5.0, 6.0),
            ]
        );
    }

    #[test]
    fn test_parse_delimited_rejects_bad_row() {
        let err = parse_delimited("0,0,0\n1,oops,2\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_obj_vertices_in_order() {
        let text = "# track\no centerline\nv 0 0 0\nv 1 0 0\nvn 0 0 1\nv 1 1 0\nf 1 2 3\n";
        let points = parse_obj(text).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[1], Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_unknown_extension() {
        let dir = std::env::temp_dir().join(format!("trackline-track-file-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("track.stl");
        std::fs::write(&path, "solid track").unwrap();
        assert!(matches!(read_points(&path), Err(GeometryError::UnsupportedFormat(_))));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
